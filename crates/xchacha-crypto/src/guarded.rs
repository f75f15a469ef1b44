//! Guarded memory for key material
//!
//! A `GuardedRegion` lives outside the normal heap: the usable bytes are
//! surrounded by inaccessible guard pages, prefixed by a canary, and locked
//! into RAM so they are never swapped. The lifecycle is a one-way type-state:
//!
//! ```text
//! allocate ──► Writable ──write / fill_with──► Written ──make_read_only──► ReadOnly
//!                  │                              │                           │
//!                  └──────────────────────────────┴────────── dispose ────────┘
//! ```
//!
//! Writes are only possible in the `Writable` state and happen exactly once,
//! because both write operations consume the region. After
//! `make_read_only` the page protection makes any stray write fault.
//! Disposal zeroes the bytes and releases the pages; it runs on drop as a
//! safety net but owners should dispose explicitly.

use std::alloc::{handle_alloc_error, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use xchacha_core::{XChaChaError, XChaChaResult};

/// Freshly allocated, not yet written.
pub struct Writable;
/// Written once, still writable at the page level.
pub struct Written;
/// Locked read-only for the rest of its life.
pub struct ReadOnly;

pub struct GuardedRegion<S> {
    ptr: Option<NonNull<[u8]>>,
    len: usize,
    _state: PhantomData<S>,
}

// The region exclusively owns its pages; shared access is read-only.
unsafe impl<S> Send for GuardedRegion<S> {}
unsafe impl<S> Sync for GuardedRegion<S> {}

impl GuardedRegion<Writable> {
    /// Reserve `len` bytes of guarded memory.
    ///
    /// Failure to obtain guarded pages aborts the process: continuing with
    /// ordinary heap memory would silently drop the protection.
    pub fn allocate(len: usize) -> Self {
        assert!(len > 0, "guarded region must not be empty");

        let ptr = unsafe { memsec::malloc_sized(len) };
        let Some(ptr) = ptr else {
            tracing::error!(len, "guarded allocation failed");
            handle_alloc_error(Layout::array::<u8>(len).unwrap_or_else(|_| Layout::new::<u8>()));
        };

        tracing::debug!(len, "guarded region allocated");
        Self {
            ptr: Some(ptr),
            len,
            _state: PhantomData,
        }
    }

    /// Copy `bytes` into the region. The length must match exactly.
    pub fn write(self, bytes: &[u8]) -> XChaChaResult<GuardedRegion<Written>> {
        if bytes.len() != self.len {
            return Err(XChaChaError::InvalidKeyLength {
                expected: self.len,
                actual: bytes.len(),
            });
        }
        Ok(self.fill_with(|dst| dst.copy_from_slice(bytes)))
    }

    /// Let `fill` produce the contents in place, without a staging copy.
    pub fn fill_with(mut self, fill: impl FnOnce(&mut [u8])) -> GuardedRegion<Written> {
        if let Some(mut ptr) = self.ptr {
            // The region is uniquely owned by `self`, which is consumed here.
            fill(unsafe { ptr.as_mut() });
        }
        self.transition()
    }
}

impl GuardedRegion<Written> {
    /// Drop write access to the pages. Irreversible for the life of the region.
    pub fn make_read_only(mut self) -> XChaChaResult<GuardedRegion<ReadOnly>> {
        if let Some(ptr) = self.ptr {
            if !unsafe { memsec::mprotect(ptr, memsec::Prot::ReadOnly) } {
                tracing::error!(len = self.len, "mprotect(read-only) failed");
                self.dispose();
                return Err(XChaChaError::PrimitiveFailure(
                    "unable to make guarded memory read-only".into(),
                ));
            }
        }
        Ok(self.transition())
    }
}

impl GuardedRegion<ReadOnly> {
    /// The protected bytes, or `None` once disposed.
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }
}

impl<S> GuardedRegion<S> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.ptr.is_none()
    }

    /// Zero and release the region. Calling it again does nothing.
    pub fn dispose(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // memsec::free restores write access, zeroes and unlocks the
            // pages, checks the canary, then unmaps.
            unsafe { memsec::free(ptr) };
            tracing::debug!(len = self.len, "guarded region disposed");
        }
    }

    fn transition<T>(&mut self) -> GuardedRegion<T> {
        GuardedRegion {
            ptr: self.ptr.take(),
            len: self.len,
            _state: PhantomData,
        }
    }
}

impl<S> Drop for GuardedRegion<S> {
    fn drop(&mut self) {
        if self.ptr.is_some() {
            tracing::debug!(len = self.len, "guarded region released on drop");
            self.dispose();
        }
    }
}

impl<S> fmt::Debug for GuardedRegion<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedRegion")
            .field("len", &self.len)
            .field("disposed", &self.is_disposed())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
