//! Caller buffer published to native code for the duration of a call.

use std::ffi::c_void;
use std::marker::PhantomData;

use crate::error::Result;
use crate::ptrguard::PtrGuard;

/// A mutable byte buffer whose address is published into a native cell.
///
/// Native code fills the buffer in place, so [`SyncBuffer::sync`] has
/// nothing to copy; it exists so call sites read the same whether or not
/// the memory is shared.
pub struct SyncBuffer<'a> {
    guard: PtrGuard,
    len: usize,
    _buf: PhantomData<&'a mut [u8]>,
}

impl<'a> SyncBuffer<'a> {
    /// # Safety
    ///
    /// `cell` must satisfy the contract of [`PtrGuard::new`].
    pub unsafe fn new(cell: *mut *mut c_void, buf: &'a mut [u8]) -> Result<Self> {
        let len = buf.len();
        let guard = PtrGuard::new(cell, buf.as_mut_ptr() as *mut c_void)?;
        Ok(Self {
            guard,
            len,
            _buf: PhantomData,
        })
    }

    /// Make native writes visible in the Rust buffer. A no-op: the memory
    /// is shared.
    pub fn sync(&mut self) {}

    /// Unpublish the buffer. Idempotent.
    pub fn release(&mut self) {
        self.guard.release();
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_released()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
