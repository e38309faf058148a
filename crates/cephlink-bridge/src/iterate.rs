//! Callback-driven ranged read.
//!
//! The native `read_iterate2` call walks a byte range and invokes a C
//! callback once per extent, passing back an opaque argument. The argument
//! is a registry [`Token`]; [`read_iterate_callback`] resolves it to the
//! caller's closure.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};

use libc::{c_char, c_int, size_t};
use nix::errno::Errno;
use tracing::{error, warn};

use crate::callbacks::{Callbacks, Token};
use crate::errno;
use crate::error::Result;

/// Per-extent callback: `(offset, length, data)`. `data` is `None` for a
/// hole. Returning a negative value aborts the iteration with that errno.
pub type ReadIterateFn = dyn Fn(u64, u64, Option<&[u8]>) -> c_int + Send + Sync;

pub struct ReadIterateConfig {
    pub offset: u64,
    pub length: u64,
    pub callback: Box<ReadIterateFn>,
}

impl ReadIterateConfig {
    pub fn new<F>(offset: u64, length: u64, callback: F) -> Self
    where
        F: Fn(u64, u64, Option<&[u8]>) -> c_int + Send + Sync + 'static,
    {
        Self {
            offset,
            length,
            callback: Box::new(callback),
        }
    }
}

/// Signature of the native per-extent callback.
pub type NativeIterateCb =
    unsafe extern "C" fn(offset: u64, len: size_t, buf: *const c_char, arg: *mut c_void) -> c_int;

/// Something that exposes the native `read_iterate2` entry point.
pub trait IterateSource {
    /// Walk `[offset, offset + length)` calling `cb(.., arg)` per extent.
    /// Returns zero or a negative errno.
    ///
    /// # Safety
    ///
    /// `cb` must only be invoked with `arg` while this call is running.
    unsafe fn read_iterate2(&self, offset: u64, length: u64, cb: NativeIterateCb, arg: *mut c_void)
        -> c_int;
}

static READ_ITERATE_CALLBACKS: Callbacks<ReadIterateConfig> = Callbacks::new();

/// Read `config.length` bytes from `config.offset`, feeding each extent to
/// `config.callback`.
pub fn read_iterate<S: IterateSource + ?Sized>(source: &S, config: ReadIterateConfig) -> Result<()> {
    let offset = config.offset;
    let length = config.length;
    let registration = READ_ITERATE_CALLBACKS.register(config);

    // SAFETY: the registration outlives the native call.
    let ret = unsafe {
        source.read_iterate2(offset, length, read_iterate_callback, registration.token().as_ptr())
    };
    errno::check(ret)?;
    Ok(())
}

/// Native trampoline for [`read_iterate`].
///
/// # Safety
///
/// `buf`, when non-null, must point to `len` readable bytes.
pub unsafe extern "C" fn read_iterate_callback(
    offset: u64,
    len: size_t,
    buf: *const c_char,
    arg: *mut c_void,
) -> c_int {
    let token = Token::from_ptr(arg);
    let Some(config) = READ_ITERATE_CALLBACKS.lookup(token) else {
        warn!("read_iterate callback for unknown token {}", token);
        return errno::to_ret(Errno::EINVAL);
    };

    let data = if buf.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts(buf as *const u8, len))
    };

    match panic::catch_unwind(AssertUnwindSafe(|| (config.callback)(offset, len as u64, data))) {
        Ok(ret) => ret,
        Err(_) => {
            error!(offset, len, "read_iterate callback panicked");
            errno::to_ret(Errno::EIO)
        }
    }
}
