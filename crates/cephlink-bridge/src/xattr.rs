//! Extended attribute reads sized by retry.
//!
//! The native calls fill a caller buffer and fail with `ERANGE` when it is
//! too small, like `getxattr(2)` and `listxattr(2)`.

use std::ffi::CStr;

use cephlink_config::RetryConfig;
use libc::c_int;
use nix::errno::Errno;
use tracing::debug;

use crate::errno::{self, is_range};
use crate::error::{BridgeError, Result};
use crate::retry::{with_sizes, Hint, Sizer};

/// Something holding extended attributes behind a native API.
pub trait XattrSource {
    /// Copy the value of `name` into `buf`. Returns the value length or a
    /// negative errno; `-ERANGE` when `buf` is too small.
    fn getxattr(&self, name: &CStr, buf: &mut [u8]) -> c_int;

    /// Copy the NUL-separated attribute names into `buf`. With an empty
    /// `buf`, returns the size required.
    fn listxattr(&self, buf: &mut [u8]) -> c_int;
}

/// Read the value of attribute `name`.
pub fn get_xattr<S>(source: &S, name: &str, retry: &RetryConfig) -> Result<Vec<u8>>
where
    S: XattrSource + ?Sized,
{
    if name.is_empty() {
        return Err(BridgeError::InvalidArgument("empty xattr name"));
    }
    let mut cname = Vec::with_capacity(name.len() + 1);
    cname.extend_from_slice(name.as_bytes());
    cname.push(0);
    let cname = CStr::from_bytes_with_nul(&cname)
        .map_err(|_| BridgeError::InvalidArgument("xattr name contains NUL"))?;

    let mut buf = Vec::new();
    let mut outcome: Result<usize> = Err(Errno::ERANGE.into());
    with_sizes(retry.xattr_start_size, retry.xattr_max_size, |size| {
        buf.resize(size, 0);
        match errno::check(source.getxattr(cname, &mut buf)) {
            // a short buffer may be answered with the required length
            Ok(n) if n > buf.len() => {
                outcome = Err(Errno::ERANGE.into());
                Hint::Size(n)
            }
            res => {
                let again = matches!(&res, Err(e) if is_range(e));
                outcome = res;
                Hint::DoubleSize.when(again)
            }
        }
    });

    let len = outcome?;
    buf.truncate(len);
    Ok(buf)
}

/// List attribute names.
pub fn list_xattrs<S>(source: &S, retry: &RetryConfig) -> Result<Vec<String>>
where
    S: XattrSource + ?Sized,
{
    let mut sizer = Sizer::new(retry.xattr_start_size, retry.xattr_max_size, is_range);
    let mut buf = Vec::new();
    let mut len = 0;
    while sizer.should_continue() {
        buf.resize(sizer.size(), 0);
        let (outcome, hint) = match errno::check(source.listxattr(&mut buf)) {
            Ok(n) if n > buf.len() => (Err(Errno::ERANGE.into()), Some(n)),
            Ok(n) => {
                len = n;
                (Ok(()), None)
            }
            Err(e) if is_range(&e) => {
                let wanted = errno::check(source.listxattr(&mut [0u8; 0])).ok();
                (Err(e), wanted)
            }
            Err(e) => (Err(e), None),
        };
        if let Some(wanted) = hint {
            debug!(size = sizer.size(), wanted, "xattr list buffer too small");
        }
        sizer.update_wants(outcome, hint)?;
    }

    buf.truncate(len);
    Ok(buf
        .split(|b| *b == 0)
        .filter(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect())
}
