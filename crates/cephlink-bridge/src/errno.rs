//! Native return-code classification.
//!
//! The wrapped C API reports failure as a negative errno and success as zero
//! or a non-negative length.

use libc::c_int;
use nix::errno::Errno;

use crate::error::{BridgeError, Result};

/// Convert a native return code into a length or an errno error.
pub fn check(ret: c_int) -> Result<usize> {
    if ret < 0 {
        let errno = ret.checked_neg().map_or(Errno::UnknownErrno, Errno::from_raw);
        Err(BridgeError::Errno(errno))
    } else {
        Ok(ret as usize)
    }
}

/// Negative errno as native code expects it from a callback.
pub fn to_ret(errno: Errno) -> c_int {
    -(errno as c_int)
}

/// True when the error means "the buffer was too small".
pub fn is_range(err: &BridgeError) -> bool {
    err.errno() == Some(Errno::ERANGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check() {
        assert_eq!(check(0).unwrap(), 0);
        assert_eq!(check(42).unwrap(), 42);
        let err = check(-libc::ERANGE).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::ERANGE));
        assert!(is_range(&err));
        assert!(!is_range(&check(-libc::ENOENT).unwrap_err()));
    }

    #[test]
    fn test_check_most_negative() {
        let err = check(c_int::MIN).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::UnknownErrno));
    }

    #[test]
    fn test_to_ret() {
        assert_eq!(to_ret(Errno::EINVAL), -libc::EINVAL);
        assert_eq!(check(to_ret(Errno::EIO)).unwrap_err().errno(), Some(Errno::EIO));
    }
}
