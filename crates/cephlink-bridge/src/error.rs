use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Errors surfaced by the bridge to binding glue.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The dedicated worker for a pointer guard could not be started.
    #[error("failed to start pointer guard worker: {0}")]
    GuardSpawn(#[source] io::Error),

    /// A native call returned a negative errno.
    #[error("native call failed: {0}")]
    Errno(#[from] Errno),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl BridgeError {
    /// The errno carried by this error, if it came from native code.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            BridgeError::Errno(e) => Some(*e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
