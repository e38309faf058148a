//! # cephlink-bridge
//!
//! Primitives that make binding glue over a native storage C API safe.
//!
//! - [`callbacks`]: a registry turning owned values into pointer-sized
//!   tokens that native code can store and hand back to a trampoline.
//! - [`ptrguard`]: publishes a buffer address into a native cell and
//!   guarantees the cell is nulled before the buffer can go away.
//! - [`retry`]: resize loops for native calls that report "buffer too small".
//!
//! ## Call-site shape
//!
//! ```text
//! binding fn ──add──▶ Callbacks ──token──▶ native lib ──token──▶ trampoline
//!      │                                                          │
//!      └──────────────remove (Registration drop)◀──lookup─────────┘
//! ```
//!
//! [`iterate`] and [`xattr`] are the in-tree call sites built on these.

pub mod callbacks;
pub mod errno;
pub mod error;
pub mod iterate;
pub mod ptrguard;
pub mod retry;
pub mod sync_buffer;
pub mod xattr;

pub use callbacks::{Callbacks, Registration, Token};
pub use error::{BridgeError, Result};
pub use ptrguard::PtrGuard;
pub use retry::{with_sizes, Hint, Sizer};
pub use sync_buffer::SyncBuffer;
