//! Pointer lifetime guard.
//!
//! Some native calls keep a pointer to caller memory past the call that
//! handed it over (an output buffer filled on completion, for example).
//! The memory must stay put until native code is done with it, and the
//! native side must never be left holding an address Rust has reclaimed.
//!
//! A [`PtrGuard`] solves both halves. It writes the buffer address into a
//! natively allocated cell and parks a dedicated worker thread that owns an
//! anchor keeping the buffer alive. [`PtrGuard::release`] (or drop) wakes
//! the worker, which nulls the cell, lets go of the anchor and only then
//! tells the releasing thread it may continue.
//!
//! ```text
//!   caller                     worker
//!   ──────                     ──────
//!   spawn ───────────────────▶ *cell = address
//!   wait(stored) ◀──────────── signal(stored)
//!     ...                      wait(release)
//!   signal(release) ─────────▶ *cell = null
//!   wait(stored) ◀──────────── drop(anchor); signal(stored)
//!   join
//! ```

use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cephlink_config::GuardConfig;
use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::error::{BridgeError, Result};

/// Binary semaphore. Starts unavailable.
struct Semaphore {
    available: Mutex<bool>,
    cond: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Self {
            available: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut available = self.available.lock();
        while !*available {
            self.cond.wait(&mut available);
        }
        *available = false;
    }

    fn signal(&self) {
        *self.available.lock() = true;
        self.cond.notify_one();
    }
}

struct Rendezvous {
    stored: Semaphore,
    release: Semaphore,
}

/// Native cell pointer, movable to the worker thread.
struct NativeCell(*mut *mut c_void);

// SAFETY: the cell is natively allocated and only the worker writes it while
// the guard is live.
unsafe impl Send for NativeCell {}

struct Address(*mut c_void);

// SAFETY: the address is only stored, never dereferenced, by the worker.
unsafe impl Send for Address {}

fn store_and_wait<A>(cell: NativeCell, address: Address, anchor: A, sync: Arc<Rendezvous>) {
    // SAFETY: `PtrGuard::new` requires the cell to stay valid until release.
    unsafe { cell.0.write_volatile(address.0) };
    sync.stored.signal();

    sync.release.wait();
    unsafe { cell.0.write_volatile(std::ptr::null_mut()) };
    drop(anchor);
    sync.stored.signal();
}

/// Keeps `address` published in a native cell until released.
///
/// There is no timeout: a guard that is never released keeps its worker
/// parked for the life of the process.
pub struct PtrGuard {
    sync: Arc<Rendezvous>,
    worker: Option<JoinHandle<()>>,
    released: bool,
}

impl PtrGuard {
    /// Store `address` into `*cell` and keep it there until release.
    ///
    /// Worker options come from the configuration passed to
    /// [`cephlink_config::install`], or [`GuardConfig::default`] when
    /// nothing was installed. No file or environment is read here.
    ///
    /// # Safety
    ///
    /// `cell` must point to writable, pointer-aligned memory that is not
    /// owned by Rust and that outlives the guard. The memory `address`
    /// refers to must stay valid until the guard is released.
    pub unsafe fn new(cell: *mut *mut c_void, address: *mut c_void) -> Result<Self> {
        Self::anchored(cell, address, ())
    }

    /// Like [`PtrGuard::new`], moving `anchor` onto the worker so that the
    /// memory behind `address` lives exactly as long as the publication.
    ///
    /// # Safety
    ///
    /// Same contract as [`PtrGuard::new`].
    pub unsafe fn anchored<A: Send + 'static>(
        cell: *mut *mut c_void,
        address: *mut c_void,
        anchor: A,
    ) -> Result<Self> {
        match cephlink_config::installed() {
            Some(config) => Self::with_config(cell, address, anchor, &config.guard),
            None => Self::with_config(cell, address, anchor, &GuardConfig::default()),
        }
    }

    /// # Safety
    ///
    /// Same contract as [`PtrGuard::new`].
    pub unsafe fn with_config<A: Send + 'static>(
        cell: *mut *mut c_void,
        address: *mut c_void,
        anchor: A,
        config: &GuardConfig,
    ) -> Result<Self> {
        let sync = Arc::new(Rendezvous {
            stored: Semaphore::new(),
            release: Semaphore::new(),
        });

        let cell = NativeCell(cell);
        let address = Address(address);
        let worker_sync = Arc::clone(&sync);
        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .stack_size(config.stack_size)
            .spawn(move || store_and_wait(cell, address, anchor, worker_sync))
            .map_err(|e| {
                warn!("Failed to spawn pointer guard worker: {}", e);
                BridgeError::GuardSpawn(e)
            })?;

        sync.stored.wait();
        trace!("Pointer guard stored");

        Ok(Self {
            sync,
            worker: Some(worker),
            released: false,
        })
    }

    /// Null the cell and let go of the anchor. Returns once the cell reads
    /// null. Calling it again does nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.sync.release.signal();
        self.sync.stored.wait();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Pointer guard worker panicked");
            }
        }
        trace!("Pointer guard released");
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for PtrGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for PtrGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtrGuard")
            .field("released", &self.released)
            .finish()
    }
}
