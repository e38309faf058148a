//! Callback registry.
//!
//! Native code must never hold a reference into Rust-owned data it can
//! outlive. Instead, the value is stored here and native code gets a
//! [`Token`]: an index into the registry table, small enough to travel as
//! a `void *` or `uintptr_t` argument and be handed back to a trampoline.
//!
//! Each trampoline owns exactly one registry, usually a `static`:
//!
//! ```
//! use cephlink_bridge::Callbacks;
//!
//! static WATCHERS: Callbacks<String> = Callbacks::new();
//!
//! let token = WATCHERS.add("watch-1".to_string());
//! assert_eq!(WATCHERS.lookup(token).as_deref().map(String::as_str), Some("watch-1"));
//! WATCHERS.remove(token);
//! assert!(WATCHERS.lookup(token).is_none());
//! ```
//!
//! Every operation is total. Unknown, stale and zero tokens resolve to
//! `None` and removing them is a no-op, because the caller on the other
//! side of the boundary has no way to receive a Rust error.

use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// Opaque handle for a registered value.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(usize);

impl Token {
    /// Index 0 is the permanent sentinel; it never names a value.
    pub const INVALID: Token = Token(0);

    pub const fn from_raw(raw: usize) -> Self {
        Token(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }

    /// Token as a native `void *` argument. The result is not a real
    /// address and must never be dereferenced.
    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    /// Recover a token from a `void *` handed back by native code.
    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Token(ptr as usize)
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Table<T: ?Sized> {
    // slots[0] is the sentinel once the table is non-empty
    slots: Vec<Option<Arc<T>>>,
    free: Vec<usize>,
    live: usize,
}

impl<T: ?Sized> Table<T> {
    const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    fn insert(&mut self, value: Arc<T>) -> usize {
        if self.slots.is_empty() {
            self.slots.push(None);
        }
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(value);
                index
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        }
    }

    fn take(&mut self, index: usize) -> Option<Arc<T>> {
        if index == 0 {
            return None;
        }
        let value = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        self.live -= 1;
        Some(value)
    }
}

/// A concurrent table mapping [`Token`]s to values.
///
/// `lookup` takes a shared lock and may run concurrently from any number of
/// threads, including native callback threads; `add` and `remove` take the
/// lock exclusively. Freed indices are reused, so the table never grows past
/// the high-water mark of simultaneously live tokens.
pub struct Callbacks<T: ?Sized> {
    table: RwLock<Table<T>>,
}

impl<T: ?Sized> Callbacks<T> {
    pub const fn new() -> Self {
        Self {
            table: parking_lot::const_rwlock(Table::new()),
        }
    }

    /// Store a value and return a fresh, nonzero token for it.
    pub fn add(&self, value: impl Into<Arc<T>>) -> Token {
        let value = value.into();
        Token(self.table.write().insert(value))
    }

    /// Store a value for the lifetime of the returned [`Registration`].
    pub fn register(&self, value: impl Into<Arc<T>>) -> Registration<'_, T> {
        Registration {
            callbacks: self,
            token: self.add(value),
        }
    }

    /// The value registered under `token`, if it is live.
    pub fn lookup(&self, token: Token) -> Option<Arc<T>> {
        self.table.read().slots.get(token.0).and_then(Clone::clone)
    }

    /// Release `token` so its index can be reused. Unknown tokens are
    /// ignored.
    pub fn remove(&self, token: Token) {
        let removed = self.table.write().take(token.0);
        // dropped outside the lock: a value's Drop may re-enter the registry
        drop(removed);
    }

    /// Drop every registered value and shrink back to the sentinel.
    ///
    /// Administrative only; outstanding tokens become dangling and may be
    /// reissued.
    pub fn reset(&self) {
        let slots = {
            let mut table = self.table.write();
            table.free.clear();
            table.live = 0;
            std::mem::take(&mut table.slots)
        };
        debug!(slots = slots.len(), "Reset callback registry");
        drop(slots);
    }

    /// Number of live tokens.
    pub fn live(&self) -> usize {
        self.table.read().live
    }

    /// Length of the backing table, counting the sentinel slot.
    pub fn slots(&self) -> usize {
        self.table.read().slots.len().max(1)
    }
}

impl<T: ?Sized> Default for Callbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Callbacks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read();
        f.debug_struct("Callbacks")
            .field("live", &table.live)
            .field("slots", &table.slots.len())
            .finish()
    }
}

/// Scoped registration; removes its token when dropped.
pub struct Registration<'a, T: ?Sized> {
    callbacks: &'a Callbacks<T>,
    token: Token,
}

impl<T: ?Sized> Registration<'_, T> {
    pub fn token(&self) -> Token {
        self.token
    }
}

impl<T: ?Sized> Drop for Registration<'_, T> {
    fn drop(&mut self) {
        self.callbacks.remove(self.token);
    }
}
