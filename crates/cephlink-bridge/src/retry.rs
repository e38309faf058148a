//! Resize loops for native calls that only report "buffer too small".
//!
//! Two shapes are provided. [`Sizer`] is driven explicitly by the caller
//! and owns the decision of whether an error is worth retrying:
//!
//! ```
//! use cephlink_bridge::Sizer;
//!
//! let mut sizer = Sizer::new_ev(1, 1024, "too small");
//! let mut attempts = Vec::new();
//! let mut outcome = Ok(());
//! while sizer.should_continue() {
//!     attempts.push(sizer.size());
//!     let result = if sizer.size() < 40 { Err("too small") } else { Ok(()) };
//!     outcome = sizer.update(result);
//! }
//! assert!(outcome.is_ok());
//! assert_eq!(attempts, [1, 2, 4, 8, 16, 32, 64]);
//! ```
//!
//! [`with_sizes`] drives a closure instead and clamps the last attempt to
//! exactly the maximum.

use std::fmt;

use tracing::{debug, trace};

/// Boxed retry predicate produced by [`Sizer::new_ev`].
pub type SizerCheckFn<E> = Box<dyn Fn(&E) -> bool>;

fn grow(size: usize, hint: Option<usize>) -> Option<usize> {
    match hint {
        Some(wanted) if wanted > size => Some(wanted),
        _ if size == 0 => Some(1),
        _ => size.checked_mul(2),
    }
}

/// Explicit resize loop state.
pub struct Sizer<E, F> {
    size: usize,
    max_size: usize,
    active: bool,
    retry: F,
    _error: std::marker::PhantomData<fn(&E)>,
}

impl<E, F> Sizer<E, F>
where
    F: Fn(&E) -> bool,
{
    /// A sizer starting at `start` that retries errors accepted by `retry`.
    pub fn new(start: usize, max_size: usize, retry: F) -> Self {
        Self {
            size: start,
            max_size,
            active: true,
            retry,
            _error: std::marker::PhantomData,
        }
    }

    pub fn should_continue(&self) -> bool {
        self.active
    }

    /// Buffer size to use for the current attempt.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Record the outcome of an attempt. See [`Sizer::update_wants`].
    pub fn update(&mut self, outcome: Result<(), E>) -> Result<(), E> {
        self.update_wants(outcome, None)
    }

    /// Record the outcome of an attempt, with an optional size the native
    /// call reported it needs.
    ///
    /// Returns `Ok(())` both on success and when another attempt will be
    /// made; check [`Sizer::should_continue`] to tell them apart. A
    /// retryable error that would push the size past the maximum ends the
    /// loop and is returned as is.
    pub fn update_wants(&mut self, outcome: Result<(), E>, hint: Option<usize>) -> Result<(), E> {
        let err = match outcome {
            Ok(()) => {
                self.active = false;
                return Ok(());
            }
            Err(e) => e,
        };
        if !(self.retry)(&err) {
            self.active = false;
            return Err(err);
        }

        match grow(self.size, hint) {
            Some(next) if next <= self.max_size => {
                trace!(from = self.size, to = next, "Retrying with larger buffer");
                self.size = next;
                Ok(())
            }
            _ => {
                debug!(size = self.size, max = self.max_size, "Buffer size limit reached");
                self.active = false;
                Err(err)
            }
        }
    }
}

impl<E: PartialEq + 'static> Sizer<E, SizerCheckFn<E>> {
    /// A sizer that retries only on errors equal to `retry_on`.
    pub fn new_ev(start: usize, max_size: usize, retry_on: E) -> Self {
        Self::new(start, max_size, Box::new(move |e: &E| *e == retry_on))
    }
}

impl<E, F> fmt::Debug for Sizer<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sizer")
            .field("size", &self.size)
            .field("max_size", &self.max_size)
            .field("active", &self.active)
            .finish()
    }
}

/// What the [`with_sizes`] closure wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    /// Done, successfully or not.
    Stop,
    DoubleSize,
    /// Retry with at least this many bytes. Values not above the current
    /// size double instead.
    Size(usize),
}

impl Hint {
    /// `self` if `cond` holds, otherwise [`Hint::Stop`].
    pub fn when(self, cond: bool) -> Hint {
        if cond {
            self
        } else {
            Hint::Stop
        }
    }
}

/// Call `f` with growing sizes from `start` up to `max`.
///
/// The last attempt is made at exactly `max` even when doubling would
/// overshoot it. `f` is never called when `start > max`. Outcomes are
/// captured by the closure itself.
pub fn with_sizes<F>(start: usize, max: usize, mut f: F)
where
    F: FnMut(usize) -> Hint,
{
    let mut size = start;
    while size <= max {
        let next = match f(size) {
            Hint::Stop => return,
            Hint::DoubleSize => grow(size, None),
            Hint::Size(wanted) => grow(size, Some(wanted)),
        };
        if size == max {
            return;
        }
        size = next.map_or(max, |n| n.min(max));
    }
}
