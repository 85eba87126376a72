//! Completion signalling between the interrupt handler and blocked callers.
//!
//! A single-slot handoff: one producer (the interrupt handler) sets a
//! result-ready flag and wakes waiters; one logical consumer per in-flight
//! command observes the flag and clears it before returning. The flag and
//! the condition variable share one mutex, which closes the classic window
//! where a wake lands between a caller checking the predicate and going to
//! sleep.

use crate::error::{EduError, Result};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Flag {
    /// Result ready, not yet consumed.
    ready: bool,
    /// One-shot external cancellation; consumed by the next waiter.
    cancelled: bool,
    /// Sticky: interrupt delivery is gone for good (handler fault or
    /// teardown). Every current and future wait fails.
    closed: bool,
}

/// Single-slot completion signal, one per device handle.
///
/// Initialized with the flag false. The flag is false again the moment a
/// waiter returns successfully — a stale "ready" can never satisfy a
/// future, unrelated wait.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    flag: Mutex<Flag>,
    cond: Condvar,
}

impl CompletionSignal {
    /// Create a signal with the flag cleared.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the result-ready flag is set, then atomically observe
    /// and clear it under the flag's own lock.
    ///
    /// Never returns `Ok` without having just cleared a true flag; spurious
    /// condvar wakeups are absorbed by re-checking the predicate.
    ///
    /// # Errors
    ///
    /// Returns [`EduError::InterruptedWait`] if the wait was cancelled via
    /// [`cancel`](Self::cancel) or the signal was [`close`](Self::close)d.
    pub fn wait(&self) -> Result<()> {
        let mut flag = self.lock();
        loop {
            if flag.ready {
                flag.ready = false;
                return Ok(());
            }
            if flag.closed {
                return Err(EduError::InterruptedWait);
            }
            if flag.cancelled {
                flag.cancelled = false;
                return Err(EduError::InterruptedWait);
            }
            flag = self
                .cond
                .wait(flag)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Set the result-ready flag and wake all waiters.
    ///
    /// Called from the interrupt handler. At most one waiter is expected,
    /// but any number are woken correctly.
    pub fn signal(&self) {
        let mut flag = self.lock();
        flag.ready = true;
        self.cond.notify_all();
    }

    /// Cancel the wait currently in progress (one-shot).
    ///
    /// The next waiter to observe the cancellation consumes it and returns
    /// [`EduError::InterruptedWait`]; later waits proceed normally.
    pub fn cancel(&self) {
        let mut flag = self.lock();
        flag.cancelled = true;
        self.cond.notify_all();
    }

    /// Permanently shut the signal down. Every current and future wait
    /// returns [`EduError::InterruptedWait`]. Used when interrupt delivery
    /// is lost (handler fault) and at teardown.
    pub fn close(&self) {
        let mut flag = self.lock();
        flag.closed = true;
        self.cond.notify_all();
    }

    /// Non-blocking observe-and-clear of the result-ready flag.
    ///
    /// Returns whether the flag was set. Used to pick up an interrupt that
    /// arrived after its wait was cancelled.
    pub fn try_consume(&self) -> bool {
        let mut flag = self.lock();
        std::mem::take(&mut flag.ready)
    }

    /// Clear the ready flag and any unconsumed cancellation (device reset
    /// path). A closed signal stays closed.
    pub fn drain(&self) {
        let mut flag = self.lock();
        flag.ready = false;
        flag.cancelled = false;
    }

    /// Whether the result-ready flag is currently set.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    // The protected state is a plain flag, so a poisoned lock is recovered
    // rather than propagated.
    fn lock(&self) -> MutexGuard<'_, Flag> {
        self.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
