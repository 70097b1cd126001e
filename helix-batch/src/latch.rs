//! One-shot, multi-waiter completion signal.
//!
//! A [`Latch`] starts pending. Exactly one [`Latch::signal`] moves it to
//! completed and stores an outcome; every waiter, whether it arrived before
//! or after the signal, observes a clone of that outcome.
//!
//! # Design
//!
//! ```text
//!   waiter ──┐
//!   waiter ──┼──> wait() ──> [done?] ──no──> Notified ──┐
//!   waiter ──┘                  │                       │
//!                              yes <────── signal() ────┘
//!                               │        (notify_waiters)
//!                               v
//!                        clone of outcome
//! ```
//!
//! This is a monitor: the done flag lives behind a mutex and `Notify` plays
//! the condition variable. A waiter enables its `Notified` future *before*
//! checking the flag, and loops, so a signal racing with registration can
//! never be lost. Latches are never reset; a new epoch gets a new latch.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{ReduceError, ReduceResult};

/// One-shot completion signal carrying an outcome of type `T`.
#[derive(Debug)]
pub struct Latch<T> {
    /// `Some` once signaled. Never transitions back to `None`.
    outcome: Mutex<Option<T>>,
    /// Wakes registered waiters on signal.
    notify: Notify,
}

impl<T: Clone> Latch<T> {
    /// Creates a pending latch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Completes the latch and wakes every waiter.
    ///
    /// # Errors
    /// Returns `ReduceError::AlreadySignaled` if the latch was already
    /// completed. The first outcome is kept.
    pub fn signal(&self, outcome: T) -> ReduceResult<()> {
        {
            let mut slot = self.lock();
            if slot.is_some() {
                return Err(ReduceError::AlreadySignaled);
            }
            *slot = Some(outcome);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Suspends until the latch is signaled, then returns the outcome.
    pub async fn wait(&self) -> T {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking, otherwise a signal landing between
            // the check and the await would be missed.
            notified.as_mut().enable();

            if let Some(outcome) = self.try_get() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Waits at most `timeout` for the latch.
    ///
    /// # Errors
    /// Returns `ReduceError::Timeout` if the latch is still pending.
    pub async fn wait_timeout(&self, timeout: Duration) -> ReduceResult<T> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ReduceError::Timeout {
                waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
    }

    /// Returns the outcome if the latch has been signaled.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        self.lock().clone()
    }

    /// Returns true once the latch has been signaled.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.lock().is_some()
    }

    /// The lock is only held for a flag check or a clone, so a poisoned
    /// mutex still holds a consistent value.
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}
