// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Which threads to wake up after updating a [`Status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    One,
    All,
}

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair.
///
/// The internal mutex is only ever held for short bookkeeping sections and
/// never across user code, so a poisoned mutex indicates a bug in this crate
/// and results in a panic.
pub struct Status<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Status<T> {
    /// Creates a new status initialized with the given value.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Locks the status without notifying anyone.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.mutex.lock().unwrap()
    }

    /// Updates the status with the given function and notifies one waiting
    /// thread.
    pub fn update_notify_one<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.update_notify(|t| (f(t), Wake::One))
    }

    /// Updates the status with the given function and notifies all waiting
    /// threads.
    pub fn update_notify_all<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.update_notify(|t| (f(t), Wake::All))
    }

    /// Updates the status with the given function, which also decides which
    /// waiting threads to wake up.
    ///
    /// The notification happens before the mutex is released, so that a
    /// thread starting to wait after this update can't absorb it.
    pub fn update_notify<R>(&self, f: impl FnOnce(&mut T) -> (R, Wake)) -> R {
        let mut guard = self.mutex.lock().unwrap();
        let (result, wake) = f(&mut guard);
        match wake {
            Wake::One => self.condvar.notify_one(),
            Wake::All => self.condvar.notify_all(),
        }
        drop(guard);
        result
    }

    /// Waits until the predicate is false on this status.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify the
    /// status.
    pub fn wait_while(&self, predicate: impl FnMut(&mut T) -> bool) -> MutexGuard<'_, T> {
        self.condvar
            .wait_while(self.mutex.lock().unwrap(), predicate)
            .unwrap()
    }

    /// Waits until the predicate is false on this status, or until the timeout
    /// elapses.
    ///
    /// The returned boolean is true if the timeout elapsed while the predicate
    /// was still true.
    pub fn wait_timeout_while(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&mut T) -> bool,
    ) -> (MutexGuard<'_, T>, bool) {
        let (guard, result) = self
            .condvar
            .wait_timeout_while(self.mutex.lock().unwrap(), timeout, predicate)
            .unwrap();
        (guard, result.timed_out())
    }
}
