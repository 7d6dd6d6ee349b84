// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A counting semaphore built on a mutex and a condition variable.

use super::util::{Status, Wake};
use std::time::Duration;

/// Internal state of a [`Semaphore`].
#[derive(Default)]
struct Counter {
    /// Number of available units.
    value: usize,
    /// Number of threads currently waiting for more than one unit. When there
    /// are such waiters, waking a single thread could wake the wrong one, so
    /// all threads are woken instead.
    wide_waiters: usize,
}

/// A counting semaphore: a blocking counter supporting [`notify()`](Self::notify) and
/// [`wait()`](Self::wait).
///
/// The counter never goes negative: units are only taken under the same lock
/// that guards the wait condition.
///
/// ```
/// # use blockcopy::Semaphore;
/// let semaphore = Semaphore::new(0);
/// semaphore.notify(2);
/// semaphore.wait(2);
/// assert!(!semaphore.try_wait(1));
/// ```
pub struct Semaphore {
    counter: Status<Counter>,
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Semaphore {
    /// Creates a semaphore holding the given number of units.
    pub fn new(value: usize) -> Self {
        Self {
            counter: Status::new(Counter {
                value,
                wide_waiters: 0,
            }),
        }
    }

    /// Adds `count` units (saturating at [`usize::MAX`]) and wakes up waiting
    /// threads.
    pub fn notify(&self, count: usize) {
        self.counter.update_notify(|counter| {
            counter.value = counter.value.saturating_add(count);
            let wake = if count > 1 || counter.wide_waiters > 0 {
                Wake::All
            } else {
                Wake::One
            };
            ((), wake)
        });
    }

    /// Blocks until at least `count` units are available, then takes them.
    pub fn wait(&self, count: usize) {
        let wide = count > 1;
        if wide {
            self.counter.lock().wide_waiters += 1;
        }
        let mut counter = self.counter.wait_while(|c| c.value < count);
        counter.value -= count;
        if wide {
            counter.wide_waiters -= 1;
        }
    }

    /// Takes `count` units if they are available, without blocking.
    pub fn try_wait(&self, count: usize) -> bool {
        let mut counter = self.counter.lock();
        if counter.value >= count {
            counter.value -= count;
            true
        } else {
            false
        }
    }

    /// Like [`wait()`](Self::wait), but gives up after the given timeout.
    ///
    /// Returns whether the units were taken.
    pub fn wait_timeout(&self, count: usize, timeout: Duration) -> bool {
        let wide = count > 1;
        if wide {
            self.counter.lock().wide_waiters += 1;
        }
        let (mut counter, timed_out) = self
            .counter
            .wait_timeout_while(timeout, |c| c.value < count);
        if wide {
            counter.wide_waiters -= 1;
        }
        if timed_out {
            false
        } else {
            counter.value -= count;
            true
        }
    }

    /// Returns the number of currently available units.
    pub fn available(&self) -> usize {
        self.counter.lock().value
    }
}
