// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The queue of pending blocks shared by all worker threads.

use super::request::{Job, Task};
use super::semaphore::Semaphore;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Contents of the queue, guarded by its mutex.
#[derive(Default)]
struct Pending {
    tasks: VecDeque<Task>,
    /// Whether the queue refuses new tasks.
    closed: bool,
}

/// A mutex-guarded FIFO of pending tasks, paired with the dispatch semaphore
/// that counts how many blocks are available.
///
/// Lock ordering: the dispatch semaphore is notified while the queue lock is
/// held, but the queue lock is never taken while holding the semaphore lock
/// (waiting on the semaphore happens before locking the queue).
pub struct TaskQueue {
    pending: Mutex<Pending>,
    /// Dispatch semaphore.
    available: Semaphore,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            available: Semaphore::new(0),
        }
    }

    /// Pushes one task, and makes its blocks available to the workers.
    ///
    /// Fails if the queue is closed, returning the task.
    pub fn push(&self, task: Task) -> Result<(), Task> {
        let mut pending = self.pending.lock().unwrap();
        if pending.closed {
            return Err(task);
        }
        let num_blocks = task.num_blocks();
        pending.tasks.push_back(task);
        self.available.notify(num_blocks);
        Ok(())
    }

    /// Pushes a batch of tasks in one step, and makes all their blocks
    /// available to the workers.
    ///
    /// Fails if the queue is closed, returning the tasks.
    pub fn push_many(&self, tasks: Vec<Task>) -> Result<(), Vec<Task>> {
        let mut pending = self.pending.lock().unwrap();
        if pending.closed {
            return Err(tasks);
        }
        let num_blocks = tasks.iter().map(Task::num_blocks).sum();
        pending.tasks.extend(tasks);
        self.available.notify(num_blocks);
        Ok(())
    }

    /// Blocks until at least one block is available (or the workers were
    /// woken up for shutdown), and claims it.
    pub fn wait_available(&self) {
        self.available.wait(1);
    }

    /// Takes the next block off the head of the queue.
    ///
    /// A worker must only call this after returning from
    /// [`wait_available()`](Self::wait_available). This returns [`None`] only
    /// if the worker was woken up by [`wake_all()`](Self::wake_all).
    pub fn pop_front(&self) -> Option<Job> {
        let mut pending = self.pending.lock().unwrap();
        let task = pending.tasks.front_mut()?;
        let (job, exhausted) = task.take_job()?;
        if exhausted {
            pending.tasks.pop_front();
        }
        Some(job)
    }

    /// Wakes up all worker threads, regardless of available blocks.
    pub fn wake_all(&self) {
        self.available.notify(usize::MAX);
    }

    /// Closes the queue to new tasks, and returns the tasks that haven't been
    /// started yet.
    pub fn close_and_drain(&self) -> Vec<Task> {
        let mut pending = self.pending.lock().unwrap();
        pending.closed = true;
        pending.tasks.drain(..).collect()
    }

    /// Returns the number of queued tasks.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().tasks.len()
    }
}
