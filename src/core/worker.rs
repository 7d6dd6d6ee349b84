// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker threads: the dequeue-execute-signal loop.

use super::affinity::CpuAffinity;
use super::pool::CpuPinningPolicy;
use super::queue::TaskQueue;
use super::request::Job;
use super::util::Status;
use crate::copy_fn::BlockCopy;
use crate::macros::{log_debug, log_error, log_warn};
use crossbeam_utils::CachePadded;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Context shared between the pool handle and all the worker threads.
pub struct WorkerShared {
    /// Queue of pending blocks, including the dispatch semaphore.
    pub queue: TaskQueue,
    /// Whether the worker threads must exit after their current block.
    pub stop: CachePadded<AtomicBool>,
    /// Routine to copy each block with.
    pub copy_fn: Arc<dyn BlockCopy>,
    /// Per-worker statistics.
    pub stats: Box<[CachePadded<WorkerStats>]>,
}

impl WorkerShared {
    /// Creates the shared context for the given number of worker threads.
    pub fn new(num_threads: usize, copy_fn: Arc<dyn BlockCopy>) -> Self {
        Self {
            queue: TaskQueue::new(),
            stop: CachePadded::new(AtomicBool::new(false)),
            copy_fn,
            stats: (0..num_threads)
                .map(|_| CachePadded::new(WorkerStats::default()))
                .collect(),
        }
    }

    /// Tells the worker threads to exit, and wakes them all up.
    pub fn stop_workers(&self) {
        log_debug!("[main thread] Notifying threads to finish...");
        self.stop.store(true, Ordering::SeqCst);
        self.queue.wake_all();
    }
}

/// Counters of the work done by one worker thread.
#[derive(Default)]
pub struct WorkerStats {
    /// Number of blocks copied.
    pub blocks: AtomicU64,
    /// Number of bytes copied.
    pub bytes: AtomicU64,
}

/// Progress of the startup handshake between the pool builder and the worker
/// threads.
#[derive(Default)]
pub struct Startup {
    /// Number of worker threads that reached their idle state.
    pub ready: usize,
    /// Worker threads that failed to start, with the reason.
    pub failures: Vec<(usize, String)>,
}

/// Context object owned by a worker thread.
pub struct WorkerContext {
    /// Thread index.
    pub id: usize,
    /// Policy to pin this thread to CPU number `id`.
    pub cpu_pinning: CpuPinningPolicy,
    /// Pinning capability of the platform.
    pub affinity: Arc<dyn CpuAffinity>,
    /// Context shared with the other threads.
    pub shared: Arc<WorkerShared>,
    /// Startup handshake.
    pub startup: Arc<Status<Startup>>,
}

impl WorkerContext {
    /// Main function run by this thread.
    pub fn run(self) {
        if let Err(reason) = self.pin() {
            log_error!("[thread {}] Failed to start: {reason}", self.id);
            self.startup
                .update_notify_all(|startup| startup.failures.push((self.id, reason)));
            return;
        }
        self.startup.update_notify_all(|startup| startup.ready += 1);
        log_debug!("[thread {}] Ready", self.id);

        loop {
            self.shared.queue.wait_available();
            match self.shared.queue.pop_front() {
                Some(job) => self.execute(job),
                None => log_debug!("[thread {}] Woken up without any block", self.id),
            }
            if self.shared.stop.load(Ordering::SeqCst) {
                log_debug!("[thread {}] Received finish signal", self.id);
                break;
            }
        }
    }

    /// Pins this thread to a CPU according to the policy. Only fails with
    /// [`CpuPinningPolicy::Always`].
    fn pin(&self) -> Result<(), String> {
        let id = self.id;
        match self.cpu_pinning {
            CpuPinningPolicy::No => Ok(()),
            CpuPinningPolicy::IfSupported => {
                match self.affinity.pin_current_thread(id) {
                    Ok(()) => log_debug!("Pinned thread #{id} to CPU #{id}"),
                    Err(e) => log_warn!("Failed to set CPU affinity for thread #{id}: {e}"),
                }
                Ok(())
            }
            CpuPinningPolicy::Always => {
                self.affinity
                    .pin_current_thread(id)
                    .map_err(|e| e.to_string())?;
                log_debug!("Pinned thread #{id} to CPU #{id}");
                Ok(())
            }
        }
    }

    /// Copies one block and signals it to its request.
    fn execute(&self, job: Job) {
        let block = job.block();
        log_debug!(
            "[thread {}] Copying {} bytes at offset {}",
            self.id,
            block.len,
            block.offset
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: The request hasn't been signaled for this block yet, so the
            // dispatching thread is still waiting and keeps the byte ranges alive.
            unsafe { job.run(&*self.shared.copy_fn) }
        }));

        match result {
            Ok(()) => {
                let stats = &self.shared.stats[self.id];
                stats.blocks.fetch_add(1, Ordering::Relaxed);
                stats.bytes.fetch_add(block.len as u64, Ordering::Relaxed);
                job.request().complete_block();
            }
            Err(_) => {
                log_error!(
                    "[thread {}] Detected panic while copying a block, notifying the requester",
                    self.id
                );
                job.request().panic_block();
            }
        }
    }
}
