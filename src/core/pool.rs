// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A pool of worker threads that copies large buffers block by block.

use super::affinity::{platform_affinity, CpuAffinity};
use super::partition::{Partition, PartitionPolicy};
use super::request::{CopyTarget, Request, Task};
use super::util::Status;
use super::worker::{Startup, WorkerContext, WorkerShared};
use crate::copy_fn::{BlockCopy, StdCopy};
use crate::error::{BuildError, CopyError};
#[cfg(feature = "log_parallelism")]
use crate::macros::log_info;
use crate::macros::{log_debug, log_error, log_warn};
use std::convert::TryFrom;
use std::env::{self, VarError};
use std::num::NonZeroUsize;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Default size of the blocks that a copy request is split into: 256 KiB.
pub const DEFAULT_BLOCK_SIZE: NonZeroUsize = match NonZeroUsize::new(256 * 1024) {
    Some(size) => size,
    None => panic!("the default block size must be non-zero"),
};

/// Default time to wait for all worker threads to start.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of threads to spawn in a copy pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    #[default]
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

impl ThreadCount {
    /// Environment variable read by [`from_env()`](Self::from_env).
    pub const ENV_VAR: &'static str = "BLOCKCOPY_WORKER_THREADS";

    /// Reads the number of threads from the `BLOCKCOPY_WORKER_THREADS`
    /// environment variable, falling back to
    /// [`AvailableParallelism`](Self::AvailableParallelism) when it's unset.
    ///
    /// Surrounding whitespace is ignored. Zero, negative or non-numeric values
    /// are rejected.
    ///
    /// ```
    /// # use blockcopy::{BuildError, ThreadCount};
    /// # use std::env;
    /// env::set_var(ThreadCount::ENV_VAR, " 5\n");
    /// assert_eq!(ThreadCount::from_env()?, ThreadCount::try_from(5).unwrap());
    ///
    /// for invalid in ["0", "-1", "four", ""] {
    ///     env::set_var(ThreadCount::ENV_VAR, invalid);
    ///     assert!(matches!(
    ///         ThreadCount::from_env(),
    ///         Err(BuildError::InvalidThreadCount { variable, value })
    ///             if variable == ThreadCount::ENV_VAR && value == invalid
    ///     ));
    /// }
    ///
    /// env::remove_var(ThreadCount::ENV_VAR);
    /// assert_eq!(ThreadCount::from_env()?, ThreadCount::AvailableParallelism);
    /// # Ok::<(), BuildError>(())
    /// ```
    pub fn from_env() -> Result<Self, BuildError> {
        let value = match env::var(Self::ENV_VAR) {
            Ok(value) => value,
            Err(VarError::NotPresent) => return Ok(ThreadCount::AvailableParallelism),
            Err(VarError::NotUnicode(value)) => {
                return Err(BuildError::InvalidThreadCount {
                    variable: Self::ENV_VAR,
                    value: value.to_string_lossy().into_owned(),
                })
            }
        };
        match value.trim().parse::<NonZeroUsize>() {
            Ok(count) => Ok(ThreadCount::Count(count)),
            Err(_) => Err(BuildError::InvalidThreadCount {
                variable: Self::ENV_VAR,
                value,
            }),
        }
    }

    /// Resolves this to a concrete number of threads.
    fn resolve(self) -> NonZeroUsize {
        match self {
            ThreadCount::Count(count) => count,
            ThreadCount::AvailableParallelism => std::thread::available_parallelism()
                .unwrap_or_else(|e| {
                    log_warn!("Failed to query the available parallelism, using 1 thread: {e}");
                    NonZeroUsize::MIN
                }),
        }
    }
}

/// Strategy to represent the blocks of a copy request in the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueueStrategy {
    /// Push one immutable task per block, all at once.
    #[default]
    Batch,
    /// Push a single task per request, from which worker threads take one
    /// block at a time.
    Shrinking,
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    #[default]
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), building a copy pool fails.
    Always,
}

/// What happens to in-flight copy requests when a pool is finalized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Reject new requests, and wait for all in-flight requests to complete
    /// before stopping the worker threads.
    #[default]
    Drain,
    /// Reject new requests, and discard the blocks that no worker thread has
    /// started yet. The affected requests return [`CopyError::Abandoned`].
    Abandon,
}

/// A builder for [`CopyPool`].
#[derive(Clone)]
pub struct CopyPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
    /// Size of the blocks that a copy request is split into.
    pub block_size: NonZeroUsize,
    /// Policy to split a copy request into blocks.
    pub partition: PartitionPolicy,
    /// Strategy to represent the blocks of a copy request in the queue.
    pub queue_strategy: QueueStrategy,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
    /// What happens to in-flight copy requests when the pool is finalized.
    pub shutdown: ShutdownPolicy,
    /// Maximum time to wait for all worker threads to start.
    pub startup_timeout: Duration,
    /// Routine that copies each block.
    pub copy_fn: Arc<dyn BlockCopy>,
}

impl Default for CopyPoolBuilder {
    fn default() -> Self {
        Self {
            num_threads: ThreadCount::AvailableParallelism,
            block_size: DEFAULT_BLOCK_SIZE,
            partition: PartitionPolicy::Capped,
            queue_strategy: QueueStrategy::Batch,
            cpu_pinning: CpuPinningPolicy::No,
            shutdown: ShutdownPolicy::Drain,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            copy_fn: Arc::new(StdCopy),
        }
    }
}

impl CopyPoolBuilder {
    /// Spawns a copy pool, and waits until all its worker threads are ready.
    ///
    /// ```
    /// # use blockcopy::{CopyPoolBuilder, ThreadCount};
    /// let pool = CopyPoolBuilder {
    ///     num_threads: ThreadCount::try_from(4).unwrap(),
    ///     ..Default::default()
    /// }
    /// .build()?;
    ///
    /// let src = vec![42u8; 1_000_000];
    /// let mut dst = vec![0u8; 1_000_000];
    /// pool.copy(&mut dst, &src)?;
    /// assert_eq!(dst, src);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn build(&self) -> Result<CopyPool, BuildError> {
        self.build_with_affinity(platform_affinity())
    }

    /// Spawns a copy pool that pins its threads with the given capability.
    pub(crate) fn build_with_affinity(
        &self,
        affinity: Arc<dyn CpuAffinity>,
    ) -> Result<CopyPool, BuildError> {
        let num_threads = self.num_threads.resolve();
        let shared = Arc::new(WorkerShared::new(num_threads.get(), self.copy_fn.clone()));
        let startup = Arc::new(Status::new(Startup::default()));

        let mut threads = Vec::with_capacity(num_threads.get());
        for id in 0..num_threads.get() {
            let context = WorkerContext {
                id,
                cpu_pinning: self.cpu_pinning,
                affinity: affinity.clone(),
                shared: shared.clone(),
                startup: startup.clone(),
            };
            let spawned = std::thread::Builder::new()
                .name(format!("blockcopy-worker-{id}"))
                .spawn(move || context.run());
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(source) => {
                    log_error!("[main thread] Failed to spawn thread {id}: {source}");
                    abort_startup(&shared, threads);
                    return Err(BuildError::Spawn { id, source });
                }
            }
        }
        log_debug!("[main thread] Spawned threads");

        let (status, _) = startup.wait_timeout_while(self.startup_timeout, |startup| {
            startup.failures.is_empty() && startup.ready < num_threads.get()
        });
        let failure = status.failures.iter().min_by_key(|(id, _)| *id).cloned();
        let ready = status.ready;
        drop(status);

        if let Some((id, reason)) = failure {
            abort_startup(&shared, threads);
            return Err(BuildError::Pinning { id, reason });
        }
        if ready < num_threads.get() {
            log_error!(
                "[main thread] Only {ready} of {num_threads} threads started within {:?}",
                self.startup_timeout
            );
            abort_startup(&shared, threads);
            return Err(BuildError::StartupTimeout {
                ready,
                expected: num_threads.get(),
                timeout: self.startup_timeout,
            });
        }
        log_debug!("[main thread] All threads are ready");

        Ok(CopyPool {
            shared,
            threads: Mutex::new(Some(threads)),
            admission: Status::new(Admission::default()),
            num_threads,
            block_size: self.block_size,
            partition: self.partition,
            queue_strategy: self.queue_strategy,
            shutdown: self.shutdown,
        })
    }
}

/// Stops and joins the threads of a pool that failed to start.
fn abort_startup(shared: &WorkerShared, threads: Vec<JoinHandle<()>>) {
    shared.stop_workers();
    join_threads(threads);
}

fn join_threads(threads: Vec<JoinHandle<()>>) {
    log_debug!("[main thread] Joining threads in the pool...");
    for (i, handle) in threads.into_iter().enumerate() {
        let result = handle.join();
        match result {
            Ok(_) => log_debug!("[main thread] Thread {i} joined with result: {result:?}"),
            Err(_) => log_error!("[main thread] Thread {i} joined with result: {result:?}"),
        }
    }
    log_debug!("[main thread] Joined threads.");
}

/// Admission state of a pool, checked by every copy request.
#[derive(Default)]
struct Admission {
    /// Whether the pool has started finalizing.
    shutting_down: bool,
    /// Number of admitted requests that haven't returned yet.
    pending: usize,
}

/// Marks an admitted request as returned when dropped.
struct AdmissionGuard<'a> {
    admission: &'a Status<Admission>,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        // Only a finalizing thread ever waits on the admission state.
        self.admission.update_notify_one(|admission| admission.pending -= 1);
    }
}

/// Snapshot of the work done by one worker thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStatistics {
    /// Number of blocks copied.
    pub blocks: u64,
    /// Number of bytes copied.
    pub bytes: u64,
}

/// A pool of worker threads that copies large buffers in parallel.
///
/// A copy request is split into blocks (see [`Partition`]), which are queued
/// and copied by the worker threads, while the calling thread waits for all of
/// them to complete. Several threads can issue copy requests concurrently on
/// the same pool.
///
/// The pool is created by [`CopyPoolBuilder::build()`], and stopped by
/// [`finalize()`](Self::finalize) or when dropped.
pub struct CopyPool {
    /// Context shared with the worker threads.
    shared: Arc<WorkerShared>,
    /// Handles to all the worker threads, taken when finalizing.
    threads: Mutex<Option<Vec<JoinHandle<()>>>>,
    /// Admission state for copy requests.
    admission: Status<Admission>,
    num_threads: NonZeroUsize,
    block_size: NonZeroUsize,
    partition: PartitionPolicy,
    queue_strategy: QueueStrategy,
    shutdown: ShutdownPolicy,
}

impl CopyPool {
    /// Returns the number of worker threads that have been spawned in this
    /// pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.num_threads
    }

    /// Returns the size of the blocks that copy requests are split into.
    pub fn block_size(&self) -> NonZeroUsize {
        self.block_size
    }

    /// Returns the number of blocks and bytes copied by each worker thread so
    /// far.
    pub fn statistics(&self) -> Vec<WorkerStatistics> {
        self.shared
            .stats
            .iter()
            .map(|stats| WorkerStatistics {
                blocks: stats.blocks.load(Ordering::Relaxed),
                bytes: stats.bytes.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Copies `src` into `dst` in parallel, and returns `dst`.
    ///
    /// # Panics
    ///
    /// Panics if the copy routine panicked on any block of this request.
    pub fn copy<'a>(&self, dst: &'a mut [u8], src: &[u8]) -> Result<&'a mut [u8], CopyError> {
        if dst.len() != src.len() {
            return Err(CopyError::LengthMismatch {
                dst: dst.len(),
                src: src.len(),
            });
        }
        // SAFETY:
        // - Both pointers are valid for `src.len()` bytes, as they come from
        //   slices of that length.
        // - The ranges don't overlap, as `dst` is borrowed mutably.
        unsafe { self.copy_raw(dst.as_mut_ptr(), src.as_ptr(), src.len())? };
        Ok(dst)
    }

    /// Copies `len` bytes from `src` to `dst` in parallel, and returns `dst`.
    ///
    /// A zero-length copy returns immediately, even if the pool is finalized.
    ///
    /// # Safety
    ///
    /// - `src` must be valid for reads of `len` bytes, and `dst` for writes of
    ///   `len` bytes, until this function returns.
    /// - The two ranges must not overlap, and no other thread may write to
    ///   them until this function returns.
    ///
    /// # Panics
    ///
    /// Panics if the copy routine panicked on any block of this request.
    pub unsafe fn copy_raw(
        &self,
        dst: *mut u8,
        src: *const u8,
        len: usize,
    ) -> Result<*mut u8, CopyError> {
        if len == 0 {
            return Ok(dst);
        }
        let admission = self.admit()?;

        let partition = Partition::new(
            len,
            self.block_size.get(),
            self.num_threads.get(),
            self.partition,
        );
        let num_blocks = partition.num_blocks();
        let request = Arc::new(Request::new(num_blocks));
        let target = CopyTarget { dst, src };

        let pushed = match self.queue_strategy {
            QueueStrategy::Batch => {
                let tasks = partition
                    .map(|block| Task::block(target, block, request.clone()))
                    .collect();
                self.shared.queue.push_many(tasks).is_ok()
            }
            QueueStrategy::Shrinking => self
                .shared
                .queue
                .push(Task::remaining(target, partition, request.clone()))
                .is_ok(),
        };
        if !pushed {
            // An abandoning shutdown closed the queue after admission.
            return Err(CopyError::Abandoned {
                completed: 0,
                blocks: num_blocks,
            });
        }

        let outcome = request.wait();
        drop(admission);

        if outcome.panicked != 0 {
            panic!("{} block copy task(s) panicked!", outcome.panicked);
        }
        if outcome.discarded != 0 {
            return Err(CopyError::Abandoned {
                completed: outcome.completed(),
                blocks: num_blocks,
            });
        }
        Ok(dst)
    }

    /// Registers a new copy request, unless the pool is shutting down.
    fn admit(&self) -> Result<AdmissionGuard<'_>, CopyError> {
        let mut admission = self.admission.lock();
        if admission.shutting_down {
            return Err(CopyError::ShuttingDown);
        }
        admission.pending += 1;
        Ok(AdmissionGuard {
            admission: &self.admission,
        })
    }

    /// Stops and joins all the worker threads, according to the
    /// [`ShutdownPolicy`].
    ///
    /// Once this has been called, new copy requests fail with
    /// [`CopyError::ShuttingDown`]. Calling this again, or concurrently, waits
    /// until the worker threads are joined and has no other effect.
    pub fn finalize(&self) {
        // Held until the threads are joined. Copy requests never take this
        // lock.
        let mut guard = self.threads.lock().unwrap();
        self.admission.lock().shutting_down = true;
        let Some(threads) = guard.take() else {
            return;
        };

        log_debug!("[main thread] Finalizing the pool...");
        if self.shutdown == ShutdownPolicy::Drain {
            log_debug!("[main thread] Waiting for in-flight requests...");
            drop(self.admission.wait_while(|admission| admission.pending != 0));
        }

        self.shared.stop_workers();

        let abandoned = self.shared.queue.close_and_drain();
        if !abandoned.is_empty() {
            log_warn!(
                "[main thread] Discarding {} queued task(s) at shutdown",
                abandoned.len()
            );
        }
        for task in abandoned {
            task.discard();
        }

        join_threads(threads);

        #[cfg(feature = "log_parallelism")]
        self.print_statistics();
    }

    #[cfg(feature = "log_parallelism")]
    fn print_statistics(&self) {
        let statistics = self.statistics();
        let total_blocks = statistics.iter().map(|s| s.blocks).sum::<u64>();
        let total_bytes = statistics.iter().map(|s| s.bytes).sum::<u64>();
        log_info!("Copy statistics:");
        log_info!("- copied {total_blocks} blocks, {total_bytes} bytes");
        for (id, stats) in statistics.iter().enumerate() {
            log_info!(
                "- [thread {id}] copied {} blocks, {} bytes",
                stats.blocks,
                stats.bytes
            );
        }
    }
}

impl Drop for CopyPool {
    /// Finalizes the pool, if it wasn't already.
    fn drop(&mut self) {
        self.finalize();
    }
}
