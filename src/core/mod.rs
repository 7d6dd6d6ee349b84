// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core engine: copy pool, worker threads, task queue and synchronization
//! primitives.

mod affinity;
mod partition;
mod pool;
mod queue;
mod request;
mod semaphore;
mod util;
mod worker;

pub use partition::{Block, Partition, PartitionPolicy};
pub use pool::{
    CopyPool, CopyPoolBuilder, CpuPinningPolicy, QueueStrategy, ShutdownPolicy, ThreadCount,
    WorkerStatistics, DEFAULT_BLOCK_SIZE, DEFAULT_STARTUP_TIMEOUT,
};
pub use semaphore::Semaphore;
