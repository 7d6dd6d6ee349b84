// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to time parallel copies against serial ones.

use blockcopy::{
    BlockCopy, BytewiseCopy, CopyPool, CopyPoolBuilder, CpuPinningPolicy, PartitionPolicy,
    QueueStrategy, StdCopy, ThreadCount, WordCopy,
};
use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    println!("Initializing...");
    let mut src = vec![0u8; cli.size];
    ChaCha12Rng::seed_from_u64(42).fill(src.as_mut_slice());
    let mut dst = vec![0u8; cli.size];

    let pools = (cli.min_threads.get()..=cli.max_threads.get())
        .map(|num_threads| {
            let pool = CopyPoolBuilder {
                num_threads: ThreadCount::try_from(num_threads).unwrap(),
                block_size: cli.block_size,
                partition: cli.partition.into(),
                queue_strategy: cli.queue_strategy.into(),
                cpu_pinning: if cli.pin_threads {
                    CpuPinningPolicy::IfSupported
                } else {
                    CpuPinningPolicy::No
                },
                copy_fn: cli.copy_fn.routine(),
                ..Default::default()
            }
            .build()
            .unwrap_or_else(|e| panic!("Failed to build a pool of {num_threads} threads: {e}"));
            (format!("{num_threads} threads"), pool)
        })
        .collect::<Vec<(String, CopyPool)>>();

    let mut serial = Timing::default();
    let mut words = Timing::default();
    let mut parallel = vec![Timing::default(); pools.len()];

    for _ in 0..cli.iterations {
        serial.run(&mut dst, &src, |dst, src| dst.copy_from_slice(src));
        words.run(&mut dst, &src, |dst, src| {
            // SAFETY: Both slices have the same length and don't overlap.
            unsafe { WordCopy.copy(dst.as_mut_ptr(), src.as_ptr(), src.len()) };
        });
        for ((_, pool), timing) in pools.iter().zip(parallel.iter_mut()) {
            timing.run(&mut dst, &src, |dst, src| {
                pool.copy(dst, src).unwrap();
            });
        }
    }

    println!(
        "| Name             | Calls    | Valid    | Average Time | Minimum Time | Maximum Time |"
    );
    println!(
        "+------------------+----------+----------+--------------+--------------+--------------+"
    );
    serial.print("copy_from_slice");
    words.print("word copy");
    for ((name, _), timing) in pools.iter().zip(parallel.iter()) {
        timing.print(name);
    }
}

/// Statistics of the calls to one copy routine.
#[derive(Clone)]
struct Timing {
    calls: u64,
    valid: u64,
    total: Duration,
    minimum: Duration,
    maximum: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            calls: 0,
            valid: 0,
            total: Duration::ZERO,
            minimum: Duration::MAX,
            maximum: Duration::ZERO,
        }
    }
}

impl Timing {
    /// Times one call to the given copy routine, and checks its output.
    fn run(&mut self, dst: &mut [u8], src: &[u8], copy: impl FnOnce(&mut [u8], &[u8])) {
        dst.fill(0);

        let start = Instant::now();
        copy(black_box(&mut *dst), black_box(src));
        let elapsed = start.elapsed();

        self.calls += 1;
        self.total += elapsed;
        self.minimum = self.minimum.min(elapsed);
        self.maximum = self.maximum.max(elapsed);
        if dst == src {
            self.valid += 1;
        }
    }

    fn print(&self, name: &str) {
        let average = match u32::try_from(self.calls) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(calls) => self.total / calls,
        };
        println!(
            "| {name:<16} | {:>8} | {:>8} | {:>9} ns | {:>9} ns | {:>9} ns |",
            self.calls,
            self.valid,
            average.as_nanos(),
            if self.calls == 0 {
                0
            } else {
                self.minimum.as_nanos()
            },
            self.maximum.as_nanos(),
        );
    }
}

/// CLI tool to time parallel copies against serial ones.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Number of bytes to copy. Defaults to a 3840x2160 RGBA frame.
    #[arg(long, default_value_t = 3840 * 2160 * 4)]
    size: usize,

    /// Number of times to run each copy routine.
    #[arg(long, default_value_t = 10_000)]
    iterations: usize,

    /// Smallest pool to time.
    #[arg(long, default_value_t = NonZeroUsize::new(2).unwrap())]
    min_threads: NonZeroUsize,

    /// Largest pool to time.
    #[arg(long, default_value_t = NonZeroUsize::new(8).unwrap())]
    max_threads: NonZeroUsize,

    /// Target size of each block, in bytes.
    #[arg(long, default_value_t = blockcopy::DEFAULT_BLOCK_SIZE)]
    block_size: NonZeroUsize,

    /// Policy to split a copy into blocks.
    #[arg(long, value_enum, default_value_t = PartitionCli::Capped)]
    partition: PartitionCli,

    /// Strategy to queue the blocks of a copy.
    #[arg(long, value_enum, default_value_t = QueueStrategyCli::Batch)]
    queue_strategy: QueueStrategyCli,

    /// Routine that worker threads copy each block with.
    #[arg(long, value_enum, default_value_t = CopyFnCli::Std)]
    copy_fn: CopyFnCli,

    /// Whether to pin worker threads to CPUs.
    #[arg(long, default_value_t = false)]
    pin_threads: bool,
}

/// Policy to split a copy into blocks.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PartitionCli {
    /// Never split into more blocks than there are worker threads.
    Capped,
    /// Split into blocks of exactly the block size.
    FixedBlockSize,
}

impl From<PartitionCli> for PartitionPolicy {
    fn from(partition: PartitionCli) -> Self {
        match partition {
            PartitionCli::Capped => PartitionPolicy::Capped,
            PartitionCli::FixedBlockSize => PartitionPolicy::FixedBlockSize,
        }
    }
}

/// Strategy to queue the blocks of a copy.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum QueueStrategyCli {
    /// Queue all the blocks at once.
    Batch,
    /// Queue one entry that worker threads take blocks from.
    Shrinking,
}

impl From<QueueStrategyCli> for QueueStrategy {
    fn from(queue_strategy: QueueStrategyCli) -> Self {
        match queue_strategy {
            QueueStrategyCli::Batch => QueueStrategy::Batch,
            QueueStrategyCli::Shrinking => QueueStrategy::Shrinking,
        }
    }
}

/// Routine to copy each block with.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum CopyFnCli {
    /// The platform's memcpy().
    Std,
    /// One byte at a time.
    Bytewise,
    /// The widest words that divide the block length.
    Word,
}

impl CopyFnCli {
    fn routine(self) -> Arc<dyn BlockCopy> {
        match self {
            CopyFnCli::Std => Arc::new(StdCopy),
            CopyFnCli::Bytewise => Arc::new(BytewiseCopy),
            CopyFnCli::Word => Arc::new(WordCopy),
        }
    }
}
