// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![doc = include_str!("../README.md")]
#![forbid(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

mod copy_fn;
mod core;
mod error;
mod macros;

pub use copy_fn::{BlockCopy, BytewiseCopy, RawCopyFn, StdCopy, WordCopy};
pub use crate::core::{
    Block, CopyPool, CopyPoolBuilder, CpuPinningPolicy, Partition, PartitionPolicy, QueueStrategy,
    Semaphore, ShutdownPolicy, ThreadCount, WorkerStatistics, DEFAULT_BLOCK_SIZE,
    DEFAULT_STARTUP_TIMEOUT,
};
pub use error::{BuildError, CopyError};

#[cfg(test)]
mod test {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha12Rng;
    use std::num::NonZeroUsize;
    use std::sync::{Arc, Mutex};

    /// Copy routine that records the destination address and length of every
    /// block it copies.
    #[derive(Default)]
    struct RecordingCopy {
        blocks: Mutex<Vec<(usize, usize)>>,
    }

    impl RecordingCopy {
        fn sorted_lens(&self) -> Vec<usize> {
            let mut lens = self
                .blocks
                .lock()
                .unwrap()
                .iter()
                .map(|&(_, len)| len)
                .collect::<Vec<usize>>();
            lens.sort_unstable();
            lens
        }

        /// Returns the byte ranges copied relative to `base`, in order.
        fn sorted_ranges(&self, base: *const u8) -> Vec<(usize, usize)> {
            let mut ranges = self
                .blocks
                .lock()
                .unwrap()
                .iter()
                .map(|&(addr, len)| {
                    let start = addr - base as usize;
                    (start, start + len)
                })
                .collect::<Vec<(usize, usize)>>();
            ranges.sort_unstable();
            ranges
        }
    }

    impl BlockCopy for RecordingCopy {
        unsafe fn copy(&self, dst: *mut u8, src: *const u8, len: usize) -> *mut u8 {
            self.blocks.lock().unwrap().push((dst as usize, len));
            // SAFETY: Forwarded from the caller.
            unsafe { StdCopy.copy(dst, src, len) }
        }
    }

    /// Copy routine that always panics.
    struct PanickingCopy;

    impl BlockCopy for PanickingCopy {
        unsafe fn copy(&self, _dst: *mut u8, _src: *const u8, _len: usize) -> *mut u8 {
            panic!("arithmetic panic");
        }
    }

    #[derive(Clone, Copy)]
    struct Strategy {
        queue_strategy: QueueStrategy,
        partition: PartitionPolicy,
    }

    impl Strategy {
        fn builder(self, num_threads: usize, block_size: usize) -> CopyPoolBuilder {
            CopyPoolBuilder {
                num_threads: ThreadCount::try_from(num_threads).unwrap(),
                block_size: NonZeroUsize::try_from(block_size).unwrap(),
                partition: self.partition,
                queue_strategy: self.queue_strategy,
                ..Default::default()
            }
        }
    }

    fn random_bytes(rng: &mut ChaCha12Rng, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rng.fill(bytes.as_mut_slice());
        bytes
    }

    macro_rules! expand_tests {
        ( $strategy:expr, ) => {};
        ( $strategy:expr, $case:ident, $( $others:tt )* ) => {
            #[test]
            fn $case() {
                $crate::test::$case($strategy);
            }

            expand_tests!($strategy, $($others)*);
        };
        ( $strategy:expr, $case:ident => fail($msg:expr), $( $others:tt )* ) => {
            #[test]
            #[should_panic(expected = $msg)]
            fn $case() {
                $crate::test::$case($strategy);
            }

            expand_tests!($strategy, $($others)*);
        };
    }

    macro_rules! parallelism_tests {
        ( $mod:ident, $strategy:expr, $( $tests:tt )* ) => {
            mod $mod {
                use super::*;

                expand_tests!($strategy, $($tests)*);
            }
        };
    }

    macro_rules! all_parallelism_tests {
        ( $mod:ident, $queue_strategy:expr, $partition:expr ) => {
            parallelism_tests!(
                $mod,
                Strategy {
                    queue_strategy: $queue_strategy,
                    partition: $partition,
                },
                test_copy_random_buffers,
                test_copy_twice,
                test_bytes_sum_to_length,
                test_one_invocation_per_block,
                test_one_million_bytes,
                test_zero_length,
                test_single_block,
                test_concurrent_requests,
                test_shutdown_terminates,
                test_finalize_with_requests_in_flight,
                test_one_panic => fail("1 block copy task(s) panicked!"),
                test_many_panics => fail("4 block copy task(s) panicked!"),
            );
        };
    }

    all_parallelism_tests!(batch_capped, QueueStrategy::Batch, PartitionPolicy::Capped);
    all_parallelism_tests!(
        batch_fixed,
        QueueStrategy::Batch,
        PartitionPolicy::FixedBlockSize
    );
    all_parallelism_tests!(
        shrinking_capped,
        QueueStrategy::Shrinking,
        PartitionPolicy::Capped
    );
    all_parallelism_tests!(
        shrinking_fixed,
        QueueStrategy::Shrinking,
        PartitionPolicy::FixedBlockSize
    );

    const LENGTHS: [usize; 8] = [1, 7, 4095, 4096, 4097, 65_536, 100_000, 1_000_003];

    fn test_copy_random_buffers(strategy: Strategy) {
        let pool = strategy.builder(4, 4096).build().unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(42);
        for len in LENGTHS {
            let src = random_bytes(&mut rng, len);
            let mut dst = vec![0u8; len];
            let result = pool.copy(&mut dst, &src).unwrap();
            assert_eq!(result.as_ptr(), dst.as_ptr());
            assert_eq!(dst, src);
        }
    }

    fn test_copy_twice(strategy: Strategy) {
        let pool = strategy.builder(4, 1000).build().unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(42);
        let src1 = random_bytes(&mut rng, 10_000);
        let src2 = random_bytes(&mut rng, 10_000);
        let mut dst = vec![0u8; 10_000];
        // The same destination can be overwritten by successive requests.
        pool.copy(&mut dst, &src1).unwrap();
        assert_eq!(dst, src1);
        pool.copy(&mut dst, &src2).unwrap();
        assert_eq!(dst, src2);
    }

    fn test_bytes_sum_to_length(strategy: Strategy) {
        let pool = strategy.builder(3, 4096).build().unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(42);
        let mut expected_blocks = 0;
        for len in LENGTHS {
            let src = random_bytes(&mut rng, len);
            let mut dst = vec![0u8; len];
            pool.copy(&mut dst, &src).unwrap();
            expected_blocks += Partition::new(len, 4096, 3, strategy.partition).num_blocks();
        }

        let statistics = pool.statistics();
        assert_eq!(
            statistics.iter().map(|s| s.bytes).sum::<u64>(),
            LENGTHS.iter().sum::<usize>() as u64
        );
        assert_eq!(
            statistics.iter().map(|s| s.blocks).sum::<u64>(),
            expected_blocks as u64
        );
    }

    fn test_one_invocation_per_block(strategy: Strategy) {
        let recorder = Arc::new(RecordingCopy::default());
        let pool = CopyPoolBuilder {
            copy_fn: recorder.clone(),
            ..strategy.builder(4, 300)
        }
        .build()
        .unwrap();

        let src = (0..=255u8).cycle().take(1000).collect::<Vec<u8>>();
        let mut dst = vec![0u8; 1000];
        pool.copy(&mut dst, &src).unwrap();
        assert_eq!(dst, src);

        // The request returned only after every block was copied.
        let lens = recorder.sorted_lens();
        assert_eq!(
            lens.len(),
            Partition::new(1000, 300, 4, strategy.partition).num_blocks()
        );
        assert_eq!(lens.iter().sum::<usize>(), 1000);
        assert_eq!(lens, [100, 300, 300, 300]);
    }

    fn test_one_million_bytes(strategy: Strategy) {
        let recorder = Arc::new(RecordingCopy::default());
        let pool = CopyPoolBuilder {
            copy_fn: recorder.clone(),
            ..strategy.builder(4, 262_144)
        }
        .build()
        .unwrap();

        let mut rng = ChaCha12Rng::seed_from_u64(42);
        let src = random_bytes(&mut rng, 1_000_000);
        let mut dst = vec![0u8; 1_000_000];
        pool.copy(&mut dst, &src).unwrap();
        assert_eq!(dst, src);
        assert_eq!(
            recorder.sorted_ranges(dst.as_ptr()),
            [
                (0, 262_144),
                (262_144, 524_288),
                (524_288, 786_432),
                (786_432, 1_000_000)
            ]
        );
    }

    fn test_zero_length(strategy: Strategy) {
        let recorder = Arc::new(RecordingCopy::default());
        let pool = CopyPoolBuilder {
            copy_fn: recorder.clone(),
            ..strategy.builder(4, 4096)
        }
        .build()
        .unwrap();

        let mut dst: [u8; 0] = [];
        assert_eq!(pool.copy(&mut dst, &[]).unwrap().len(), 0);

        let mut byte = [0u8; 1];
        // SAFETY: A zero-length copy doesn't dereference any pointer.
        let result = unsafe { pool.copy_raw(byte.as_mut_ptr(), std::ptr::null(), 0) };
        assert_eq!(result, Ok(byte.as_mut_ptr()));

        assert!(recorder.sorted_lens().is_empty());
        assert!(pool.statistics().iter().all(|s| s.blocks == 0));
    }

    fn test_single_block(strategy: Strategy) {
        let recorder = Arc::new(RecordingCopy::default());
        let pool = CopyPoolBuilder {
            copy_fn: recorder.clone(),
            ..strategy.builder(4, 4096)
        }
        .build()
        .unwrap();

        for len in [1, 100, 4096] {
            let src = vec![0xAB; len];
            let mut dst = vec![0u8; len];
            pool.copy(&mut dst, &src).unwrap();
            assert_eq!(dst, src);
        }
        assert_eq!(recorder.sorted_lens(), [1, 100, 4096]);
    }

    fn test_concurrent_requests(strategy: Strategy) {
        let pool = strategy.builder(4, 1024).build().unwrap();
        std::thread::scope(|s| {
            for seed in 0..8u64 {
                let pool = &pool;
                s.spawn(move || {
                    let mut rng = ChaCha12Rng::seed_from_u64(seed);
                    for _ in 0..20 {
                        let len = rng.random_range(1..50_000);
                        let src = random_bytes(&mut rng, len);
                        let mut dst = vec![0u8; len];
                        pool.copy(&mut dst, &src).unwrap();
                        assert_eq!(dst, src);
                    }
                });
            }
        });
    }

    fn test_shutdown_terminates(strategy: Strategy) {
        // A pool that never received any request.
        let pool = strategy.builder(4, 4096).build().unwrap();
        pool.finalize();

        let pool = strategy.builder(4, 4096).build().unwrap();
        let src = vec![1u8; 100_000];
        let mut dst = vec![0u8; 100_000];
        pool.copy(&mut dst, &src).unwrap();
        pool.finalize();
        assert_eq!(pool.copy(&mut dst, &src), Err(CopyError::ShuttingDown));
        drop(pool);
    }

    fn test_finalize_with_requests_in_flight(strategy: Strategy) {
        for shutdown in [ShutdownPolicy::Drain, ShutdownPolicy::Abandon] {
            let pool = CopyPoolBuilder {
                shutdown,
                ..strategy.builder(4, 4096)
            }
            .build()
            .unwrap();

            std::thread::scope(|s| {
                let copiers = (0..4u8)
                    .map(|i| {
                        let pool = &pool;
                        s.spawn(move || {
                            let src = vec![i; 200_000];
                            let mut dst = vec![0u8; 200_000];
                            loop {
                                match pool.copy(&mut dst, &src) {
                                    Ok(_) => assert_eq!(dst, src),
                                    Err(e) => return e,
                                }
                            }
                        })
                    })
                    .collect::<Vec<_>>();

                std::thread::sleep(std::time::Duration::from_millis(10));
                pool.finalize();

                for copier in copiers {
                    let error = copier.join().unwrap();
                    match shutdown {
                        ShutdownPolicy::Drain => assert_eq!(error, CopyError::ShuttingDown),
                        ShutdownPolicy::Abandon => assert!(matches!(
                            error,
                            CopyError::ShuttingDown | CopyError::Abandoned { .. }
                        )),
                    }
                }
            });
        }
    }

    fn test_one_panic(strategy: Strategy) {
        let pool = CopyPoolBuilder {
            copy_fn: Arc::new(PanickingCopy),
            ..strategy.builder(4, 4096)
        }
        .build()
        .unwrap();

        let src = [1u8; 10];
        let mut dst = [0u8; 10];
        let _ = pool.copy(&mut dst, &src);
    }

    fn test_many_panics(strategy: Strategy) {
        let pool = CopyPoolBuilder {
            copy_fn: Arc::new(PanickingCopy),
            ..strategy.builder(4, 1000)
        }
        .build()
        .unwrap();

        let src = [1u8; 4000];
        let mut dst = [0u8; 4000];
        let _ = pool.copy(&mut dst, &src);
    }
}
