// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

fn main() {
    divan::main();
}

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const LENGTHS: &[usize] = &[100_000, 1_000_000, 10_000_000];

/// Baseline benchmark copying on the current thread.
mod serial {
    use super::LENGTHS;
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};

    #[divan::bench(args = LENGTHS)]
    fn copy(bencher: Bencher, len: usize) {
        let src = vec![0x5Au8; len];
        let mut dst = vec![0u8; len];
        let dst_slice = dst.as_mut_slice();
        bencher
            .counter(BytesCount::new(len))
            .bench_local(|| black_box(&mut *dst_slice).copy_from_slice(black_box(&src)))
    }
}

/// Benchmark using Rayon, with one chunk per thread.
mod rayon {
    use super::{LENGTHS, NUM_THREADS};
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};
    use rayon::iter::{IndexedParallelIterator, ParallelIterator};
    use rayon::slice::{ParallelSlice, ParallelSliceMut};

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn copy_rayon<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        let src = vec![0x5Au8; len];
        let mut dst = vec![0u8; len];
        let dst_slice = dst.as_mut_slice();
        let chunk_size = len.div_ceil(NUM_THREADS);
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(NUM_THREADS)
            .build()
            .unwrap();
        // divan::Bencher isn't Send, so bench_local() can't run inside the Rayon
        // thread pool.
        bencher.counter(BytesCount::new(len)).bench_local(|| {
            thread_pool.install(|| {
                black_box(&mut *dst_slice)
                    .par_chunks_mut(chunk_size)
                    .zip(black_box(src.as_slice()).par_chunks(chunk_size))
                    .for_each(|(dst, src)| dst.copy_from_slice(src))
            })
        });
    }
}

/// Benchmarks using a copy pool.
mod blockcopy {
    use super::{LENGTHS, NUM_THREADS};
    use blockcopy::{
        BlockCopy, CopyPoolBuilder, CpuPinningPolicy, PartitionPolicy, QueueStrategy, StdCopy,
        ThreadCount, WordCopy,
    };
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};
    use std::sync::Arc;

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn copy_batch<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        copy_impl::<NUM_THREADS>(
            bencher,
            len,
            QueueStrategy::Batch,
            PartitionPolicy::Capped,
            Arc::new(StdCopy),
        )
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn copy_shrinking<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        copy_impl::<NUM_THREADS>(
            bencher,
            len,
            QueueStrategy::Shrinking,
            PartitionPolicy::Capped,
            Arc::new(StdCopy),
        )
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn copy_fixed_blocks<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        copy_impl::<NUM_THREADS>(
            bencher,
            len,
            QueueStrategy::Batch,
            PartitionPolicy::FixedBlockSize,
            Arc::new(StdCopy),
        )
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn copy_words<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        copy_impl::<NUM_THREADS>(
            bencher,
            len,
            QueueStrategy::Batch,
            PartitionPolicy::Capped,
            Arc::new(WordCopy),
        )
    }

    fn copy_impl<const NUM_THREADS: usize>(
        bencher: Bencher,
        len: usize,
        queue_strategy: QueueStrategy,
        partition: PartitionPolicy,
        copy_fn: Arc<dyn BlockCopy>,
    ) {
        let src = vec![0x5Au8; len];
        let mut dst = vec![0u8; len];
        let dst_slice = dst.as_mut_slice();
        let pool = CopyPoolBuilder {
            num_threads: ThreadCount::try_from(NUM_THREADS).unwrap(),
            partition,
            queue_strategy,
            cpu_pinning: CpuPinningPolicy::IfSupported,
            copy_fn,
            ..Default::default()
        }
        .build()
        .unwrap();

        bencher.counter(BytesCount::new(len)).bench_local(|| {
            pool.copy(black_box(&mut *dst_slice), black_box(&src))
                .unwrap();
        });
    }
}
