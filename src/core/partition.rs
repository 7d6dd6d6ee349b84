// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Partitioning of a copy request into blocks.

/// Policy to split a copy request into blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PartitionPolicy {
    /// Split into blocks of the configured block size, but never into more
    /// blocks than there are worker threads. When capped, the request is split
    /// evenly and the remainder is folded into the first block.
    #[default]
    Capped,
    /// Split into blocks of exactly the configured block size (the last block
    /// being shorter), regardless of the number of worker threads.
    FixedBlockSize,
}

/// A contiguous byte range of a copy request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    /// Offset of the first byte, relative to the start of the request.
    pub offset: usize,
    /// Number of bytes.
    pub len: usize,
}

/// A cursor over the blocks of a copy request.
///
/// Iterating over a [`Partition`] yields contiguous, non-overlapping blocks
/// that exactly cover `0..len`.
///
/// ```
/// # use blockcopy::{Block, Partition, PartitionPolicy};
/// let partition = Partition::new(1_000_000, 262_144, 4, PartitionPolicy::Capped);
/// assert_eq!(partition.num_blocks(), 4);
/// assert_eq!(
///     partition.collect::<Vec<_>>(),
///     [
///         Block { offset: 0, len: 262_144 },
///         Block { offset: 262_144, len: 262_144 },
///         Block { offset: 524_288, len: 262_144 },
///         Block { offset: 786_432, len: 213_568 },
///     ]
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    /// Offset of the next block.
    offset: usize,
    /// Number of bytes not yet handed out.
    remaining_len: usize,
    /// Length of the next block, unless it's the last one.
    next_len: usize,
    /// Length of the blocks after the next one, except the last one.
    block_len: usize,
    /// Total number of blocks.
    num_blocks: usize,
    /// Number of blocks not yet handed out.
    remaining_blocks: usize,
}

impl Partition {
    /// Partitions a request of `len` bytes, given the configured block size
    /// and number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` or `num_workers` is zero.
    pub fn new(len: usize, block_size: usize, num_workers: usize, policy: PartitionPolicy) -> Self {
        assert!(block_size != 0, "the block size must be non-zero");
        assert!(num_workers != 0, "the number of workers must be non-zero");

        if len == 0 {
            return Self {
                offset: 0,
                remaining_len: 0,
                next_len: 0,
                block_len: 0,
                num_blocks: 0,
                remaining_blocks: 0,
            };
        }

        let full_split = len.div_ceil(block_size);
        let num_blocks = match policy {
            PartitionPolicy::Capped => full_split.min(num_workers),
            PartitionPolicy::FixedBlockSize => full_split,
        };

        let (next_len, block_len) = if num_blocks == full_split {
            (block_size, block_size)
        } else {
            let block_len = len / num_blocks;
            let remainder = len - block_len * num_blocks;
            (block_len + remainder, block_len)
        };

        Self {
            offset: 0,
            remaining_len: len,
            next_len,
            block_len,
            num_blocks,
            remaining_blocks: num_blocks,
        }
    }

    /// Returns the total number of blocks of this partition.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Returns the number of blocks that haven't been handed out yet.
    pub fn remaining_blocks(&self) -> usize {
        self.remaining_blocks
    }
}

impl Iterator for Partition {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let len = match self.remaining_blocks {
            0 => return None,
            // The last block takes whatever is left.
            1 => self.remaining_len,
            _ => self.next_len,
        };

        let block = Block {
            offset: self.offset,
            len,
        };
        self.offset += len;
        self.remaining_len -= len;
        self.remaining_blocks -= 1;
        self.next_len = self.block_len;
        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining_blocks, Some(self.remaining_blocks))
    }
}

impl ExactSizeIterator for Partition {}
