// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Copy requests and the tasks that carry their blocks through the queue.

use super::partition::{Block, Partition};
use super::semaphore::Semaphore;
use crate::copy_fn::BlockCopy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// State of one copy request, shared between the dispatching thread and the
/// tasks of this request.
///
/// The request-local semaphore is notified exactly once per block, whether the
/// block was copied, panicked or was discarded at shutdown.
pub struct Request {
    /// Request-local semaphore.
    done: Semaphore,
    /// Number of blocks the request was split into.
    num_blocks: usize,
    /// Number of blocks whose copy routine panicked.
    panicked: AtomicUsize,
    /// Number of blocks discarded at shutdown without being copied.
    discarded: AtomicUsize,
}

/// How the blocks of a request ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Number of blocks the request was split into.
    pub num_blocks: usize,
    /// Number of blocks whose copy routine panicked.
    pub panicked: usize,
    /// Number of blocks discarded at shutdown.
    pub discarded: usize,
}

impl Outcome {
    /// Number of blocks that were successfully copied.
    pub fn completed(&self) -> usize {
        self.num_blocks - self.panicked - self.discarded
    }
}

impl Request {
    /// Creates a request split into the given number of blocks.
    pub fn new(num_blocks: usize) -> Self {
        Self {
            done: Semaphore::new(0),
            num_blocks,
            panicked: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
        }
    }

    /// Signals that one block was copied.
    pub fn complete_block(&self) {
        self.done.notify(1);
    }

    /// Signals that the copy routine panicked on one block.
    pub fn panic_block(&self) {
        self.panicked.fetch_add(1, Ordering::SeqCst);
        self.done.notify(1);
    }

    /// Signals that the given number of blocks were discarded.
    pub fn discard_blocks(&self, count: usize) {
        self.discarded.fetch_add(count, Ordering::SeqCst);
        self.done.notify(count);
    }

    /// Blocks until every block of this request has been signaled.
    pub fn wait(&self) -> Outcome {
        self.done.wait(self.num_blocks);
        Outcome {
            num_blocks: self.num_blocks,
            panicked: self.panicked.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }
}

/// Base pointers of a copy request.
#[derive(Clone, Copy, Debug)]
pub struct CopyTarget {
    /// Start of the destination range.
    pub dst: *mut u8,
    /// Start of the source range.
    pub src: *const u8,
}

// SAFETY: A `CopyTarget` is only dereferenced by the worker thread that
// executes a block, for the byte range of that block. The dispatching thread
// keeps both ranges alive and otherwise untouched until every block has been
// signaled on the request-local semaphore, and blocks of the same request
// don't overlap.
unsafe impl Send for CopyTarget {}

/// The work carried by a queued task.
#[derive(Debug)]
enum Work {
    /// One precomputed block, consumed whole.
    Block(Block),
    /// All the blocks that remain for the request, handed out one at a time.
    Remaining(Partition),
}

/// An entry in the task queue.
pub struct Task {
    target: CopyTarget,
    work: Work,
    request: Arc<Request>,
}

impl Task {
    /// Creates a task for a single block.
    pub fn block(target: CopyTarget, block: Block, request: Arc<Request>) -> Self {
        Self {
            target,
            work: Work::Block(block),
            request,
        }
    }

    /// Creates a task for all the blocks of a partition, that shrinks in
    /// place as blocks are taken off its front.
    pub fn remaining(target: CopyTarget, partition: Partition, request: Arc<Request>) -> Self {
        Self {
            target,
            work: Work::Remaining(partition),
            request,
        }
    }

    /// Number of dequeues needed to exhaust this task.
    pub fn num_blocks(&self) -> usize {
        match &self.work {
            Work::Block(_) => 1,
            Work::Remaining(partition) => partition.remaining_blocks(),
        }
    }

    /// Takes the next block off this task. Returns the job to execute and
    /// whether the task is now exhausted.
    pub fn take_job(&mut self) -> Option<(Job, bool)> {
        let (block, exhausted) = match &mut self.work {
            Work::Block(block) => (*block, true),
            Work::Remaining(partition) => {
                let block = partition.next()?;
                (block, partition.remaining_blocks() == 0)
            }
        };
        let job = Job {
            target: self.target,
            block,
            request: self.request.clone(),
        };
        Some((job, exhausted))
    }

    /// Discards this task, signaling all its remaining blocks to the request.
    pub fn discard(self) {
        self.request.discard_blocks(self.num_blocks());
    }
}

/// A single block taken off the queue, ready to be executed by a worker
/// thread.
pub struct Job {
    target: CopyTarget,
    block: Block,
    request: Arc<Request>,
}

impl Job {
    /// Returns the block to copy.
    pub fn block(&self) -> Block {
        self.block
    }

    /// Returns the request that this job belongs to.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Runs the copy routine on this block.
    ///
    /// # Safety
    ///
    /// The request's byte ranges must still be alive, which holds as long as
    /// the request hasn't been signaled for this block yet.
    pub unsafe fn run(&self, copy_fn: &dyn BlockCopy) {
        // SAFETY:
        // - The block is included in `0..len` where `len` is the length of the
        //   request, so the offset pointers stay within the caller's ranges.
        // - The ranges are alive, as ensured by the caller of this function.
        // - Blocks of the same request don't overlap, so no other thread accesses
        //   these bytes concurrently.
        unsafe {
            copy_fn.copy(
                self.target.dst.add(self.block.offset),
                self.target.src.add(self.block.offset),
                self.block.len,
            );
        }
    }
}
