// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure to build a [`CopyPool`](crate::CopyPool).
///
/// When building fails, all the worker threads that were already started have
/// been stopped and joined.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn worker thread #{id}")]
    Spawn {
        /// Index of the worker thread.
        id: usize,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A worker thread couldn't be pinned to its CPU, with
    /// [`CpuPinningPolicy::Always`](crate::CpuPinningPolicy::Always).
    #[error("failed to pin worker thread #{id} to CPU #{id}: {reason}")]
    Pinning {
        /// Index of the worker thread (and of the CPU).
        id: usize,
        /// Description of the failure.
        reason: String,
    },
    /// Not all worker threads became ready within the startup timeout.
    #[error("only {ready} of {expected} worker threads started within {timeout:?}")]
    StartupTimeout {
        /// Number of worker threads that became ready in time.
        ready: usize,
        /// Number of worker threads that were spawned.
        expected: usize,
        /// Configured startup timeout.
        timeout: Duration,
    },
    /// The number of threads configured in the environment is invalid.
    #[error("invalid value {value:?} in {variable}; must be a positive integer")]
    InvalidThreadCount {
        /// Name of the environment variable.
        variable: &'static str,
        /// Value found in the environment.
        value: String,
    },
}

/// Failure of a copy request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CopyError {
    /// The pool is being finalized and doesn't accept new requests.
    #[error("the copy pool is shutting down")]
    ShuttingDown,
    /// The pool was finalized while the request was in flight, and some of its
    /// blocks were discarded. The destination contents are unspecified.
    #[error("copy request abandoned at shutdown: {completed} of {blocks} blocks completed")]
    Abandoned {
        /// Number of blocks that were copied.
        completed: usize,
        /// Total number of blocks of the request.
        blocks: usize,
    },
    /// The source and destination slices have different lengths.
    #[error("destination length ({dst}) doesn't match source length ({src})")]
    LengthMismatch {
        /// Length of the destination slice.
        dst: usize,
        /// Length of the source slice.
        src: usize,
    },
}
