// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Pinning of worker threads to CPUs, as an optional platform capability.

// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::sync::Arc;
use thiserror::Error;

/// Failure to pin the current thread to a CPU.
#[derive(Debug, Error)]
pub enum PinError {
    /// Pinning threads isn't implemented on this platform.
    #[cfg(any(
        miri,
        not(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        ))
    ))]
    #[error("pinning threads to CPUs is not implemented on this platform")]
    Unsupported,
    /// The operating system rejected the request.
    #[error("{0}")]
    Failed(String),
}

/// Capability to pin the calling thread to a given CPU.
pub trait CpuAffinity: Send + Sync {
    /// Pins the calling thread to the given CPU.
    fn pin_current_thread(&self, cpu: usize) -> Result<(), PinError>;
}

/// Pinning via `sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
pub struct SchedAffinity;

#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
impl CpuAffinity for SchedAffinity {
    fn pin_current_thread(&self, cpu: usize) -> Result<(), PinError> {
        let mut cpu_set = CpuSet::new();
        cpu_set
            .set(cpu)
            .map_err(|e| PinError::Failed(e.to_string()))?;
        sched_setaffinity(Pid::from_raw(0), &cpu_set).map_err(|e| PinError::Failed(e.to_string()))
    }
}

/// Fallback for platforms where pinning isn't implemented.
#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
pub struct Unsupported;

#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
impl CpuAffinity for Unsupported {
    fn pin_current_thread(&self, _cpu: usize) -> Result<(), PinError> {
        Err(PinError::Unsupported)
    }
}

/// Returns the pinning capability of the current platform.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
pub fn platform_affinity() -> Arc<dyn CpuAffinity> {
    Arc::new(SchedAffinity)
}

/// Returns the pinning capability of the current platform.
#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
pub fn platform_affinity() -> Arc<dyn CpuAffinity> {
    Arc::new(Unsupported)
}
