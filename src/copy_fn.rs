// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Pluggable routines that copy one block of bytes.

use std::ptr;

/// Signature of a raw block-copy routine, in the style of `memcpy()`.
pub type RawCopyFn = unsafe fn(dst: *mut u8, src: *const u8, len: usize) -> *mut u8;

/// A routine that copies one block of bytes.
///
/// Worker threads invoke this on each block of a copy request. Any
/// implementation is interchangeable as long as it copies `len` bytes from
/// `src` to `dst` byte for byte.
///
/// This trait is implemented for plain function pointers of type
/// [`RawCopyFn`]:
///
/// ```
/// # use blockcopy::{BlockCopy, RawCopyFn};
/// # use std::sync::Arc;
/// unsafe fn my_memcpy(dst: *mut u8, src: *const u8, len: usize) -> *mut u8 {
///     unsafe { std::ptr::copy_nonoverlapping(src, dst, len) };
///     dst
/// }
///
/// let copy_fn: Arc<dyn BlockCopy> = Arc::new(my_memcpy as RawCopyFn);
/// ```
pub trait BlockCopy: Send + Sync {
    /// Copies `len` bytes from `src` to `dst` and returns `dst`.
    ///
    /// # Safety
    ///
    /// - `src` must be valid for reads of `len` bytes,
    /// - `dst` must be valid for writes of `len` bytes,
    /// - the two ranges must not overlap.
    unsafe fn copy(&self, dst: *mut u8, src: *const u8, len: usize) -> *mut u8;
}

impl BlockCopy for RawCopyFn {
    unsafe fn copy(&self, dst: *mut u8, src: *const u8, len: usize) -> *mut u8 {
        // SAFETY: The caller upholds the same contract as the one of `RawCopyFn`.
        unsafe { (*self)(dst, src, len) }
    }
}

/// Copies with the standard library's [`ptr::copy_nonoverlapping()`], i.e. the
/// platform's `memcpy()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdCopy;

impl BlockCopy for StdCopy {
    unsafe fn copy(&self, dst: *mut u8, src: *const u8, len: usize) -> *mut u8 {
        // SAFETY: Forwarded from the caller.
        unsafe { ptr::copy_nonoverlapping(src, dst, len) };
        dst
    }
}

/// Copies one byte at a time.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytewiseCopy;

impl BlockCopy for BytewiseCopy {
    unsafe fn copy(&self, dst: *mut u8, src: *const u8, len: usize) -> *mut u8 {
        for i in 0..len {
            // SAFETY: `i < len`, and the caller guarantees that both ranges are
            // valid for `len` bytes.
            unsafe { dst.add(i).write(src.add(i).read()) };
        }
        dst
    }
}

/// Copies with the widest word (8, 4, 2 or 1 bytes) that evenly divides the
/// block length, using unaligned loads and stores.
#[derive(Clone, Copy, Debug, Default)]
pub struct WordCopy;

impl WordCopy {
    /// Copies `len` bytes as `len / size_of::<T>()` unaligned words.
    ///
    /// # Safety
    ///
    /// Same as [`BlockCopy::copy()`], and `len` must be a multiple of
    /// `size_of::<T>()`.
    unsafe fn copy_words<T: Copy>(dst: *mut u8, src: *const u8, len: usize) {
        let width = std::mem::size_of::<T>();
        let dst = dst.cast::<T>();
        let src = src.cast::<T>();
        for i in 0..len / width {
            // SAFETY: `(i + 1) * width <= len`, and the caller guarantees that both
            // ranges are valid for `len` bytes.
            unsafe { dst.add(i).write_unaligned(src.add(i).read_unaligned()) };
        }
    }
}

impl BlockCopy for WordCopy {
    unsafe fn copy(&self, dst: *mut u8, src: *const u8, len: usize) -> *mut u8 {
        // SAFETY: Forwarded from the caller, and each branch checks that the length
        // is a multiple of the word size.
        unsafe {
            if len % 8 == 0 {
                Self::copy_words::<u64>(dst, src, len);
            } else if len % 4 == 0 {
                Self::copy_words::<u32>(dst, src, len);
            } else if len % 2 == 0 {
                Self::copy_words::<u16>(dst, src, len);
            } else {
                Self::copy_words::<u8>(dst, src, len);
            }
        }
        dst
    }
}
