/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use crate::block::BlockArray;

/// Everything guarded by the single "offset lock" (spec.md §3, §4.2):
/// `stream_offset`, `prebuffer_offset`, `buffered_eos`, the latched
/// error/closing flags, and the block array's shape. A single
/// `std::sync::Mutex<Core>` stands in for this lock.
pub struct Core {
    pub blocks: BlockArray,
    /// The consumer's logical read position. Mutated only by
    /// `read`/`peek`/`seek`.
    pub stream_offset: u64,
    /// The smallest logical position beyond `stream_offset` not yet
    /// guaranteed buffered. Mutated only by the worker, except that a
    /// seek resets it under this same lock.
    pub prebuffer_offset: u64,
    /// `prebuffer_offset >= size`, latched by the worker and cleared by
    /// a seek that invalidates the frontier.
    pub buffered_eos: bool,
    /// Set once by the worker on a fatal source error; poisons the
    /// cache for every subsequent wait.
    pub error: Option<String>,
    /// Set by `Close`; wakes every waiter so the worker and any blocked
    /// reader can unwind.
    pub closing: bool,
}

impl Core {
    pub fn new(block_size: usize, size: u64) -> Self {
        Self {
            blocks: BlockArray::new(block_size, size),
            stream_offset: 0,
            prebuffer_offset: 0,
            buffered_eos: false,
            error: None,
            closing: false,
        }
    }
}
