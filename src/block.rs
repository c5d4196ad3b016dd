/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Mutex;

/// A fixed-capacity byte buffer addressed by block index, carrying a
/// contiguous valid range `[begin, end)`.
///
/// Invariant: bytes in `[begin, end)` are valid source content for the
/// logical file positions `[index * block_size + begin, index *
/// block_size + end)`. Every block except the last has
/// `capacity == block_size`; the last block gets the residual capacity
/// computed from the source size (spec.md §3).
///
/// The `(begin, end)` pair and the buffer live behind the same lock.
/// spec.md §5 describes the worker writing tail bytes without holding
/// the block lock as a lock-free optimization; this crate takes the
/// write-then-publish split instead (worker fills a scratch chunk under
/// `source_lock` only, then copies it in and advances `end` under this
/// lock in one short critical section) to avoid aliasing unsafe code.
/// See DESIGN.md.
pub struct Block {
    buf: Vec<u8>,
    begin: usize,
    end: usize,
}

impl Block {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            begin: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn begin(&self) -> usize {
        self.begin
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Reconcile `(begin, end)` against a worker frontier offset inside
    /// this block, per the table in spec.md §4.3. Only the worker calls
    /// this, while preparing to fill starting at `offset`.
    pub fn reconcile(&mut self, offset: usize) {
        if offset < self.begin {
            self.begin = offset;
            self.end = offset;
        } else if offset > self.end {
            self.end = offset;
        }
        // begin <= offset <= end: leave as-is, fill resumes at end.
    }

    /// Append `chunk` at the current `end` and advance it. Called by the
    /// worker after a successful source read, inside the block lock.
    pub fn commit(&mut self, chunk: &[u8]) {
        let start = self.end;
        let stop = start + chunk.len();
        self.buf[start..stop].copy_from_slice(chunk);
        self.end = stop;
    }

    /// Copy up to `dst.len()` bytes starting at `offset` (which must lie
    /// in `[begin, end)`) into `dst`. Returns the number of bytes
    /// copied, bounded by both `dst.len()` and the committed range.
    pub fn copy_out(&self, offset: usize, dst: &mut [u8]) -> usize {
        debug_assert!(offset >= self.begin && offset < self.end);
        let available = self.end - offset;
        let n = available.min(dst.len());
        dst[..n].copy_from_slice(&self.buf[offset..offset + n]);
        n
    }

    /// Borrow the committed bytes starting at `offset`, for the
    /// zero-copy peek fast path.
    pub fn committed_slice(&self, offset: usize) -> &[u8] {
        debug_assert!(offset >= self.begin && offset <= self.end);
        &self.buf[offset..self.end]
    }
}

/// A per-block lock paired with the block it guards. The cache's block
/// array stores these behind an `Arc` so a reader can clone the handle,
/// drop the offset lock, and then block on the per-block lock alone —
/// matching the lock ordering in spec.md §3: `offset_lock -> source_lock
/// -> block.range_lock`.
pub type BlockCell = Mutex<Block>;

/// Sparse, append-only collection of blocks indexed by
/// `floor(pos / block_size)`. A missing slot means "not yet touched";
/// there is no eviction (spec.md §3, C2).
pub struct BlockArray {
    blocks: Vec<Option<std::sync::Arc<BlockCell>>>,
    block_size: usize,
    total_size: u64,
}

impl BlockArray {
    pub fn new(block_size: usize, total_size: u64) -> Self {
        Self {
            blocks: Vec::new(),
            block_size,
            total_size,
        }
    }

    pub fn index_of(&self, pos: u64) -> usize {
        (pos / self.block_size as u64) as usize
    }

    pub fn offset_in_block(&self, pos: u64) -> usize {
        (pos % self.block_size as u64) as usize
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Capacity a block at `index` should have: `block_size`, except for
    /// the block holding the final byte of the stream, which gets the
    /// residual.
    fn capacity_for(&self, index: usize) -> usize {
        let last_index = if self.total_size == 0 {
            0
        } else {
            ((self.total_size - 1) / self.block_size as u64) as usize
        };
        if index == last_index {
            let residual = ((self.total_size - 1) % self.block_size as u64) as usize + 1;
            residual
        } else {
            self.block_size
        }
    }

    /// Grow the array with empty slots up to and including `index`, then
    /// allocate the block there if absent. Must only be called under the
    /// offset lock.
    pub fn ensure(&mut self, index: usize) -> std::sync::Arc<BlockCell> {
        if self.blocks.len() <= index {
            self.blocks.resize(index + 1, None);
        }
        if self.blocks[index].is_none() {
            let capacity = self.capacity_for(index);
            self.blocks[index] = Some(std::sync::Arc::new(Mutex::new(Block::new(capacity))));
        }
        self.blocks[index].clone().unwrap()
    }

    /// Look up a block that must already exist (the reader only calls
    /// this after validating against `prebuffer_offset` under the
    /// offset lock, per spec.md invariant 1).
    pub fn get(&self, index: usize) -> Option<std::sync::Arc<BlockCell>> {
        self.blocks.get(index).and_then(|b| b.clone())
    }
}
