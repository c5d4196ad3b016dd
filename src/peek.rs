/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::ops::Deref;
use std::sync::Arc;

use crate::block::BlockCell;

/// The result of a `Peek`: either a zero-copy view into a single block's
/// committed bytes, or an owned copy assembled from the cross-block
/// scratch buffer (spec.md §4.4).
///
/// The caller must not hold a `Peeked` past the next call to `read`,
/// `peek`, or `seek` on the same cache: a seek is the only operation
/// that can narrow a block's committed range, and it does so without
/// any coordination with an outstanding `Peeked`.
pub struct Peeked {
    kind: PeekedKind,
}

enum PeekedKind {
    Block {
        // Keeps the block's backing allocation alive for as long as
        // this view exists, even though the block's own mutex is not
        // held for that duration.
        _owner: Arc<BlockCell>,
        ptr: *const u8,
        len: usize,
    },
    Scratch(Vec<u8>),
}

impl Peeked {
    /// `slice` must be a committed sub-range (`[begin, end)`) of the
    /// block guarded by `owner`, obtained while `owner`'s lock was held.
    /// A block's buffer is allocated once in `Block::new` and never
    /// reallocated afterward (`commit` only ever writes within existing
    /// capacity), so `slice`'s pointer stays valid for as long as
    /// `owner` is kept alive here -- independent of whether the mutex
    /// that produced it is still locked.
    pub(crate) fn from_block(owner: Arc<BlockCell>, slice: &[u8]) -> Self {
        Peeked {
            kind: PeekedKind::Block {
                _owner: owner,
                ptr: slice.as_ptr(),
                len: slice.len(),
            },
        }
    }

    pub(crate) fn from_scratch(bytes: Vec<u8>) -> Self {
        Peeked {
            kind: PeekedKind::Scratch(bytes),
        }
    }

    /// True when this peek was served from a single block without a
    /// copy; exposed for tests asserting the zero-copy fast path.
    pub fn is_zero_copy(&self) -> bool {
        matches!(self.kind, PeekedKind::Block { .. })
    }
}

impl Deref for Peeked {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.kind {
            // Safety: see `from_block`. The bytes in `[ptr, ptr+len)`
            // were committed (immutable) at the time this guard was
            // built, and `_owner` keeps the allocation alive.
            PeekedKind::Block { ptr, len, .. } => unsafe { std::slice::from_raw_parts(*ptr, *len) },
            PeekedKind::Scratch(bytes) => &bytes[..],
        }
    }
}

// Safety: `ptr` only ever points at immutable, already-committed bytes
// owned by `_owner`; no mutable aliasing is ever taken through it.
unsafe impl Send for Peeked {}
