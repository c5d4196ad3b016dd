/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A prebuffering in-memory stream cache.
//!
//! [`PrebufferCache`] wraps a seekable [`Source`] and serves blocking
//! `Read`/`Peek`/`Seek`/`Control` calls while a background thread
//! continuously fills a block-addressed memory buffer ahead of the
//! reader. See `SPEC_FULL.md` in the repository root for the full
//! design.

mod block;
mod cache;
mod error;
mod options;
mod peek;
mod source;
mod state;
mod worker;

pub use cache::ControlQuery;
pub use cache::ControlResponse;
pub use cache::PrebufferCache;
pub use error::CacheError;
pub use error::CacheResult;
pub use error::ControlStatus;
pub use options::CacheOptions;
pub use options::DEFAULT_BLOCK_SIZE;
pub use options::DEFAULT_READ_CHUNK;
pub use options::DEFAULT_SHORT_SEEK_WINDOW;
pub use peek::Peeked;
pub use source::FileSource;
pub use source::SliceSource;
pub use source::Source;
