/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use structopt::StructOpt;

/// Block size in bytes; 4 MiB by default (spec.md §3).
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024;
/// Maximum bytes pulled from the source per inner fill step.
pub const DEFAULT_READ_CHUNK: usize = 16 * 1024;
/// Forward-seek distance still served by waiting instead of rewinding.
pub const DEFAULT_SHORT_SEEK_WINDOW: u64 = 64 * 1024;

#[derive(Debug, Clone, StructOpt)]
#[structopt(about = "Options for the prebuffering in-memory stream cache")]
pub struct CacheOptions {
    /// Enable the membuf cache
    ///
    /// When false, `Open` fails so the filter is bypassed and the host
    /// reads directly from the upstream source. This mirrors the
    /// upstream project's `membuf-enable` option (spec.md §6); it
    /// defaults to false so that opting a host pipeline into
    /// prebuffering is always explicit.
    #[structopt(long, parse(from_flag))]
    pub membuf_enable: bool,

    /// Block size in bytes
    ///
    /// Every block except the last is exactly this size; the last block
    /// gets the residual capacity computed from the source size.
    #[structopt(long, default_value = "4194304")]
    pub block_size: usize,

    /// Maximum bytes the prefetch worker reads from the source per
    /// inner step
    #[structopt(long, default_value = "16384")]
    pub read_chunk: usize,

    /// Forward-seek distance, in bytes, that is still served by waiting
    /// for the worker to catch up instead of reseeking the source
    #[structopt(long, default_value = "65536")]
    pub short_seek_window: u64,

    /// Treat the source as already wrapped by another cache instance
    ///
    /// `Open` refuses to layer a cache onto a source that is itself
    /// already cache-backed (spec.md §4.5); since this crate has no
    /// host filter-chain to walk, callers set this explicitly.
    #[structopt(long, parse(from_flag))]
    pub already_wrapped: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            membuf_enable: false,
            block_size: DEFAULT_BLOCK_SIZE,
            read_chunk: DEFAULT_READ_CHUNK,
            short_seek_window: DEFAULT_SHORT_SEEK_WINDOW,
            already_wrapped: false,
        }
    }
}
