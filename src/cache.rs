/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;

use slog::info;

use crate::error::CacheError;
use crate::error::CacheResult;
use crate::options::CacheOptions;
use crate::peek::Peeked;
use crate::source::Source;
use crate::state::Core;
use crate::worker;

/// State shared between the reader-facing `PrebufferCache` handle and
/// the background worker thread. Lives behind an `Arc` so the worker
/// can outlive the call to `open` that spawned it.
pub(crate) struct Shared<S: Source> {
    pub core: Mutex<Core>,
    pub fill_cv: Condvar,
    pub rewind_cv: Condvar,
    pub source: Mutex<S>,
    pub size: u64,
    pub block_size: usize,
    pub read_chunk: usize,
    pub logger: slog::Logger,
}

/// The control queries a host may issue (spec.md §4.4). Anything not
/// representable here is, by construction, unsupported -- callers that
/// need to probe an arbitrary/unknown query code should match on
/// `ControlQuery::Unsupported`.
#[derive(Debug, Clone, Copy)]
pub enum ControlQuery {
    CanSeek,
    CanFastSeek,
    GetSize,
    GetPosition,
    GetCachedSize,
    GetPrebufferFinished,
    SetPosition(u64),
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResponse {
    Bool(bool),
    Offset(u64),
    Done,
}

/// A prebuffering in-memory stream cache (spec.md §1). One instance
/// wraps exactly one `Source` and serves exactly one logical reader;
/// a background thread races ahead filling block-addressed memory.
pub struct PrebufferCache<S: Source + 'static> {
    shared: Arc<Shared<S>>,
    can_seek: bool,
    can_fast_seek: bool,
    short_seek_window: u64,
    peek_scratch: Mutex<Vec<u8>>,
    worker: Option<JoinHandle<()>>,
}

impl<S: Source + 'static> PrebufferCache<S> {
    /// Opens `source` for prebuffered reading. Fails per spec.md §4.5:
    /// the source is flagged as already wrapped, `membuf-enable` is
    /// off, or the source reports a non-positive size.
    pub fn open(mut source: S, options: &CacheOptions, logger: slog::Logger) -> CacheResult<Self> {
        if options.already_wrapped {
            return Err(CacheError::OpenFailed(
                "source is already wrapped by a prebuffer cache",
            ));
        }
        if !options.membuf_enable {
            return Err(CacheError::OpenFailed("membuf-enable is disabled"));
        }
        let size = source
            .size()
            .map_err(|e| CacheError::AllocFailure(e.to_string()))?;
        if size == 0 {
            return Err(CacheError::OpenFailed(
                "source size must be greater than zero",
            ));
        }

        let can_seek = source.can_seek();
        let can_fast_seek = source.can_fast_seek();
        let block_size = options.block_size.max(1);
        let read_chunk = options.read_chunk.max(1);

        info!(logger, "opening prebuffer cache";
            "size" => size, "block_size" => block_size, "can_seek" => can_seek);

        let shared = Arc::new(Shared {
            core: Mutex::new(Core::new(block_size, size)),
            fill_cv: Condvar::new(),
            rewind_cv: Condvar::new(),
            source: Mutex::new(source),
            size,
            block_size,
            read_chunk,
            logger,
        });

        let worker_shared = shared.clone();
        let worker = thread::spawn(move || worker::run(worker_shared));

        Ok(Self {
            shared,
            can_seek,
            can_fast_seek,
            short_seek_window: options.short_seek_window,
            peek_scratch: Mutex::new(Vec::new()),
            worker: Some(worker),
        })
    }

    /// Reads up to `n` bytes. `None` performs a discard-read: bytes are
    /// consumed (stream_offset advances) without being copied anywhere.
    /// Returns the number of bytes actually delivered; `0` means EOS.
    pub fn read(&self, buf: Option<&mut [u8]>, n: u32) -> CacheResult<u32> {
        if let Some(ref b) = buf {
            debug_assert!(b.len() >= n as usize);
        }
        let ready = self.wait_for_data(n as u64)?;
        if ready == 0 {
            return Ok(0);
        }

        let mut core = self.shared.core.lock().unwrap();
        let stream_offset = core.stream_offset;

        let buf = match buf {
            None => {
                core.stream_offset = stream_offset + ready;
                return Ok(ready as u32);
            }
            Some(b) => b,
        };

        let total = ready as usize;
        let mut copied = 0usize;
        let mut pos = stream_offset;
        while copied < total {
            let index = core.blocks.index_of(pos);
            let offset_in_block = core.blocks.offset_in_block(pos);
            let cell = core.blocks.get(index).ok_or_else(|| {
                CacheError::AllocFailure(format!("missing block {} during read", index))
            })?;
            let n_copied = {
                let block = cell.lock().unwrap();
                block.copy_out(offset_in_block, &mut buf[copied..total])
            };
            if n_copied == 0 {
                return Err(CacheError::AllocFailure(
                    "read stalled: block had no committed bytes at the expected offset".into(),
                ));
            }
            copied += n_copied;
            pos += n_copied as u64;
        }
        core.stream_offset = stream_offset + copied as u64;
        Ok(copied as u32)
    }

    /// Peeks up to `n` bytes without advancing `stream_offset`. Returns
    /// a zero-copy view when the requested range lies inside a single
    /// block, or an owned copy assembled from the scratch buffer
    /// otherwise (spec.md §4.4).
    pub fn peek(&self, n: u32) -> CacheResult<Peeked> {
        let ready = self.wait_for_data(n as u64)? as usize;
        if ready == 0 {
            return Ok(Peeked::from_scratch(Vec::new()));
        }

        let core = self.shared.core.lock().unwrap();
        let stream_offset = core.stream_offset;
        let index = core.blocks.index_of(stream_offset);
        let offset_in_block = core.blocks.offset_in_block(stream_offset);

        if offset_in_block + ready <= self.shared.block_size {
            let cell = core.blocks.get(index).ok_or_else(|| {
                CacheError::AllocFailure(format!("missing block {} during peek", index))
            })?;
            let block = cell.lock().unwrap();
            let committed = block.committed_slice(offset_in_block);
            debug_assert!(committed.len() >= ready);
            let view = Peeked::from_block(cell.clone(), &committed[..ready]);
            return Ok(view);
        }

        // Cross-block: assemble into the reusable scratch buffer, then
        // hand back an owned copy of exactly the requested bytes.
        let mut scratch = self.peek_scratch.lock().unwrap();
        if scratch.len() < ready {
            scratch.resize(ready, 0);
        }
        let mut copied = 0usize;
        let mut pos = stream_offset;
        while copied < ready {
            let idx = core.blocks.index_of(pos);
            let off = core.blocks.offset_in_block(pos);
            let cell = core.blocks.get(idx).ok_or_else(|| {
                CacheError::AllocFailure(format!("missing block {} during peek", idx))
            })?;
            let n_copied = {
                let block = cell.lock().unwrap();
                block.copy_out(off, &mut scratch[copied..ready])
            };
            if n_copied == 0 {
                return Err(CacheError::AllocFailure(
                    "peek stalled: block had no committed bytes at the expected offset".into(),
                ));
            }
            copied += n_copied;
            pos += n_copied as u64;
        }
        Ok(Peeked::from_scratch(scratch[..ready].to_vec()))
    }

    /// Seeks to `p` (spec.md §4.4). A short forward seek still inside
    /// the short-seek window is served by waiting for the worker to
    /// close the gap rather than reseeking the source.
    pub fn seek(&self, p: u64) -> CacheResult<()> {
        if !self.can_seek {
            return Err(CacheError::Unsupported("source is not seekable"));
        }

        let prebuffer_offset = self.shared.core.lock().unwrap().prebuffer_offset;
        if p > prebuffer_offset && p < prebuffer_offset + self.short_seek_window {
            let stream_offset = self.shared.core.lock().unwrap().stream_offset;
            let _ = self.wait_for_data(p.saturating_sub(stream_offset))?;
        }

        let mut core = self.shared.core.lock().unwrap();
        let rewind_target = find_contiguous_end(&core, p);
        if p <= core.prebuffer_offset && p < rewind_target {
            core.stream_offset = p;
            return Ok(());
        }
        drop(core);

        let seek_outcome = {
            let mut source = self.shared.source.lock().unwrap();
            source
                .seek(rewind_target)
                .and_then(|_| source.tell())
                .map_err(|e| e.to_string())
        };

        let mut core = self.shared.core.lock().unwrap();
        let result = match seek_outcome {
            Err(reason) => Err(CacheError::SourceSeek {
                target: rewind_target,
                reason,
            }),
            Ok(actual) => {
                core.buffered_eos = false;
                core.prebuffer_offset = actual;
                if p <= actual {
                    core.stream_offset = p;
                    Ok(())
                } else {
                    if core.stream_offset > actual {
                        core.stream_offset = actual;
                    }
                    Err(CacheError::SourceSeek {
                        target: p,
                        reason: format!("source landed at {} before requested target", actual),
                    })
                }
            }
        };
        drop(core);
        self.shared.rewind_cv.notify_all();
        result
    }

    /// Dispatches a control query (spec.md §4.4 table).
    pub fn control(&self, query: ControlQuery) -> CacheResult<ControlResponse> {
        match query {
            ControlQuery::CanSeek => Ok(ControlResponse::Bool(self.can_seek)),
            ControlQuery::CanFastSeek => Ok(ControlResponse::Bool(self.can_fast_seek)),
            ControlQuery::GetSize => Ok(ControlResponse::Offset(self.shared.size)),
            ControlQuery::GetPosition => {
                Ok(ControlResponse::Offset(self.shared.core.lock().unwrap().stream_offset))
            }
            ControlQuery::GetCachedSize => {
                Ok(ControlResponse::Offset(self.shared.core.lock().unwrap().prebuffer_offset))
            }
            ControlQuery::GetPrebufferFinished => {
                Ok(ControlResponse::Bool(self.shared.core.lock().unwrap().buffered_eos))
            }
            ControlQuery::SetPosition(p) => self.seek(p).map(|_| ControlResponse::Done),
            ControlQuery::Unsupported => Err(CacheError::Unsupported("unrecognised control query")),
        }
    }

    /// Runs `f` against the wrapped source under `source_lock`. Exposed
    /// for tests that need to assert on source-level side effects (e.g.
    /// the short-seek optimization's seek call count) that aren't part
    /// of the `Source` trait itself.
    pub fn with_source<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let source = self.shared.source.lock().unwrap();
        f(&source)
    }

    /// `safe_WaitFillData` (spec.md §4.4): blocks until at least `n`
    /// bytes are available past `stream_offset`, or fewer if EOS is
    /// reached first. Returns the (possibly clamped) ready count.
    fn wait_for_data(&self, requested: u64) -> CacheResult<u64> {
        let mut core = self.shared.core.lock().unwrap();
        let mut n = requested;
        if core.buffered_eos {
            n = n.min(core.prebuffer_offset.saturating_sub(core.stream_offset));
        }
        if n == 0 {
            return Ok(0);
        }
        loop {
            if core.stream_offset + n <= core.prebuffer_offset {
                return Ok(n);
            }
            if let Some(reason) = core.error.clone() {
                return Err(CacheError::SourceRead {
                    offset: core.stream_offset,
                    reason,
                });
            }
            if core.closing {
                return Err(CacheError::Cancelled);
            }
            if core.buffered_eos {
                n = core.prebuffer_offset.saturating_sub(core.stream_offset);
                return Ok(n);
            }
            core = self.shared.fill_cv.wait(core).unwrap();
        }
    }
}

impl<S: Source + 'static> Drop for PrebufferCache<S> {
    /// `Close` (spec.md §4.5): wake the worker out of both suspension
    /// points, request shutdown, and join before the handle is dropped.
    fn drop(&mut self) {
        {
            let mut core = self.shared.core.lock().unwrap();
            core.closing = true;
        }
        self.shared.rewind_cv.notify_all();
        self.shared.fill_cv.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// `FindContiguousEnd(p)` (spec.md §4.4 step 3): the furthest position
/// reachable from `p` by walking forward through fully-committed,
/// fully-filled blocks without hitting a gap.
fn find_contiguous_end(core: &Core, start: u64) -> u64 {
    let mut pos = start;
    loop {
        let index = core.blocks.index_of(pos);
        let offset_in_block = core.blocks.offset_in_block(pos);
        let cell = match core.blocks.get(index) {
            Some(cell) => cell,
            None => return pos,
        };
        let block = cell.lock().unwrap();
        let in_range = offset_in_block >= block.begin() && offset_in_block < block.end();
        if !in_range {
            return pos;
        }
        if block.end() == block.capacity() {
            pos = (index as u64 + 1) * core.blocks.block_size() as u64;
            continue;
        }
        // Still filling: the furthest reachable position is the
        // block's actual committed extent, not the unchanged `pos` --
        // otherwise a seek landing inside a partially-filled block
        // never satisfies `p < rewind_target` and needlessly reseeks
        // the source even when `p` is already buffered.
        return index as u64 * core.blocks.block_size() as u64 + block.end() as u64;
    }
}
