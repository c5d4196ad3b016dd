/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;

use slog::debug;
use slog::error as log_error;
use slog::warn;

use crate::cache::Shared;
use crate::source::Source;

/// Why `fill_block` stopped short of filling its target block.
enum WorkerStop {
    /// A seek moved `prebuffer_offset` out from under the fill in
    /// progress; the caller should restart the outer loop and
    /// re-evaluate from the new frontier.
    Rewind,
    /// A fatal error was latched, or `Close` requested shutdown; the
    /// worker thread should terminate.
    Exit,
}

fn mark_fatal<S: Source>(shared: &Arc<Shared<S>>, reason: String) {
    let mut core = shared.core.lock().unwrap();
    log_error!(shared.logger, "prebuffer worker hit a fatal source error"; "reason" => &reason);
    core.error = Some(reason);
    shared.fill_cv.notify_all();
    shared.rewind_cv.notify_all();
}

/// The background prefetch worker's main loop (spec.md §4.3). Runs
/// until `Close` or a fatal source error.
pub(crate) fn run<S: Source>(shared: Arc<Shared<S>>) {
    loop {
        let prebuffer_offset = {
            let mut core = shared.core.lock().unwrap();
            loop {
                if core.closing || core.error.is_some() {
                    return;
                }
                if core.prebuffer_offset >= shared.size {
                    if !core.buffered_eos {
                        debug!(shared.logger, "prebuffer reached end of stream";
                            "prebuffer_offset" => core.prebuffer_offset);
                    }
                    core.buffered_eos = true;
                    shared.fill_cv.notify_all();
                    core = shared.rewind_cv.wait(core).unwrap();
                    continue;
                }
                break core.prebuffer_offset;
            }
        };

        match fill_block(&shared, prebuffer_offset) {
            Ok(()) => continue,
            Err(WorkerStop::Rewind) => continue,
            Err(WorkerStop::Exit) => return,
        }
    }
}

/// Prepare and fill the block that owns `start_offset`, per the
/// reconciliation table and fill loop in spec.md §4.3.
fn fill_block<S: Source>(shared: &Arc<Shared<S>>, start_offset: u64) -> Result<(), WorkerStop> {
    let block_size = shared.block_size as u64;
    let index = (start_offset / block_size) as usize;
    let mut offset_in_block = (start_offset % block_size) as usize;

    let cell = {
        let mut core = shared.core.lock().unwrap();
        if core.closing || core.error.is_some() {
            return Err(WorkerStop::Exit);
        }
        // `start_offset` was read under the offset lock in `run`, but
        // the lock was released before we got back here: re-validate
        // that a seek hasn't moved the frontier in the gap, or `index`/
        // `offset_in_block` (computed from the stale value) would
        // reconcile and fill the wrong block (spec.md invariant 1).
        if core.prebuffer_offset != start_offset {
            return Err(WorkerStop::Rewind);
        }
        core.blocks.ensure(index)
    };

    {
        let mut block = cell.lock().unwrap();
        block.reconcile(offset_in_block);
        // Reconciliation always leaves the resume point at `end`: a
        // rewind-into or drop-tail both set `end := offset`, and the
        // leave-as-is branch already resumes at the existing `end`.
        offset_in_block = block.end();
    }

    let capacity = cell.lock().unwrap().capacity();

    while offset_in_block < capacity {
        let f0 = shared.core.lock().unwrap().prebuffer_offset;
        let chunk_len = shared.read_chunk.min(capacity - offset_in_block);
        let mut scratch = vec![0u8; chunk_len];

        let bytes_read = {
            let mut source = shared.source.lock().unwrap();
            let tell = source.tell().map_err(|e| {
                mark_fatal(shared, e.to_string());
                WorkerStop::Exit
            })?;
            if tell != f0 {
                // A seek happened between our snapshot of f0 and now.
                None
            } else {
                let n = source.read(&mut scratch[..]).map_err(|e| {
                    mark_fatal(shared, e.to_string());
                    WorkerStop::Exit
                })?;
                Some(n)
            }
        };

        let bytes_read = match bytes_read {
            None => return Err(WorkerStop::Rewind),
            Some(n) => n,
        };

        if bytes_read == 0 {
            mark_fatal(
                shared,
                format!("source read returned 0 bytes at offset {} before reaching size", f0),
            );
            return Err(WorkerStop::Exit);
        }

        {
            let mut core = shared.core.lock().unwrap();
            if core.closing {
                return Err(WorkerStop::Exit);
            }
            if core.prebuffer_offset != f0 {
                warn!(shared.logger, "rewind detected mid-fill";
                    "expected" => f0, "actual" => core.prebuffer_offset);
                return Err(WorkerStop::Rewind);
            }
            {
                let mut block = cell.lock().unwrap();
                block.commit(&scratch[..bytes_read]);
            }
            core.prebuffer_offset = f0 + bytes_read as u64;
            offset_in_block += bytes_read;
            shared.fill_cv.notify_all();
        }
    }
    Ok(())
}
