/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;

/// The capability set the cache requires of whatever it wraps. Modeled
/// as a trait rather than a back-pointer: the cache holds a `Source` by
/// value and never reaches back into the host that constructed it.
///
/// Every method is blocking and synchronous, matching the upstream
/// contract in spec.md §1: a single in-flight `read` or `seek` at a
/// time is the caller's responsibility (the cache serializes these with
/// its own `source_lock`).
pub trait Source: Send {
    /// Read up to `buf.len()` bytes. Returns the number of bytes read;
    /// `Ok(0)` means EOF. A read error should map to `Err`.
    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize>;

    /// Seek to an absolute byte offset and return the resulting
    /// position, which may differ from the request on a non-seekable
    /// or clamped source.
    fn seek(&mut self, pos: u64) -> anyhow::Result<u64>;

    /// The current position, independent of any seek just issued.
    fn tell(&mut self) -> anyhow::Result<u64>;

    /// Total size in bytes, queried once at `Open`.
    fn size(&mut self) -> anyhow::Result<u64>;

    fn can_seek(&self) -> bool;
    fn can_fast_seek(&self) -> bool;
}

/// A `Source` backed by a plain `std::fs::File`, for the demo CLI and
/// file-backed tests.
pub struct FileSource {
    file: File,
    size: u64,
    seek_calls: usize,
}

impl FileSource {
    pub fn open(path: &std::path::Path) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            size,
            seek_calls: 0,
        })
    }

    /// Number of times `seek` has actually been dispatched to the
    /// underlying file. Exposed so the short-forward-seek optimization
    /// (spec.md §4.4 step 2) can be asserted on in tests.
    pub fn seek_call_count(&self) -> usize {
        self.seek_calls
    }
}

impl Source for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn seek(&mut self, pos: u64) -> anyhow::Result<u64> {
        self.seek_calls += 1;
        Ok(self.file.seek(SeekFrom::Start(pos))?)
    }

    fn tell(&mut self) -> anyhow::Result<u64> {
        Ok(self.file.stream_position()?)
    }

    fn size(&mut self) -> anyhow::Result<u64> {
        Ok(self.size)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn can_fast_seek(&self) -> bool {
        true
    }
}

/// A `Source` backed by an in-memory byte vector. Used by the test
/// suite to build deterministic streams (and to inject failures) without
/// touching the filesystem.
pub struct SliceSource {
    data: Vec<u8>,
    offset: u64,
    seek_calls: usize,
    can_seek: bool,
    /// If set, `read` returns this error once `offset` reaches the
    /// given position, simulating a fatal source failure mid-stream.
    fail_at: Option<u64>,
}

impl SliceSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            offset: 0,
            seek_calls: 0,
            can_seek: true,
            fail_at: None,
        }
    }

    pub fn with_fail_at(mut self, pos: u64) -> Self {
        self.fail_at = Some(pos);
        self
    }

    pub fn non_seekable(mut self) -> Self {
        self.can_seek = false;
        self
    }

    pub fn seek_call_count(&self) -> usize {
        self.seek_calls
    }
}

impl Source for SliceSource {
    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        if let Some(fail_at) = self.fail_at {
            if self.offset >= fail_at {
                anyhow::bail!("injected source read failure at {}", self.offset);
            }
        }
        let remaining = self.data.len() as u64 - self.offset;
        let mut to_copy = buf.len() as u64;
        if let Some(fail_at) = self.fail_at {
            // Don't let a single read straddle the failure point; the
            // next call will hit the bail above.
            to_copy = to_copy.min(fail_at.saturating_sub(self.offset));
        }
        to_copy = to_copy.min(remaining);
        let start = self.offset as usize;
        let end = start + to_copy as usize;
        buf[..to_copy as usize].copy_from_slice(&self.data[start..end]);
        self.offset += to_copy;
        Ok(to_copy as usize)
    }

    fn seek(&mut self, pos: u64) -> anyhow::Result<u64> {
        if !self.can_seek {
            anyhow::bail!("seek not supported");
        }
        self.seek_calls += 1;
        self.offset = pos.min(self.data.len() as u64);
        Ok(self.offset)
    }

    fn tell(&mut self) -> anyhow::Result<u64> {
        Ok(self.offset)
    }

    fn size(&mut self) -> anyhow::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn can_seek(&self) -> bool {
        self.can_seek
    }

    fn can_fast_seek(&self) -> bool {
        self.can_seek
    }
}
