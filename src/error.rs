/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;

/// The three-valued return code exposed across the `Control` boundary:
/// a generic failure never distinguishes itself from an unsupported
/// query to the host, but internally we keep the distinction so tests
/// can assert on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    Success,
    GenericError,
    Unsupported,
}

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The source returned zero or a negative byte count before EOS was
    /// known to have been reached.
    #[error("source read failed at offset {offset}: {reason}")]
    SourceRead { offset: u64, reason: String },

    /// A `seek` either failed outright or returned a position that does
    /// not satisfy the request.
    #[error("source seek to {target} failed: {reason}")]
    SourceSeek { target: u64, reason: String },

    /// A block or scratch buffer allocation failed.
    #[error("allocation failure: {0}")]
    AllocFailure(String),

    /// A `Control` query was not recognised, or a `Seek` was attempted
    /// on a non-seekable source.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// `Close` is in progress or has completed; further operations are
    /// rejected.
    #[error("cache is closing or closed")]
    Cancelled,

    /// `Open` failed one of its preconditions (already wrapped,
    /// `membuf-enable` disabled, non-positive source size).
    #[error("open failed: {0}")]
    OpenFailed(&'static str),
}

impl CacheError {
    pub fn status(&self) -> ControlStatus {
        match self {
            CacheError::Unsupported(_) => ControlStatus::Unsupported,
            _ => ControlStatus::GenericError,
        }
    }
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlStatus::Success => write!(f, "success"),
            ControlStatus::GenericError => write!(f, "error"),
            ControlStatus::Unsupported => write!(f, "unsupported"),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
