// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Error types for libthrd
//!
//! This module defines the error taxonomy of the threading layer and the
//! C11 status codes those errors are reported as through the C ABI.

use core::fmt;
use thiserror::Error;

use crate::sys::SvcError;

/// Status codes returned by the C11 entry points
///
/// These match the `thrd_*` result constants of `<threads.h>`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation completed successfully
    Success = 0,

    /// Resource is held by someone else (try-lock only)
    Busy = 1,

    /// Operation failed
    Error = 2,

    /// Insufficient memory available
    NoMemory = 3,

    /// Timed wait reached its deadline
    TimedOut = 4,
}

impl Status {
    /// Convert a raw status code to a Status
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Status::Success,
            1 => Status::Busy,
            3 => Status::NoMemory,
            4 => Status::TimedOut,
            _ => Status::Error,
        }
    }

    /// Convert to raw status code
    pub fn into_raw(self) -> i32 {
        self as i32
    }

    /// Check if status indicates success
    pub fn is_ok(self) -> bool {
        self == Status::Success
    }

    /// Check if status indicates an error
    pub fn is_err(self) -> bool {
        self != Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "Operation successful"),
            Status::Busy => write!(f, "Resource busy"),
            Status::Error => write!(f, "Operation failed"),
            Status::NoMemory => write!(f, "Insufficient memory"),
            Status::TimedOut => write!(f, "Operation timed out"),
        }
    }
}

impl<T> From<Result<T>> for Status {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(err) => err.status(),
        }
    }
}

/// Result type for libthrd operations
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for libthrd operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Null handle, unknown mutex kind, missing parameter or an
    /// unsupported mutex/condition variable pairing
    #[error("invalid argument")]
    InvalidArgument,

    /// The kernel primitive reported failure
    #[error("kernel operation failed: {0}")]
    OperationFailed(#[from] SvcError),

    /// A thread control record could not be allocated
    #[error("out of memory")]
    OutOfMemory,

    /// A timed wait reached its deadline without being woken
    #[error("timed out")]
    Timeout,

    /// Non-blocking acquisition found the mutex held
    #[error("mutex is held")]
    AcquisitionFailed,
}

impl Error {
    /// Get the C11 status code this error is reported as
    pub fn status(self) -> Status {
        match self {
            Error::InvalidArgument | Error::OperationFailed(_) => Status::Error,
            Error::OutOfMemory => Status::NoMemory,
            Error::Timeout => Status::TimedOut,
            Error::AcquisitionFailed => Status::Busy,
        }
    }

    /// Whether this is a normal outcome rather than a failure
    ///
    /// Timeouts and failed try-locks are expected results that callers
    /// branch on; everything else means the operation did not happen.
    pub fn is_transient(self) -> bool {
        matches!(self, Error::Timeout | Error::AcquisitionFailed)
    }
}
