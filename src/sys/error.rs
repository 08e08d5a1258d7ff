// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel result codes

use thiserror::Error;

/// Result type for kernel calls
pub type SvcResult<T> = core::result::Result<T, SvcError>;

/// Failure reported by a kernel call
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SvcError {
    /// Handle does not name a live object of the right type
    #[error("invalid handle")]
    InvalidHandle = 1,

    /// Object is not in a state that allows the operation
    #[error("invalid state")]
    InvalidState = 2,

    /// Priority outside the accepted range
    #[error("invalid priority")]
    InvalidPriority = 3,

    /// Preferred core is not usable by the process
    #[error("invalid core id")]
    InvalidCoreId = 4,

    /// Affinity mask is empty or outside the process mask
    #[error("invalid combination")]
    InvalidCombination = 5,

    /// Stack size is zero or too large
    #[error("invalid size")]
    InvalidSize = 6,

    /// Kernel ran out of objects or the host refused a new thread
    #[error("out of resource")]
    OutOfResource = 7,

    /// Information is not available
    #[error("not found")]
    NotFound = 8,
}

impl SvcError {
    /// Get the raw result code
    pub fn into_raw(self) -> u32 {
        self as u32
    }
}
