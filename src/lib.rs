// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustux C11 Threads (libthrd)
//!
//! This library provides the C11 threading interface on top of kernel
//! thread services:
//! - Plain and recursive mutexes
//! - Condition variables with absolute-deadline waits
//! - One-time initialization
//! - Thread creation, join, exit and sleep
//! - A `<threads.h>` compatible C ABI (see [`ffi`])
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use thrd::{thread, Mutex};
//!
//! let mutex = Arc::new(Mutex::plain());
//! let worker = {
//!     let mutex = mutex.clone();
//!     thread::spawn(move || {
//!         let _guard = mutex.guard();
//!         1
//!     })
//!     .unwrap()
//! };
//!
//! assert_eq!(worker.join().unwrap(), 1);
//! ```

pub mod condvar;
pub mod error;
pub mod ffi;
pub mod mutex;
pub mod once;
pub mod sys;
pub mod thread;
pub mod time;

// Re-export commonly used types
pub use condvar::Condvar;
pub use error::{Error, Result, Status};
pub use mutex::{Mutex, MutexGuard, MutexKind};
pub use once::{OnceFlag, OnceState};
pub use thread::{Thread, Threads};
pub use time::Timespec;
