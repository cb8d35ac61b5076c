// Session pool - reusable shells, marker-framed commands and line streaming
// The CLI binary and library consumers both go through `pool::SessionPool`

pub mod activity;
pub mod config;
pub mod execution;
pub mod framing;
pub mod handle;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod sanitize;
pub mod terminal;

// PTY-backed terminals (Unix only for now)
#[cfg(unix)]
pub mod runtime;

use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
