//! Utility macros and functions for the bridge crate.
//!
//! This module provides helper macros and functions that are used internally
//! by the bridge implementation.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// It's useful for validation checks where you want to return early with an error
/// if some condition is not satisfied.
///
/// # Arguments
///
/// * `$predicate` - A boolean expression that should evaluate to true
/// * `$error` - The error value to return if the predicate is false
///
/// # Example
///
/// ```ignore
/// ensure!(is_token(name), ValidationError::invalid_header_name(name));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error.into());
        }
    };
}

pub(crate) use ensure;

/// Locks a mutex, recovering the guard if a previous holder panicked.
///
/// The state guarded in this crate is always left consistent between
/// statements, so a poisoned lock carries no torn data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
