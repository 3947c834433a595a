//! # Kernel synchronization primitives
//!
//! Busy-waiting locks for short critical sections in code that cannot sleep:
//!
//! - [`SpinLock`] grants exclusive access to the protected value.
//! - [`RwSpinLock`] admits any number of concurrent readers or one writer.
//! - [`SyncOnceCell`] publishes a value exactly once (process-wide singletons).
//!
//! None of the locks are reentrant: acquiring a lock that the current thread
//! already holds spins forever.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod raw;
mod rw_spin_lock;
mod spin_lock;
mod sync_once_cell;

pub use rw_spin_lock::{RwSpinLock, RwSpinReadGuard, RwSpinWriteGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
