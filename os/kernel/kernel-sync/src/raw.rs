//! Raw lock words shared by the typed locks.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Exclusive lock word.
///
/// * `false`: unlocked
/// * `true`: locked
pub struct RawSpin {
    held: AtomicBool,
}

impl RawSpin {
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Test-and-test-and-set: spin on a plain load, retry the CAS once the
    /// word reads as free.
    #[inline]
    pub fn acquire(&self) {
        while !self.try_acquire() {
            while self.is_held() {
                spin_loop();
            }
        }
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// # Safety
    /// The caller must currently hold the lock.
    #[inline]
    pub unsafe fn release(&self) {
        self.held.store(false, Ordering::Release);
    }
}

/// Bit 0 of [`RawRwSpin`] marks an active writer.
const WRITER: usize = 1;

/// Each reader adds this to the state word.
const READER: usize = 2;

/// Reader/writer lock word.
///
/// Bit 0 is the writer flag, the remaining bits count active readers.
/// Writers are not prioritized over incoming readers.
pub struct RawRwSpin {
    state: AtomicUsize,
}

impl RawRwSpin {
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn try_read(&self) -> bool {
        let s = self.state.load(Ordering::Relaxed);
        if s & WRITER != 0 {
            return false;
        }
        let Some(next) = s.checked_add(READER) else {
            return false;
        };
        self.state
            .compare_exchange_weak(s, next, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn read(&self) {
        while !self.try_read() {
            spin_loop();
        }
    }

    #[inline]
    pub fn try_write(&self) -> bool {
        self.state
            .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn write(&self) {
        while !self.try_write() {
            while self.state.load(Ordering::Relaxed) != 0 {
                spin_loop();
            }
        }
    }

    /// Number of readers currently inside the lock.
    #[inline]
    pub fn readers(&self) -> usize {
        self.state.load(Ordering::Relaxed) / READER
    }

    #[inline]
    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & WRITER != 0
    }

    /// # Safety
    /// The caller must hold a read lock.
    #[inline]
    pub unsafe fn release_read(&self) {
        self.state.fetch_sub(READER, Ordering::Release);
    }

    /// # Safety
    /// The caller must hold the write lock.
    #[inline]
    pub unsafe fn release_write(&self) {
        self.state.fetch_and(!WRITER, Ordering::Release);
    }
}
