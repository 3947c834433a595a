use crate::raw::RawRwSpin;
use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

/// A reader/writer spin lock.
///
/// Any number of readers may hold the lock at once; a writer waits until
/// the last reader leaves and then excludes everyone else. Use it for data
/// that is read on hot paths and written rarely.
///
/// Like [`SpinLock`](crate::SpinLock), the lock is not reentrant: taking the
/// write lock while holding a read lock on the same instance never returns.
pub struct RwSpinLock<T> {
    raw: RawRwSpin,
    inner: UnsafeCell<T>,
}

// Safety: readers share &T across threads (T: Sync), the writer moves
// exclusive access between threads (T: Send).
unsafe impl<T: Send + Sync> Sync for RwSpinLock<T> {}
unsafe impl<T: Send> Send for RwSpinLock<T> {}

impl<T> RwSpinLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            raw: RawRwSpin::new(),
            inner: UnsafeCell::new(inner),
        }
    }

    #[inline]
    pub fn read(&self) -> RwSpinReadGuard<'_, T> {
        self.raw.read();
        RwSpinReadGuard { lock: self }
    }

    #[inline]
    pub fn try_read(&self) -> Option<RwSpinReadGuard<'_, T>> {
        self.raw.try_read().then(|| RwSpinReadGuard { lock: self })
    }

    #[inline]
    pub fn write(&self) -> RwSpinWriteGuard<'_, T> {
        self.raw.write();
        RwSpinWriteGuard { lock: self }
    }

    #[inline]
    pub fn try_write(&self) -> Option<RwSpinWriteGuard<'_, T>> {
        self.raw.try_write().then(|| RwSpinWriteGuard { lock: self })
    }

    #[inline]
    pub fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let g = self.read();
        f(&g)
    }

    #[inline]
    pub fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.write();
        f(&mut g)
    }

    /// Number of readers inside the lock right now (snapshot).
    #[inline]
    pub fn reader_count(&self) -> usize {
        self.raw.readers()
    }

    #[inline]
    pub fn is_write_locked(&self) -> bool {
        self.raw.is_write_locked()
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T: Default> Default for RwSpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for RwSpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwSpinLock")
            .field("readers", &self.reader_count())
            .field("write_locked", &self.is_write_locked())
            .finish_non_exhaustive()
    }
}

pub struct RwSpinReadGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for RwSpinReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> Drop for RwSpinReadGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { self.lock.raw.release_read() }
    }
}

pub struct RwSpinWriteGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for RwSpinWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for RwSpinWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for RwSpinWriteGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { self.lock.raw.release_write() }
    }
}
