//! Non-reentrant mutex shared by the framebuffer and cursor stores.
//!
//! `std::sync::Mutex` deadlocks (or panics) when a thread locks it twice. A
//! snapshot callback that asks for another snapshot of the same store would do
//! exactly that, so each thread keeps a list of the store locks it holds and a
//! second acquisition is refused with [`StoreError::Reentrant`].

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::error::StoreError;

thread_local! {
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

pub(crate) struct StoreLock<T> {
    inner: Mutex<T>,
}

pub(crate) struct StoreGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    key: usize,
}

impl<T> StoreLock<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub(crate) fn lock(&self) -> Result<StoreGuard<'_, T>, StoreError> {
        let key = self as *const Self as usize;
        if HELD.with(|held| held.borrow().contains(&key)) {
            return Err(StoreError::Reentrant);
        }

        // Stores restore their invariants before any code that can panic,
        // so a poisoned lock still guards consistent data.
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        HELD.with(|held| held.borrow_mut().push(key));
        Ok(StoreGuard { guard, key })
    }
}

impl<T> Deref for StoreGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for StoreGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for StoreGuard<'_, T> {
    fn drop(&mut self) {
        let key = self.key;
        // try_with: the thread-local may already be gone during thread exit.
        let _ = HELD.try_with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|k| *k == key) {
                held.swap_remove(pos);
            }
        });
    }
}
