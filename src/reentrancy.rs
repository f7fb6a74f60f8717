//! Debug-only reentrancy guard.
//!
//! Element `PartialEq` code runs while a cache's table lock is held.
//! Entering the same cache again from there would deadlock the mutex, so
//! in debug builds each locked section registers itself in a thread-local
//! stack and re-entry panics instead. In release builds this compiles to
//! a zero-cost no-op. Entry from other threads is unaffected; blocking on
//! the mutex is the correct behavior there.

#[cfg(debug_assertions)]
use core::cell::RefCell;
use core::marker::PhantomData;

#[cfg(debug_assertions)]
std::thread_local! {
    static ACTIVE: RefCell<Vec<usize>> = RefCell::new(Vec::new());
}

/// Per-instance reentrancy tracker. Embed this next to the guarded lock
/// and wrap entry points with `let _g = self.reentrancy.enter();`.
#[derive(Debug)]
pub(crate) struct DebugReentrancy {
    // Heap anchor so each instance has a distinct, stable address to key
    // the thread-local stack by.
    #[cfg(debug_assertions)]
    anchor: Box<u8>,
}

impl DebugReentrancy {
    pub fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            anchor: Box::new(0),
        }
    }

    /// Enter a guarded section. In debug builds, panics if this thread is
    /// already inside one for the same instance.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let key = &*self.anchor as *const u8 as usize;
            ACTIVE.with(|active| {
                let mut active = active.borrow_mut();
                assert!(
                    !active.contains(&key),
                    "cache reentered through a Hash or PartialEq impl"
                );
                active.push(key);
            });
            return ReentrancyGuard {
                key,
                _lt: PhantomData,
            };
        }

        #[cfg(not(debug_assertions))]
        {
            return ReentrancyGuard { _lt: PhantomData };
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugReentrancy::enter`.
pub(crate) struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    key: usize,
    _lt: PhantomData<&'a ()>,
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        ACTIVE.with(|active| {
            let top = active.borrow_mut().pop();
            debug_assert_eq!(top, Some(self.key));
        });
    }
}
