//! Interrupt masking shared by the capture interrupt and the main loop.
//!
//! The pool and the queues are the only state touched from both contexts.
//! Each mutation runs while a [`Guard`] is alive; on the board the guard
//! disables interrupts (cortex-m single core critical section), on the host
//! it takes the `critical-section` std lock.
use core::marker::PhantomData;

use critical_section::{CriticalSection, RestoreState};

/// Scoped critical section. Interrupts are restored when the guard drops,
/// including on early return.
pub struct Guard {
    restore: RestoreState,
    // Must be released on the context that acquired it.
    _not_send: PhantomData<*mut ()>,
}

impl Guard {
    #[inline]
    pub fn acquire() -> Self {
        // SAFETY: the matching release happens in Drop, and the guard cannot
        // leave this context, so acquire/release stay properly nested.
        let restore = unsafe { critical_section::acquire() };
        Guard {
            restore,
            _not_send: PhantomData,
        }
    }

    /// Token for `critical_section::Mutex::borrow`, valid while the guard lives.
    #[inline]
    pub fn token(&self) -> CriticalSection<'_> {
        // SAFETY: the critical section is held for the lifetime of `self`.
        unsafe { CriticalSection::new() }
    }
}

impl Drop for Guard {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: `restore` came from the acquire in `Guard::acquire`.
        unsafe { critical_section::release(self.restore) }
    }
}

/// Run `f` with interrupts masked.
#[inline]
pub fn free<R>(f: impl FnOnce(CriticalSection<'_>) -> R) -> R {
    let guard = Guard::acquire();
    f(guard.token())
}
