//! Per-thread redirect suppression.

use std::cell::Cell;

// While set, entry checks on this thread ignore installed replacements and run
// the original body.
thread_local! {
    static SUPPRESSED: Cell<bool> = const { Cell::new(false) };
}

pub fn is_suppressed() -> bool {
    SUPPRESSED.with(|s| s.get())
}

/// RAII guard that suppresses redirection for its lifetime.
/// Saves the current state and sets it; restores on drop, so guards nest.
pub struct SuppressGuard(bool);

impl SuppressGuard {
    pub fn new() -> Self {
        let was = SUPPRESSED.with(|s| s.replace(true));
        Self(was)
    }
}

impl Default for SuppressGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        SUPPRESSED.with(|s| s.set(self.0));
    }
}

/// Run `f` with redirection suppressed on the current thread.
///
/// Every patchable entry reached from `f` on this thread runs its original body,
/// including entries called transitively.
pub fn call_original<R>(f: impl FnOnce() -> R) -> R {
    let _guard = SuppressGuard::new();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_previous_state() {
        assert!(!is_suppressed());
        {
            let _outer = SuppressGuard::new();
            assert!(is_suppressed());
            {
                let _inner = SuppressGuard::new();
                assert!(is_suppressed());
            }
            assert!(is_suppressed());
        }
        assert!(!is_suppressed());
    }

    #[test]
    fn test_suppression_is_thread_local() {
        let _guard = SuppressGuard::new();
        let other = std::thread::spawn(is_suppressed).join().unwrap();
        assert!(!other);
    }
}
