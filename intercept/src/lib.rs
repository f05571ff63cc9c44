//! mocker-intercept: redirectable function entries for the mocker test engine.
//!
//! Functions declared through [`patchable!`] check the process-wide [`Interceptor`]
//! on entry and forward to an installed replacement when one is present.

pub mod interceptor;
pub mod module;
pub mod types;

mod macros;

// Re-exports for convenience (flattened imports)
pub use interceptor::suppress::{call_original, SuppressGuard};
pub use interceptor::Interceptor;
pub use module::resolve_symbol_by_path;
pub use types::{HookError, ReplaceToken, Replacement, SymbolInfo};

/// Process-global lock for tests that install replacements.
///
/// The replacement table is shared by every test in the binary, so tests that
/// replace the same entry must not overlap.
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
