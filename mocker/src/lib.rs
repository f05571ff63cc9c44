//! mocker: runtime function mocking for unit tests.
//!
//! A test replaces a function declared through [`patchable!`] with a scripted
//! stand-in, checks how it was called, and restores the original:
//!
//! ```ignore
//! mocker::patchable! {
//!     pub fn add(a: i64, b: i64) -> i64 {
//!         a + b
//!     }
//! }
//!
//! #[test]
//! fn test_add_is_scripted() {
//!     let mut m = mocker::new_mock().patch(add);
//!     m.times(2).returns(0);
//!     m.times(1).returns(1);
//!
//!     assert_eq!(add(1, 2), 0);
//!     assert_eq!(add(1, 2), 0);
//!     assert_eq!(add(1, 4), 1);
//!
//!     m.unpatch();
//!     assert_eq!(add(1, 2), 3);
//! }
//! ```
//!
//! Mocks are scoped to the test function that created them, found by walking the
//! call stack for a frame whose name starts with `test` (see [`config`]). A target
//! patched by one test stays redirected for the whole process until its last mock
//! is unpatched, so tests that patch the same target must not run concurrently.

pub mod config;
pub mod error;
pub mod identity;
pub mod probe;
pub mod redirector;
pub mod signature;

mod dispatch;
mod mock;
mod playlist;
mod registry;

pub use error::{MockError, Result};
pub use identity::{TargetId, TargetKind, TestId};
pub use mock::{Mock, Patched, Unpatched};
pub use mocker_intercept::{patchable, HookError};
pub use signature::{FnTarget, IntoMethodTarget, IntoTarget, MethodTarget, Signature, Target};

use registry::Registry;

/// Create an unpatched mock bound to the current test.
pub fn new_mock() -> Mock {
    Mock::new()
}

/// Unpatch every mock the current test created.
///
/// Every mock is released even when one fails verification; the first failure is
/// then handled by the configured fatal policy.
pub fn unpatch_all() {
    let registry = Registry::global();
    if let Err(e) = registry.unpatch_all() {
        registry.fatal(e);
    }
}

/// Like [`unpatch_all`], returning the number of mocks removed or the first error.
pub fn try_unpatch_all() -> Result<usize> {
    Registry::global().unpatch_all()
}

/// Run `f` with every patched function on this thread executing its original body.
///
/// Applies to everything `f` calls, directly or not.
pub fn call_original<R>(f: impl FnOnce() -> R) -> R {
    mocker_intercept::call_original(f)
}

#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
