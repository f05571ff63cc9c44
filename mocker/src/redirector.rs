use mocker_intercept::{HookError, Interceptor, ReplaceToken, Replacement, SymbolInfo};

/// What the mock core needs from the mechanism that diverts a function's entry.
pub trait Redirector: Send + Sync {
    /// Make subsequent calls of `entry` run `replacement`.
    fn install(&self, entry: &str, replacement: Replacement) -> Result<ReplaceToken, HookError>;

    /// Restore the original entry.
    fn revert(&self, token: &ReplaceToken) -> Result<(), HookError>;

    /// Locate a function the caller cannot name by path.
    fn resolve_unexported_by_name(&self, path: &str) -> Result<SymbolInfo, HookError>;
}

impl Redirector for Interceptor {
    fn install(&self, entry: &str, replacement: Replacement) -> Result<ReplaceToken, HookError> {
        self.replace(entry, replacement)
    }

    fn revert(&self, token: &ReplaceToken) -> Result<(), HookError> {
        Interceptor::revert(self, token)
    }

    fn resolve_unexported_by_name(&self, path: &str) -> Result<SymbolInfo, HookError> {
        mocker_intercept::resolve_symbol_by_path(path)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Redirector over the process interceptor that counts operations and keeps
    /// the installed replacements so tests can call them directly.
    #[derive(Default)]
    pub(crate) struct CountingRedirector {
        pub(crate) installs: AtomicUsize,
        pub(crate) reverts: AtomicUsize,
        installed: Mutex<HashMap<String, Replacement>>,
    }

    impl CountingRedirector {
        pub(crate) fn leak() -> &'static CountingRedirector {
            Box::leak(Box::default())
        }

        pub(crate) fn installs(&self) -> usize {
            self.installs.load(Ordering::SeqCst)
        }

        pub(crate) fn reverts(&self) -> usize {
            self.reverts.load(Ordering::SeqCst)
        }

        pub(crate) fn installed(&self, entry: &str) -> Option<Replacement> {
            self.installed.lock().unwrap().get(entry).cloned()
        }
    }

    impl Redirector for CountingRedirector {
        fn install(&self, entry: &str, replacement: Replacement) -> Result<ReplaceToken, HookError> {
            let token = Interceptor::obtain().install(entry, replacement.clone())?;
            self.installs.fetch_add(1, Ordering::SeqCst);
            self.installed
                .lock()
                .unwrap()
                .insert(entry.to_string(), replacement);
            Ok(token)
        }

        fn revert(&self, token: &ReplaceToken) -> Result<(), HookError> {
            Redirector::revert(Interceptor::obtain(), token)?;
            self.reverts.fetch_add(1, Ordering::SeqCst);
            self.installed.lock().unwrap().remove(token.symbol());
            Ok(())
        }

        fn resolve_unexported_by_name(&self, path: &str) -> Result<SymbolInfo, HookError> {
            Interceptor::obtain().resolve_unexported_by_name(path)
        }
    }
}
