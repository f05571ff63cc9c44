use crate::types::{HookError, ReplaceToken, Replacement};
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

pub mod suppress;

struct ReplacementEntry {
    replacement: Replacement,
    generation: u64,
}

/// Process-wide table of redirected entries.
///
/// An entry is any function declared through [`patchable!`](crate::patchable). Its
/// generated entry check asks the interceptor for a replacement keyed by the entry
/// symbol and, when one is installed, forwards the call instead of running the body.
pub struct Interceptor {
    replace_map: Mutex<HashMap<Arc<str>, ReplacementEntry>>,
    // Mirrors replace_map.len() so entry checks skip the lock when nothing is replaced.
    active: AtomicUsize,
    generation: AtomicU64,
}

impl Interceptor {
    pub fn obtain() -> &'static Interceptor {
        static INSTANCE: OnceLock<Interceptor> = OnceLock::new();
        INSTANCE.get_or_init(|| Interceptor {
            replace_map: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        })
    }

    fn map(&self) -> MutexGuard<'_, HashMap<Arc<str>, ReplacementEntry>> {
        self.replace_map.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install `replacement` over the entry named `symbol`.
    ///
    /// Subsequent calls of the entry run the replacement until the returned token
    /// is passed to [`revert`](Self::revert).
    pub fn replace(&self, symbol: &str, replacement: Replacement) -> Result<ReplaceToken, HookError> {
        let mut map = self.map();
        if map.contains_key(symbol) {
            return Err(HookError::AlreadyAttached(symbol.to_string()));
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let symbol: Arc<str> = Arc::from(symbol);
        map.insert(
            Arc::clone(&symbol),
            ReplacementEntry {
                replacement,
                generation,
            },
        );
        self.active.store(map.len(), Ordering::Release);

        debug!("Replaced {} (generation {})", symbol, generation);
        Ok(ReplaceToken { symbol, generation })
    }

    pub fn revert(&self, token: &ReplaceToken) -> Result<(), HookError> {
        let mut map = self.map();
        match map.get(&*token.symbol) {
            None => return Err(HookError::NotAttached(token.symbol.to_string())),
            Some(entry) if entry.generation != token.generation => {
                return Err(HookError::StaleToken(token.symbol.to_string()));
            }
            Some(_) => {}
        }

        map.remove(&*token.symbol);
        self.active.store(map.len(), Ordering::Release);

        debug!("Reverted {} (generation {})", token.symbol, token.generation);
        Ok(())
    }

    /// Drop every installed replacement. Returns how many were removed.
    pub fn revert_all(&self) -> usize {
        let mut map = self.map();
        let removed = map.len();
        map.clear();
        self.active.store(0, Ordering::Release);
        if removed > 0 {
            debug!("Reverted all {} replacements", removed);
        }
        removed
    }

    pub fn is_replaced(&self, symbol: &str) -> bool {
        self.active.load(Ordering::Acquire) != 0 && self.map().contains_key(symbol)
    }

    /// Look up the replacement installed over `symbol`, typed as `F`.
    ///
    /// Returns `None` when the entry is not replaced or redirection is suppressed on
    /// the current thread. The map lock is released before returning, so the caller
    /// may invoke the replacement without holding it.
    ///
    /// # Panics
    /// When a replacement is installed but was built for another signature.
    pub fn replacement<F>(&self, symbol: &str) -> Option<Arc<Box<F>>>
    where
        F: ?Sized + Send + Sync + 'static,
    {
        if self.active.load(Ordering::Acquire) == 0 || suppress::is_suppressed() {
            return None;
        }

        let installed = {
            let map = self.map();
            Arc::clone(&map.get(symbol)?.replacement)
        };

        match installed.downcast::<Box<F>>() {
            Ok(replacement) => Some(replacement),
            Err(_) => panic!("{}", HookError::WrongSignature(symbol.to_string())),
        }
    }
}
