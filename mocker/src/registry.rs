//! Process-wide mock and redirection tables.
//!
//! Two mappings live under one mutex: the mocks of each test, keyed by target, and
//! one redirection record per patched target. A record's `ref_count` equals the
//! number of live mocks on its target across all tests; the redirection is
//! installed when the count leaves zero and reverted when it returns to zero.
//!
//! Lock order is registry, then mock state. Neither lock is held while user code
//! or the redirector's replacements run.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use log::{debug, info, warn};
use mocker_intercept::{Interceptor, ReplaceToken, Replacement};

use crate::config::{self, Config};
use crate::error::{MockError, Result};
use crate::identity::{TargetId, TargetIdentity, TestId};
use crate::playlist::Playlist;
use crate::probe::{CallerContext, ScopeProbe, StackProbe};
use crate::redirector::Redirector;
use crate::signature::{Signature, Target};

/// Script and call history of one mock. Shared between the `Mock` handle and the
/// registry.
pub struct MockState {
    pub(crate) target: TargetId,
    pub(crate) owner: TestId,
    pub(crate) playlist: Playlist,
    pub(crate) recording: bool,
    pub(crate) recorded: Vec<Box<dyn Any + Send>>,
    pub(crate) calls: usize,
    pub(crate) live: bool,
}

impl MockState {
    fn new(target: TargetId, owner: TestId) -> Self {
        Self {
            target,
            owner,
            playlist: Playlist::default(),
            recording: false,
            recorded: Vec::new(),
            calls: 0,
            live: true,
        }
    }
}

impl fmt::Debug for MockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockState")
            .field("target", &self.target)
            .field("owner", &self.owner)
            .field("calls", &self.calls)
            .field("recording", &self.recording)
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}

pub(crate) type SharedMock = Arc<Mutex<MockState>>;

pub(crate) fn lock_mock(mock: &SharedMock) -> MutexGuard<'_, MockState> {
    mock.lock().unwrap_or_else(|e| e.into_inner())
}

struct RedirectionRecord {
    entry: Arc<str>,
    installed: Replacement,
    signature: Signature,
    token: ReplaceToken,
    ref_count: usize,
}

#[derive(Default)]
struct RegistryState {
    mocks_by_test: HashMap<TestId, HashMap<TargetId, SharedMock>>,
    redirections: HashMap<TargetId, RedirectionRecord>,
}

pub struct Registry {
    state: Mutex<RegistryState>,
    redirector: &'static dyn Redirector,
    probe: Box<dyn ScopeProbe>,
    config: Config,
}

impl Registry {
    pub(crate) fn new(redirector: &'static dyn Redirector, probe: Box<dyn ScopeProbe>, config: Config) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            redirector,
            probe,
            config,
        }
    }

    /// The registry used by the public API. The first call initializes logging and
    /// reads the configuration from the environment.
    pub(crate) fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            config::init_logging();
            let config = Config::from_env();
            debug!("mocker registry initialized: {:?}", config);
            let probe = StackProbe::new(config.test_prefix.clone());
            Registry::new(Interceptor::obtain(), Box::new(probe), config)
        })
    }

    #[cfg(test)]
    pub(crate) fn leak(
        redirector: &'static dyn Redirector,
        probe: impl ScopeProbe + 'static,
        config: Config,
    ) -> &'static Registry {
        Box::leak(Box::new(Registry::new(redirector, Box::new(probe), config)))
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn redirector(&self) -> &'static dyn Redirector {
        self.redirector
    }

    /// Log `err` and apply the configured fatal policy.
    pub(crate) fn fatal(&self, err: MockError) -> ! {
        self.config.fatal(err)
    }

    pub(crate) fn scope(&self, entry: Option<&str>) -> CallerContext {
        self.probe.inspect(entry)
    }

    /// The test running on this thread. `operation` labels the error.
    pub(crate) fn current_test(&self, operation: &str) -> Result<TestId> {
        self.scope(None)
            .test
            .ok_or_else(|| MockError::UnknownScope(operation.to_string()))
    }

    /// Register `test` as a scope that creates mocks.
    pub(crate) fn open_test(&self, test: &TestId) {
        self.lock().mocks_by_test.entry(test.clone()).or_default();
    }

    pub(crate) fn lookup(&self, test: &TestId, target: &TargetId) -> Option<SharedMock> {
        self.lock()
            .mocks_by_test
            .get(test)
            .and_then(|mocks| mocks.get(target))
            .cloned()
    }

    /// Register a new mock of `identity` for `test`, installing the redirection if
    /// this is the first live mock of the target.
    pub(crate) fn attach<T: Target>(&'static self, test: &TestId, identity: &TargetIdentity) -> Result<SharedMock> {
        let signature = T::signature();
        let mut guard = self.lock();
        let state = &mut *guard;

        let mocks = state.mocks_by_test.entry(test.clone()).or_default();
        if mocks.contains_key(&identity.id) {
            return Err(MockError::DuplicatePatch {
                test: test.to_string(),
                target: identity.id.to_string(),
            });
        }

        match state.redirections.get_mut(&identity.id) {
            Some(record) => {
                if record.signature != signature {
                    return Err(MockError::SignatureMismatch {
                        target: identity.id.to_string(),
                        installed: record.signature.to_string(),
                        requested: signature.to_string(),
                    });
                }
                record.ref_count += 1;
                debug!(
                    "Reusing replacement of {} ({} holders, refcount {})",
                    record.entry,
                    Arc::strong_count(&record.installed),
                    record.ref_count
                );
            }
            None => {
                let installed = T::synthesize(identity.id.clone(), Arc::clone(&identity.entry), self);
                let token = self.redirector.install(&identity.entry, Arc::clone(&installed))?;
                debug!("Patched {} as {} ({:?})", identity.entry, identity.id, identity.kind);
                state.redirections.insert(
                    identity.id.clone(),
                    RedirectionRecord {
                        entry: Arc::clone(&identity.entry),
                        installed,
                        signature,
                        token,
                        ref_count: 1,
                    },
                );
            }
        }

        let mock = Arc::new(Mutex::new(MockState::new(identity.id.clone(), test.clone())));
        mocks.insert(identity.id.clone(), Arc::clone(&mock));
        Ok(mock)
    }

    /// Verify the script of `mock` and release its redirection.
    ///
    /// The redirection is released even when verification fails, so the error is
    /// reported with the original function already restored.
    pub(crate) fn unpatch(&self, mock: &SharedMock) -> Result<()> {
        let (target, owner, verdict) = {
            let mut state = lock_mock(mock);
            if !state.live {
                return Err(MockError::NotLive(state.target.to_string()));
            }
            state.live = false;
            let verdict = state.playlist.verify().map_err(|e| e.for_target(&state.target));
            (state.target.clone(), state.owner.clone(), verdict)
        };

        self.detach(&owner, &target, mock)?;
        if verdict.is_ok() {
            debug!("Unpatched {} in {}", target, owner);
        }
        verdict
    }

    fn detach(&self, owner: &TestId, target: &TargetId, mock: &SharedMock) -> Result<()> {
        let mut state = self.lock();

        let removed = match state.mocks_by_test.get_mut(owner) {
            Some(mocks) if mocks.get(target).is_some_and(|m| Arc::ptr_eq(m, mock)) => mocks.remove(target),
            _ => None,
        };
        if removed.is_none() {
            return Err(MockError::NotLive(target.to_string()));
        }

        let remaining = match state.redirections.get_mut(target) {
            Some(record) => {
                record.ref_count -= 1;
                record.ref_count
            }
            None => return Err(MockError::NotLive(target.to_string())),
        };
        if remaining > 0 {
            debug!("Released {} (refcount {})", target, remaining);
            return Ok(());
        }

        // The record stays while the replacement is installed, so a failed revert
        // leaves it for the next attach to reuse.
        if let Some(record) = state.redirections.get(target) {
            self.redirector.revert(&record.token)?;
            debug!("Restored {}", record.entry);
            state.redirections.remove(target);
        }
        Ok(())
    }

    /// Detach a mock whose handle went away while it was still live. The script is
    /// not verified.
    pub(crate) fn release(&self, mock: &SharedMock) {
        let (target, owner) = {
            let mut state = lock_mock(mock);
            if !state.live {
                return;
            }
            state.live = false;
            (state.target.clone(), state.owner.clone())
        };

        warn!("Mock of {} in {} dropped while patched", target, owner);
        if let Err(e) = self.detach(&owner, &target, mock) {
            warn!("Releasing {} failed: {}", target, e);
        }
    }

    /// Unpatch every mock of the current test. Returns how many were removed.
    ///
    /// All mocks are released even if some fail verification; the first failure is
    /// returned.
    pub(crate) fn unpatch_all(&self) -> Result<usize> {
        let test = self.current_test("unpatch_all")?;

        let mut mocks: Vec<(TargetId, SharedMock)> = {
            let state = self.lock();
            let Some(mocks) = state.mocks_by_test.get(&test) else {
                return Err(MockError::NoMocks(test.to_string()));
            };
            mocks.iter().map(|(t, m)| (t.clone(), Arc::clone(m))).collect()
        };
        mocks.sort_by(|a, b| a.0.cmp(&b.0));

        info!("Removing all {} mocks from {}", mocks.len(), test);
        let mut first_err = None;
        for (target, mock) in &mocks {
            if let Err(e) = self.unpatch(mock) {
                warn!("Unpatching {} failed: {}", target, e);
                first_err.get_or_insert(e);
            }
        }

        {
            let mut state = self.lock();
            if state.mocks_by_test.get(&test).is_some_and(HashMap::is_empty) {
                state.mocks_by_test.remove(&test);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(mocks.len()),
        }
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self, target: &TargetId) -> usize {
        self.lock()
            .redirections
            .get(target)
            .map_or(0, |record| record.ref_count)
    }

    #[cfg(test)]
    pub(crate) fn mock_count(&self, test: &TestId) -> Option<usize> {
        self.lock().mocks_by_test.get(test).map(HashMap::len)
    }
}
