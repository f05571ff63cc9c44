//! Environment-driven settings, read once when the registry initializes.

use log::{error, warn};

use crate::error::MockError;

/// Leaf-name prefix of test functions (`MOCKER_TEST_PREFIX`).
pub const TEST_PREFIX_VAR: &str = "MOCKER_TEST_PREFIX";
/// `panic` or `abort` (`MOCKER_ON_FATAL`).
pub const ON_FATAL_VAR: &str = "MOCKER_ON_FATAL";
/// `env_logger` filter for this crate's output (`MOCKER_LOG`).
pub const LOG_VAR: &str = "MOCKER_LOG";

const DEFAULT_TEST_PREFIX: &str = "test";
const DEFAULT_LOG_FILTER: &str = "warn";

/// What happens after a fatal misuse has been logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalPolicy {
    /// Panic with the error message. The test fails and `#[should_panic]` can observe it.
    #[default]
    Panic,
    /// Abort the whole test process.
    Abort,
}

impl FatalPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "panic" => Some(FatalPolicy::Panic),
            "abort" => Some(FatalPolicy::Abort),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub test_prefix: String,
    pub on_fatal: FatalPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            test_prefix: DEFAULT_TEST_PREFIX.to_string(),
            on_fatal: FatalPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();

        if let Some(prefix) = lookup(TEST_PREFIX_VAR).filter(|p| !p.trim().is_empty()) {
            config.test_prefix = prefix.trim().to_string();
        }

        if let Some(value) = lookup(ON_FATAL_VAR) {
            match FatalPolicy::parse(&value) {
                Some(policy) => config.on_fatal = policy,
                None => warn!("Ignoring {}={:?}, expected panic or abort", ON_FATAL_VAR, value),
            }
        }

        config
    }

    /// Log `err` and apply the fatal policy. Never returns.
    pub(crate) fn fatal(&self, err: MockError) -> ! {
        error!("{}", err);
        match self.on_fatal {
            FatalPolicy::Panic => panic!("{}", err),
            FatalPolicy::Abort => std::process::abort(),
        }
    }
}

/// Route this crate's log output through `env_logger`, filtered by `MOCKER_LOG`.
///
/// Uses `try_init` so an application or test harness that already installed a
/// logger keeps it.
pub(crate) fn init_logging() {
    let env = env_logger::Env::default().filter_or(LOG_VAR, DEFAULT_LOG_FILTER);
    let _ = env_logger::Builder::from_env(env).is_test(true).try_init();
}
