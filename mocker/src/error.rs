use mocker_intercept::HookError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockError {
    #[error("cannot find the enclosing test of {0}")]
    UnknownScope(String),

    #[error("{target} is already patched in {test}; reuse the existing mock")]
    DuplicatePatch { test: String, target: String },

    #[error("{0}: returns/do_and_return called before times/any_times")]
    NoOutcome(String),

    #[error("{0}: any_times must be the only outcome")]
    AnyTimesConflict(String),

    #[error("unexpected call to {0}")]
    UnexpectedCall(String),

    #[error("{target}: outcome #{index} has no return value")]
    MissingResponse { target: String, index: usize },

    #[error("{target}: outcome #{index} expected {expected} calls, got {consumed}")]
    UnderCalled {
        target: String,
        index: usize,
        expected: usize,
        consumed: usize,
    },

    #[error("{0} is not patched")]
    NotLive(String),

    #[error("no mocks were created in {0}")]
    NoMocks(String),

    #[error("{0} is not a patchable function item")]
    NotPatchable(String),

    #[error("method not found: expected {expected}, got {found}")]
    MethodNotFound { expected: String, found: String },

    #[error("{target} is installed as `{installed}`, cannot patch it as `{requested}`")]
    SignatureMismatch {
        target: String,
        installed: String,
        requested: String,
    },

    #[error("redirection failed: {0}")]
    Redirect(#[from] HookError),
}

pub type Result<T> = std::result::Result<T, MockError>;
