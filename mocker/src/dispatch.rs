//! Per-call dispatch from an installed replacement to the owning mock's script.

use std::any::Any;
use std::sync::Arc;

use log::{error, info};

use crate::error::MockError;
use crate::identity::TargetId;
use crate::playlist::ErasedResponse;
use crate::registry::{lock_mock, Registry};
use crate::signature::Target;

/// One scripted response, typed by the target it was scripted for.
pub(crate) enum Response<T: Target> {
    /// Produces the fixed return value of `returns`/`return_default`.
    Fixed(Arc<dyn Fn() -> T::Output + Send + Sync>),
    /// A `do_and_return` callable, invoked with the intercepted arguments.
    Call(Arc<T::Handler>),
}

impl<T: Target> Response<T> {
    pub(crate) fn erase(self) -> ErasedResponse {
        Arc::new(self)
    }
}

/// Recover the typed response the mock was scripted with.
pub(crate) fn respond<T: Target>(target: &TargetId, response: ErasedResponse) -> Arc<Response<T>> {
    match response.downcast::<Response<T>>() {
        Ok(response) => response,
        Err(_) => panic!(
            "{}: scripted response does not match {}",
            target,
            T::signature()
        ),
    }
}

impl Registry {
    /// Select the response for one intercepted call of `target`.
    ///
    /// `args` is only invoked when the mock records; it returns a by-value copy of
    /// the argument tuple. No lock is held when this returns, so the caller may run
    /// user callables that themselves hit mocks.
    ///
    /// # Panics
    /// When the calling test has no mock for `target` or its script is exhausted.
    pub(crate) fn dispatch(
        &self,
        target: &TargetId,
        entry: &str,
        args: &dyn Fn() -> Box<dyn Any + Send>,
    ) -> ErasedResponse {
        let ctx = self.scope(Some(entry));
        let Some(test) = ctx.test else {
            self.fatal(MockError::UnknownScope(target.to_string()))
        };

        info!(
            "mock {}:{} called from {}",
            test,
            target,
            ctx.call_site.as_deref().unwrap_or("<unknown>")
        );

        // Another test may hold the patch while this one never mocked the target.
        let Some(mock) = self.lookup(&test, target) else {
            panic!("{}", MockError::UnexpectedCall(target.to_string()));
        };

        let selected = {
            let mut state = lock_mock(&mock);
            state.calls += 1;
            if state.recording {
                state.recorded.push(args());
            }
            state.playlist.advance()
        };

        match selected {
            Ok(response) => response,
            Err(e) => {
                let err = e.for_target(target);
                error!("{} in {}", err, test);
                panic!("{}", err);
            }
        }
    }
}
