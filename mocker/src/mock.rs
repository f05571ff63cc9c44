//! The user-facing mock controller.

use std::marker::PhantomData;
use std::sync::{Arc, MutexGuard};

use log::debug;

use crate::dispatch::Response;
use crate::error::{MockError, Result};
use crate::identity::{self, TargetId, TargetIdentity, TestId};
use crate::playlist::{Playlist, PlaylistError};
use crate::registry::{lock_mock, MockState, Registry, SharedMock};
use crate::signature::{IntoMethodTarget, IntoTarget, Signature, Target};

/// Stage of a mock that has not been patched onto a target yet.
pub struct Unpatched;

/// Stage of a mock patched onto the target `T`.
pub struct Patched<T>(PhantomData<fn() -> T>);

mod sealed {
    pub trait Stage {
        type Binding;
    }
}

use sealed::Stage;

pub struct Binding {
    registry: &'static Registry,
    identity: TargetIdentity,
    signature: Signature,
    state: SharedMock,
}

// A patched mock dropped without `unpatch` (a failed assertion unwinding through the
// test) must not leave its target redirected for the rest of the process.
impl Drop for Binding {
    fn drop(&mut self) {
        self.registry.release(&self.state);
    }
}

impl Stage for Unpatched {
    type Binding = ();
}

impl<T: Target> Stage for Patched<T> {
    type Binding = Binding;
}

/// Controller of one patched target.
///
/// Created unpatched by [`Mock::new`] (or [`new_mock`](crate::new_mock)), bound to
/// the test that created it. One of the `patch*` methods redirects a target to the
/// mock; the builder methods then script how calls are answered:
///
/// ```ignore
/// let mut m = Mock::new().patch(add);
/// m.times(2).returns(0);
/// m.times(1).returns(1);
/// assert_eq!(add(1, 2), 0);
/// ```
///
/// Fatal misuse (duplicate patch, unknown test scope, under-call) is logged and then
/// handled by the configured fatal policy. The `try_*` variants return the error
/// instead. Dropping a patched mock that was never unpatched restores its target
/// without checking the script.
pub struct Mock<S: Stage = Unpatched> {
    registry: &'static Registry,
    test: TestId,
    binding: S::Binding,
}

impl Mock<Unpatched> {
    pub fn new() -> Self {
        let registry = Registry::global();
        Self::in_registry(registry).unwrap_or_else(|e| registry.fatal(e))
    }

    pub fn try_new() -> Result<Self> {
        Self::in_registry(Registry::global())
    }

    pub(crate) fn in_registry(registry: &'static Registry) -> Result<Self> {
        let test = registry.current_test("new_mock")?;
        registry.open_test(&test);
        debug!("New mock in {}", test);
        Ok(Self {
            registry,
            test,
            binding: (),
        })
    }

    /// Test scope this mock belongs to.
    pub fn test_id(&self) -> &TestId {
        &self.test
    }

    /// Patch a free function or associated function declared with `patchable!`.
    pub fn patch<M, F: IntoTarget<M>>(self, target: F) -> Mock<Patched<F::Target>> {
        let registry = self.registry;
        self.try_patch(target).unwrap_or_else(|e| registry.fatal(e))
    }

    pub fn try_patch<M, F: IntoTarget<M>>(self, _target: F) -> Result<Mock<Patched<F::Target>>> {
        let identity = identity::function::<F>()?;
        self.bind(identity)
    }

    /// Patch the `&self` method `name` of a type, given as its path (`Counter::unique`).
    pub fn patch_instance<M, F: IntoMethodTarget<M>>(self, method: F, name: &str) -> Mock<Patched<F::Target>> {
        let registry = self.registry;
        self.try_patch_instance(method, name)
            .unwrap_or_else(|e| registry.fatal(e))
    }

    pub fn try_patch_instance<M, F: IntoMethodTarget<M>>(
        self,
        _method: F,
        name: &str,
    ) -> Result<Mock<Patched<F::Target>>> {
        let identity = identity::method::<F, F::Receiver>(name)?;
        self.bind(identity)
    }

    /// Patch the `&self` method `name` of `instance`'s type when it cannot be named
    /// from the test.
    ///
    /// `helper` is any callable of the method's shape, receiver included, e.g.
    /// `|_: &Counter, _: i64, _: i64| -> i64 { unreachable!() }`. It is never called;
    /// it only supplies the signature. The method itself is located in the running
    /// executable by name.
    pub fn patch_internal_method<M, F: IntoMethodTarget<M>>(
        self,
        helper: F,
        instance: &F::Receiver,
        name: &str,
    ) -> Mock<Patched<F::Target>> {
        let registry = self.registry;
        self.try_patch_internal_method(helper, instance, name)
            .unwrap_or_else(|e| registry.fatal(e))
    }

    pub fn try_patch_internal_method<M, F: IntoMethodTarget<M>>(
        self,
        _helper: F,
        _instance: &F::Receiver,
        name: &str,
    ) -> Result<Mock<Patched<F::Target>>> {
        let redirector = self.registry.redirector();
        let identity = identity::internal_method::<F::Receiver>(name, |path| {
            redirector.resolve_unexported_by_name(path)
        })?;
        self.bind(identity)
    }

    fn bind<T: Target>(self, identity: TargetIdentity) -> Result<Mock<Patched<T>>> {
        let state = self.registry.attach::<T>(&self.test, &identity)?;
        Ok(Mock {
            registry: self.registry,
            test: self.test,
            binding: Binding {
                registry: self.registry,
                identity,
                signature: T::signature(),
                state,
            },
        })
    }
}

impl Default for Mock<Unpatched> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Target> Mock<Patched<T>> {
    fn state(&self) -> MutexGuard<'_, MockState> {
        lock_mock(&self.binding.state)
    }

    fn script(&mut self, edit: impl FnOnce(&mut Playlist) -> std::result::Result<(), PlaylistError>) -> &mut Self {
        let result = edit(&mut self.state().playlist);
        if let Err(e) = result {
            panic!("{}", e.for_target(&self.binding.identity.id));
        }
        self
    }

    fn respond_with(&mut self, response: Response<T>) -> &mut Self {
        let response = response.erase();
        self.script(|playlist| playlist.set_response(response))
    }

    /// Add an outcome answering exactly `n` calls.
    ///
    /// # Panics
    /// After [`any_times`](Self::any_times).
    pub fn times(&mut self, n: usize) -> &mut Self {
        self.script(|playlist| playlist.push_times(n))
    }

    /// Answer any number of calls, including none, with one outcome.
    ///
    /// # Panics
    /// When the mock already has an outcome.
    pub fn any_times(&mut self) -> &mut Self {
        self.script(Playlist::push_any)
    }

    /// Return `value` from the calls of the latest outcome.
    ///
    /// # Panics
    /// Without a preceding [`times`](Self::times) or [`any_times`](Self::any_times).
    pub fn returns(&mut self, value: T::Output) -> &mut Self
    where
        T::Output: Clone + Send + Sync,
    {
        self.respond_with(Response::Fixed(Arc::new(move || value.clone())))
    }

    /// Return the output type's zero value from the calls of the latest outcome.
    pub fn return_default(&mut self) -> &mut Self
    where
        T::Output: Default,
    {
        self.respond_with(Response::Fixed(Arc::new(<T::Output as Default>::default)))
    }

    /// Answer the calls of the latest outcome by running `handler` on the
    /// intercepted arguments (receiver first for methods).
    ///
    /// ```ignore
    /// m.times(2).do_and_return(Box::new(|_: &Counter, a, b| (a + b) * 100));
    /// ```
    pub fn do_and_return(&mut self, handler: Box<T::Handler>) -> &mut Self {
        self.respond_with(Response::Call(Arc::from(handler)))
    }

    /// Keep a copy of the arguments of every call.
    pub fn record(&mut self) -> &mut Self {
        self.state().recording = true;
        self
    }

    /// Arguments of each recorded call, in call order.
    pub fn recorded_args(&self) -> Vec<T::Args> {
        self.state()
            .recorded
            .iter()
            .filter_map(|args| args.downcast_ref::<T::Args>())
            .cloned()
            .collect()
    }

    /// Number of intercepted calls so far.
    pub fn calls(&self) -> usize {
        self.state().calls
    }

    pub fn is_live(&self) -> bool {
        self.state().live
    }

    pub fn target_id(&self) -> &TargetId {
        &self.binding.identity.id
    }

    pub fn test_id(&self) -> &TestId {
        &self.test
    }

    pub fn signature(&self) -> &Signature {
        &self.binding.signature
    }

    /// Verify that every outcome was fully consumed, then restore the target if no
    /// other mock holds it.
    pub fn unpatch(&mut self) {
        if let Err(e) = self.try_unpatch() {
            self.registry.fatal(e);
        }
    }

    pub fn try_unpatch(&mut self) -> Result<()> {
        self.registry.unpatch(&self.binding.state)
    }
}

impl<T: Target> std::fmt::Debug for Mock<Patched<T>> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mock")
            .field("target", &self.binding.identity.id)
            .field("test", &self.test)
            .field("signature", &self.binding.signature.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::probe::FixedProbe;
    use crate::redirector::testing::CountingRedirector;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    mocker_intercept::patchable! {
        fn scale(value: i64, factor: i64) -> i64 {
            value * factor
        }

        fn label(id: u32) -> String {
            format!("item-{id}")
        }

        fn ping() {}
    }

    pub struct Store {
        base: i64,
    }

    mocker_intercept::patchable! {
        impl Store {
            pub fn fetch(&self, key: i64) -> i64 {
                self.base + key
            }

            fn hidden(&self, key: i64) -> i64 {
                self.base - key
            }
        }
    }

    impl Store {
        fn lookup(&self, key: i64) -> i64 {
            self.hidden(key)
        }
    }

    // Every test here patches functions of this module through the one process
    // interceptor, so they must not overlap.
    fn registry() -> (&'static Registry, &'static FixedProbe) {
        let probe: &'static FixedProbe = Box::leak(Box::new(FixedProbe::new(Some("demo::test_mock"))));
        (Registry::leak(CountingRedirector::leak(), probe, Config::default()), probe)
    }

    fn new_mock(registry: &'static Registry) -> Mock {
        Mock::in_registry(registry).unwrap()
    }

    #[test]
    fn test_returns_follow_the_script() {
        let _g = crate::lock_hook_tests();
        let (registry, _) = registry();
        let mut m = new_mock(registry).patch(scale);
        m.times(1).returns(10);
        m.times(2).returns(20);

        assert_eq!(scale(1, 1), 10);
        assert_eq!(scale(1, 1), 20);
        assert_eq!(scale(1, 1), 20);
        assert_eq!(m.calls(), 3);

        m.unpatch();
        assert!(!m.is_live());
        assert_eq!(scale(2, 3), 6);
    }

    #[test]
    fn test_record_and_default_return() {
        let _g = crate::lock_hook_tests();
        let (registry, _) = registry();
        let mut m = new_mock(registry).patch(label);
        m.any_times().return_default().record();

        assert_eq!(label(1), "");
        assert_eq!(label(2), "");
        assert_eq!(m.recorded_args(), vec![(1,), (2,)]);

        m.unpatch();
        assert_eq!(label(3), "item-3");
    }

    #[test]
    fn test_unit_target_and_any_times_without_calls() {
        let _g = crate::lock_hook_tests();
        let (registry, _) = registry();
        let mut m = new_mock(registry).patch(ping);
        m.any_times().returns(());
        assert_eq!(m.signature().to_string(), "fn()");
        m.unpatch();
    }

    #[test]
    fn test_instance_method_with_handler() {
        let _g = crate::lock_hook_tests();
        let (registry, _) = registry();
        let mut m = new_mock(registry).patch_instance(Store::fetch, "fetch");
        m.times(2)
            .do_and_return(Box::new(|store: &Store, key: i64| store.base * 1000 + key));

        let store = Store { base: 2 };
        assert_eq!(store.fetch(5), 2005);
        assert_eq!(store.fetch(6), 2006);
        assert_eq!(m.target_id().as_str(), "mocker::mock::tests::Store.fetch");

        m.unpatch();
        assert_eq!(store.fetch(5), 7);
    }

    #[test]
    fn test_instance_method_name_is_checked() {
        let _g = crate::lock_hook_tests();
        let (registry, _) = registry();
        let err = new_mock(registry)
            .try_patch_instance(Store::fetch, "fetch_all")
            .unwrap_err();
        assert!(matches!(err, MockError::MethodNotFound { .. }));
    }

    #[test]
    fn test_internal_method_is_found_by_name() {
        let _g = crate::lock_hook_tests();
        let (registry, _) = registry();
        let store = Store { base: 10 };
        assert_eq!(store.lookup(1), 9);

        let helper = |_: &Store, _: i64| -> i64 { unreachable!() };
        let mut m = new_mock(registry).patch_internal_method(helper, &store, "hidden");
        m.times(1).returns(-1);

        assert_eq!(store.lookup(1), -1);
        assert_eq!(m.target_id().as_str(), "(*mocker::mock::tests::Store).hidden");

        m.unpatch();
        assert_eq!(store.lookup(1), 9);
    }

    #[test]
    fn test_closures_cannot_be_patched() {
        let _g = crate::lock_hook_tests();
        let (registry, _) = registry();
        let err = new_mock(registry).try_patch(|a: i64| a).unwrap_err();
        assert!(matches!(err, MockError::NotPatchable(_)));
    }

    #[test]
    #[should_panic(expected = "returns/do_and_return called before times/any_times")]
    fn test_returns_without_outcome_panics() {
        let _g = crate::lock_hook_tests();
        let (registry, _) = registry();
        let mut m = new_mock(registry).patch(scale);
        let result = catch_unwind(AssertUnwindSafe(|| {
            m.returns(1);
        }));
        m.try_unpatch().unwrap();
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }

    #[test]
    fn test_unpatch_twice_is_an_error() {
        let _g = crate::lock_hook_tests();
        let (registry, _) = registry();
        let mut m = new_mock(registry).patch(scale);
        m.try_unpatch().unwrap();
        assert_eq!(
            m.try_unpatch(),
            Err(MockError::NotLive("mocker::mock::tests::scale".to_string()))
        );
    }

    #[test]
    fn test_dropped_mock_restores_target() {
        let _g = crate::lock_hook_tests();
        let (registry, _) = registry();
        let test = TestId::new("demo::test_mock");

        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut m = new_mock(registry).patch(scale);
            m.any_times().returns(-5);
            assert_eq!(scale(1, 3), -5);
            panic!("assertion failed in test body");
        }));
        assert!(result.is_err());

        assert_eq!(scale(2, 3), 6);
        assert_eq!(registry.mock_count(&test), Some(0));
    }

    #[test]
    fn test_dropped_mock_releases_only_its_share() {
        let _g = crate::lock_hook_tests();
        let (registry, probe) = registry();

        let mut outer = new_mock(registry).patch(scale);
        outer.any_times().returns(1);

        probe.enter(Some("demo::test_nested"));
        {
            let mut inner = new_mock(registry).patch(scale);
            inner.times(3).returns(2);
            assert_eq!(scale(1, 1), 2);
        }

        probe.enter(Some("demo::test_mock"));
        assert_eq!(scale(1, 1), 1);
        outer.unpatch();
        assert_eq!(scale(2, 4), 8);
    }

    #[test]
    fn test_same_method_by_name_and_by_lookup_is_a_duplicate() {
        let _g = crate::lock_hook_tests();
        let (registry, _) = registry();
        let store = Store { base: 1 };

        let mut m = new_mock(registry).patch_instance(Store::fetch, "fetch");
        m.any_times().returns(0);

        let helper = |_: &Store, _: i64| -> i64 { unreachable!() };
        let err = new_mock(registry)
            .try_patch_internal_method(helper, &store, "fetch")
            .unwrap_err();
        assert_eq!(
            err,
            MockError::DuplicatePatch {
                test: "demo::test_mock".to_string(),
                target: "(*mocker::mock::tests::Store).fetch".to_string(),
            }
        );

        m.unpatch();
        assert_eq!(store.fetch(1), 2);
    }

    #[test]
    fn test_new_mock_outside_a_test_fails() {
        let _g = crate::lock_hook_tests();
        let (registry, probe) = registry();
        probe.enter(None);
        assert!(matches!(Mock::in_registry(registry), Err(MockError::UnknownScope(_))));
    }
}
