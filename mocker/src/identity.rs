//! Stable names for patch targets and test scopes.
//!
//! A target has two names: its `TargetId`, the registry key and log label, and its
//! entry symbol, the key the redirector installs replacements under. The entry symbol
//! is what `patchable!` computes inside the function (`type_name_of_val` of the fn
//! item), so every way of naming the same function must arrive at the same string.

use std::any::type_name;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use mocker_intercept::{HookError, SymbolInfo};

use crate::error::{MockError, Result};

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(name: impl AsRef<str>) -> Self {
                Self(Arc::from(name.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

/// Registry key of a patched target.
///
/// Compares by the entry symbol, so every way of naming one function yields equal
/// ids. Displays as the name it was patched under: `demo::add`, `demo::Counter.fetch`
/// or `(*demo::Counter).unique`.
#[derive(Debug, Clone)]
pub struct TargetId {
    entry: Arc<str>,
    label: Arc<str>,
}

impl TargetId {
    pub fn new(name: impl AsRef<str>) -> Self {
        let name: Arc<str> = Arc::from(name.as_ref());
        Self {
            entry: Arc::clone(&name),
            label: name,
        }
    }

    pub(crate) fn labeled(entry: &str, label: String) -> Self {
        Self {
            entry: Arc::from(entry),
            label: Arc::from(label),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.label
    }

    /// Symbol of the entry this id names.
    pub fn entry(&self) -> &str {
        &self.entry
    }
}

impl PartialEq for TargetId {
    fn eq(&self, other: &Self) -> bool {
        self.entry == other.entry
    }
}

impl Eq for TargetId {}

impl Hash for TargetId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entry.hash(state);
    }
}

impl PartialOrd for TargetId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TargetId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry.cmp(&other.entry)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

name_type! {
    /// Path of the test function a mock belongs to, e.g. `scenarios::test_recording`.
    TestId
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Function,
    Method,
    InternalMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIdentity {
    pub id: TargetId,
    /// Symbol the redirector keys the replacement by.
    pub entry: Arc<str>,
    pub kind: TargetKind,
}

// Fn items are zero-sized and named by path. Closures and fn pointers have no
// entry of their own that an entry check could look up.
fn fn_item_path<F: 'static>() -> Result<&'static str> {
    let name = type_name::<F>();
    let is_closure = name.contains("{{closure}}") || name.contains("{closure");
    if std::mem::size_of::<F>() != 0 || is_closure || name.starts_with("fn(") || name.contains('<') {
        return Err(MockError::NotPatchable(name.to_string()));
    }
    Ok(name)
}

/// Identity of a free function or associated function, keyed by its full path.
pub(crate) fn function<F: 'static>() -> Result<TargetIdentity> {
    let path = fn_item_path::<F>()?;
    Ok(TargetIdentity {
        id: TargetId::new(path),
        entry: Arc::from(path),
        kind: TargetKind::Function,
    })
}

/// Identity of the method `name` of `S`, reached through the fn item `F`.
pub(crate) fn method<F: 'static, S: 'static>(name: &str) -> Result<TargetIdentity> {
    let owner = type_name::<S>();
    let expected = format!("{}::{}", owner, name);
    let found = type_name::<F>();
    if found != expected {
        return Err(MockError::MethodNotFound {
            expected,
            found: found.to_string(),
        });
    }
    fn_item_path::<F>()?;

    Ok(TargetIdentity {
        id: TargetId::labeled(&expected, format!("{}.{}", owner, name)),
        entry: Arc::from(expected),
        kind: TargetKind::Method,
    })
}

/// Identity of a method the caller cannot name, located by symbol lookup.
pub(crate) fn internal_method<S: 'static>(
    name: &str,
    resolve: impl FnOnce(&str) -> std::result::Result<SymbolInfo, HookError>,
) -> Result<TargetIdentity> {
    let owner = type_name::<S>();
    let path = format!("{}::{}", owner, name);
    let symbol = resolve(&path)?;

    Ok(TargetIdentity {
        id: TargetId::labeled(&symbol.path, format!("(*{}).{}", owner, name)),
        entry: Arc::from(symbol.path),
        kind: TargetKind::InternalMethod,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gauge;

    impl Gauge {
        fn level(&self) -> u8 {
            1
        }

        fn reset(&self) {}
    }

    fn add(a: i64, b: i64) -> i64 {
        a + b
    }

    fn type_of<F: 'static>(_: F) -> fn() -> Result<TargetIdentity> {
        function::<F>
    }

    fn method_of<F: 'static>(_: F, name: &str) -> Result<TargetIdentity> {
        method::<F, Gauge>(name)
    }

    #[test]
    fn test_free_function_is_named_by_path() {
        let identity = type_of(add)().unwrap();
        assert_eq!(identity.id.as_str(), "mocker::identity::tests::add");
        assert_eq!(&*identity.entry, "mocker::identity::tests::add");
        assert_eq!(identity.kind, TargetKind::Function);
    }

    #[test]
    fn test_same_function_resolves_to_same_id() {
        assert_eq!(type_of(add)().unwrap(), type_of(add)().unwrap());
        assert_ne!(type_of(add)().unwrap().id, type_of(Gauge::level)().unwrap().id);
    }

    #[test]
    fn test_closures_and_fn_pointers_are_rejected() {
        let closure = |a: i64| a;
        assert!(matches!(type_of(closure)(), Err(MockError::NotPatchable(_))));

        let pointer: fn(i64, i64) -> i64 = add;
        assert!(matches!(type_of(pointer)(), Err(MockError::NotPatchable(_))));
    }

    #[test]
    fn test_method_is_named_type_dot_method() {
        let identity = method_of(Gauge::level, "level").unwrap();
        assert_eq!(identity.id.as_str(), "mocker::identity::tests::Gauge.level");
        assert_eq!(&*identity.entry, "mocker::identity::tests::Gauge::level");
        assert_eq!(identity.kind, TargetKind::Method);
    }

    #[test]
    fn test_method_name_must_match_fn_item() {
        let err = method_of(Gauge::reset, "level").unwrap_err();
        assert_eq!(
            err,
            MockError::MethodNotFound {
                expected: "mocker::identity::tests::Gauge::level".to_string(),
                found: "mocker::identity::tests::Gauge::reset".to_string(),
            }
        );
    }

    #[test]
    fn test_internal_method_uses_indirect_form() {
        let identity = internal_method::<Gauge>("hidden", |path| {
            Ok(SymbolInfo {
                path: path.to_string(),
                name: "_ZN6mocker5Gauge6hidden17h0000000000000000E".to_string(),
                address: 0x1000,
            })
        })
        .unwrap();
        assert_eq!(identity.id.as_str(), "(*mocker::identity::tests::Gauge).hidden");
        assert_eq!(&*identity.entry, "mocker::identity::tests::Gauge::hidden");
        assert_eq!(identity.kind, TargetKind::InternalMethod);
    }

    #[test]
    fn test_method_and_internal_method_share_one_id() {
        let exported = method_of(Gauge::level, "level").unwrap();
        let internal = internal_method::<Gauge>("level", |path| {
            Ok(SymbolInfo {
                path: path.to_string(),
                name: String::new(),
                address: 0x1000,
            })
        })
        .unwrap();

        assert_eq!(exported.id, internal.id);
        assert_eq!(exported.entry, internal.entry);
        assert_ne!(exported.id.as_str(), internal.id.as_str());
        assert_ne!(exported.id, method_of(Gauge::reset, "reset").unwrap().id);
    }

    #[test]
    fn test_internal_method_lookup_failure_is_a_redirect_error() {
        let err = internal_method::<Gauge>("missing", |path| {
            Err(HookError::SymbolNotFound(path.to_string()))
        })
        .unwrap_err();
        assert_eq!(
            err,
            MockError::Redirect(HookError::SymbolNotFound(
                "mocker::identity::tests::Gauge::missing".to_string()
            ))
        );
    }
}
