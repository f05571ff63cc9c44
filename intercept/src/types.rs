use core::any::Any;
use std::sync::Arc;

use thiserror::Error;

/// A type-erased callable installed over an entry symbol.
///
/// The concrete type behind the `Any` is always `Box<F>` where `F` is the
/// `dyn Fn(..) -> R + Send + Sync` type the entry check downcasts to.
pub type Replacement = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("replacement for {0} has the wrong signature")]
    WrongSignature(String),

    #[error("{0} is already replaced")]
    AlreadyAttached(String),

    #[error("{0} is not replaced")]
    NotAttached(String),

    #[error("token for {0} belongs to an earlier installation")]
    StaleToken(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("cannot read symbol table: {0}")]
    SymbolTable(String),
}

/// Opaque handle returned by [`Interceptor::replace`](crate::Interceptor::replace).
///
/// Carries the generation of the installation so a token cannot revert a
/// replacement installed after it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplaceToken {
    pub(crate) symbol: Arc<str>,
    pub(crate) generation: u64,
}

impl ReplaceToken {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Demangled-style path the symbol was looked up by, e.g. `demo::Counter::unique`.
    pub path: String,
    /// Raw (mangled) name as found in the symbol table.
    pub name: String,
    pub address: u64,
}
