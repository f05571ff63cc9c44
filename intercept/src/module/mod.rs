//! Symbol lookup over the running executable.
//!
//! Entries that are not reachable by path from the caller (private methods) are
//! located by name: the executable's symbol table is parsed once with the `object`
//! crate and searched for the mangled `Type::method` fragment.

use std::sync::OnceLock;

use log::debug;
use object::{Object, ObjectSymbol};

use crate::types::{HookError, SymbolInfo};

struct SymbolTable {
    /// (raw symbol name, address)
    symbols: Vec<(String, u64)>,
}

static SYMTAB: OnceLock<Result<SymbolTable, HookError>> = OnceLock::new();

fn load_symbol_table() -> Result<SymbolTable, HookError> {
    let exe = std::env::current_exe().map_err(|e| HookError::SymbolTable(e.to_string()))?;
    let data = std::fs::read(&exe)
        .map_err(|e| HookError::SymbolTable(format!("{}: {}", exe.display(), e)))?;
    let obj = object::File::parse(&*data)
        .map_err(|e| HookError::SymbolTable(format!("{}: {}", exe.display(), e)))?;

    let mut symbols = Vec::new();
    for sym in obj.symbols().chain(obj.dynamic_symbols()) {
        if sym.address() == 0 {
            continue;
        }
        let name = match sym.name() {
            Ok(n) if !n.is_empty() => n,
            _ => continue,
        };
        symbols.push((name.to_string(), sym.address()));
    }

    debug!("Parsed {} symbols from {}", symbols.len(), exe.display());
    Ok(SymbolTable { symbols })
}

fn symbol_table() -> Result<&'static SymbolTable, HookError> {
    SYMTAB
        .get_or_init(load_symbol_table)
        .as_ref()
        .map_err(Clone::clone)
}

fn is_plain_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Mangled spellings of the trailing `owner::item` segments of `path`.
///
/// Both legacy and v0 manglings encode identifiers as `<len><ident>`; v0 inserts an
/// `_` separator when the identifier starts with a digit or underscore.
pub(crate) fn mangled_fragments(path: &str) -> Vec<String> {
    let mut segments = path.rsplit("::");
    let (Some(item), Some(owner)) = (segments.next(), segments.next()) else {
        return Vec::new();
    };
    if !is_plain_ident(item) || !is_plain_ident(owner) {
        return Vec::new();
    }

    let encode = |ident: &str, separated: bool| {
        if separated {
            format!("{}_{}", ident.len(), ident)
        } else {
            format!("{}{}", ident.len(), ident)
        }
    };
    let needs_sep = |ident: &str| ident.starts_with(|c: char| c == '_' || c.is_ascii_digit());

    let mut fragments = vec![format!("{}{}", encode(owner, false), encode(item, false))];
    if needs_sep(owner) || needs_sep(item) {
        fragments.push(format!(
            "{}{}",
            encode(owner, needs_sep(owner)),
            encode(item, needs_sep(item))
        ));
    }
    fragments
}

fn contains_fragment(name: &str, fragment: &str) -> bool {
    name.match_indices(fragment).any(|(at, _)| {
        // A preceding digit means the match sits inside a longer length prefix.
        !name[..at].ends_with(|c: char| c.is_ascii_digit())
    })
}

/// Locate the entry for `path` (e.g. `demo::Counter::unique`) in the running
/// executable's symbol table.
pub fn resolve_symbol_by_path(path: &str) -> Result<SymbolInfo, HookError> {
    let fragments = mangled_fragments(path);
    let table = symbol_table()?;

    let found = table.symbols.iter().find(|(name, _)| {
        name == path || fragments.iter().any(|f| contains_fragment(name, f))
    });

    match found {
        Some((name, address)) => {
            debug!("Resolved {} to {} at {:#x}", path, name, address);
            Ok(SymbolInfo {
                path: path.to_string(),
                name: name.clone(),
                address: *address,
            })
        }
        None => Err(HookError::SymbolNotFound(path.to_string())),
    }
}
