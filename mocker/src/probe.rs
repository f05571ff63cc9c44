//! Caller context probe: which test is running, and where a call came from.

use std::backtrace::Backtrace;

use crate::identity::TestId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    /// Enclosing test scope, if one could be found.
    pub test: Option<TestId>,
    /// Source location of the code that called the entry, `file:line:col`.
    pub call_site: Option<String>,
}

/// Source of the current test scope.
pub trait ScopeProbe: Send + Sync {
    /// Inspect the current thread. When `entry` names a function on the stack, the
    /// returned call site is the location of its caller.
    fn inspect(&self, entry: Option<&str>) -> CallerContext;
}

impl<P: ScopeProbe + ?Sized> ScopeProbe for &P {
    fn inspect(&self, entry: Option<&str>) -> CallerContext {
        (**self).inspect(entry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    /// Symbol without hash suffix and closure segments.
    name: String,
    location: Option<String>,
}

// Frames that belong to the runtime, the test harness or the unwinder.
const RUNTIME_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "test::",
    "backtrace::",
    "<std::",
    "<core::",
    "<alloc::",
    "__rust",
    "rust_begin_unwind",
];

fn is_runtime(name: &str) -> bool {
    RUNTIME_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn is_closure_segment(segment: &str) -> bool {
    segment.starts_with("{{closure}}") || segment.starts_with("{closure")
}

fn is_hash_segment(segment: &str) -> bool {
    segment.len() == 17
        && segment.starts_with('h')
        && segment[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Strip the `::h<hash>` suffix and closure segments from a demangled symbol.
fn clean_symbol(raw: &str) -> String {
    raw.trim()
        .split("::")
        .filter(|s| !is_closure_segment(s) && !is_hash_segment(s))
        .collect::<Vec<_>>()
        .join("::")
}

fn leaf(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

/// Parse the `Display` output of `std::backtrace::Backtrace`:
///
/// ```text
///    3: scenarios::test_recording
///              at ./tests/scenarios.rs:120:5
/// ```
///
/// std documents this output as human-readable only. The parser depends on the
/// numbered symbol lines and the `at file:line:col` lines that follow them; a line of
/// any other shape is skipped, so a format change loses frames rather than failing.
fn parse_frames(trace: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in trace.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                frame.location.get_or_insert_with(|| location.trim().to_string());
            }
            continue;
        }

        let Some((index, symbol)) = line.split_once(": ") else {
            continue;
        };
        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        frames.push(Frame {
            name: clean_symbol(symbol),
            location: None,
        });
    }
    frames
}

/// Finds the test scope by walking the live call stack outward from the call site.
///
/// When the entry that was called is on the stack, the walk starts at its caller, so
/// a target named like a test is never taken for one. The first non-runtime frame
/// whose leaf name starts with the prefix is the test. When no such frame exists the
/// libtest thread name, which is the test's path, is used.
pub struct StackProbe {
    prefix: String,
}

impl StackProbe {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn context_from(&self, frames: &[Frame], entry: Option<&str>, thread: Option<&str>) -> CallerContext {
        let entry_at = entry.and_then(|entry| frames.iter().position(|f| f.name == entry));
        let outer = match entry_at {
            Some(at) => &frames[at + 1..],
            None => frames,
        };

        let test = outer
            .iter()
            .filter(|f| !is_runtime(&f.name))
            .find(|f| leaf(&f.name).starts_with(&self.prefix))
            .map(|f| TestId::new(&f.name))
            .or_else(|| thread.filter(|t| *t != "main").map(TestId::new));

        let call_site = entry_at.and_then(|_| {
            outer
                .iter()
                .find(|f| !is_runtime(&f.name))
                .and_then(|f| f.location.clone())
        });

        CallerContext { test, call_site }
    }
}

impl ScopeProbe for StackProbe {
    fn inspect(&self, entry: Option<&str>) -> CallerContext {
        let trace = Backtrace::force_capture().to_string();
        let frames = parse_frames(&trace);
        self.context_from(&frames, entry, std::thread::current().name())
    }
}

/// Probe with a scope set by hand, for exercising the registry without a test
/// frame on the stack.
#[cfg(test)]
pub(crate) struct FixedProbe {
    current: std::sync::Mutex<Option<TestId>>,
}

#[cfg(test)]
impl FixedProbe {
    pub(crate) fn new(test: Option<&str>) -> Self {
        Self {
            current: std::sync::Mutex::new(test.map(TestId::new)),
        }
    }

    pub(crate) fn enter(&self, test: Option<&str>) {
        *self.current.lock().unwrap() = test.map(TestId::new);
    }
}

#[cfg(test)]
impl ScopeProbe for FixedProbe {
    fn inspect(&self, _entry: Option<&str>) -> CallerContext {
        CallerContext {
            test: self.current.lock().unwrap().clone(),
            call_site: None,
        }
    }
}
