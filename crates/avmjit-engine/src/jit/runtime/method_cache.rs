//! Method descriptors and their memoized compile results
//!
//! A descriptor is compiled at most once. Its result lives in a `OnceCell`,
//! so the status moves from `Pending` to `Compiled` or `Failed` and never
//! changes again.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use once_cell::unsync::OnceCell;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::abc::{ConstantPool, MethodBody};
use crate::jit::backend::CompiledMethod;
use crate::jit::pipeline::CompileFailure;
use super::host::ScopeEntry;

/// Outcome of one compile attempt
#[derive(Clone)]
pub enum CompileResult {
    Compiled {
        callable: CompiledMethod,
        /// Constant-pool multiname indices the procedure references
        referenced_names: Rc<[u32]>,
    },
    Failed(CompileFailure),
}

impl CompileResult {
    pub fn status(&self) -> CompileStatus {
        match self {
            CompileResult::Compiled { .. } => CompileStatus::Compiled,
            CompileResult::Failed(_) => CompileStatus::Failed,
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self, CompileResult::Compiled { .. })
    }

    pub fn failure(&self) -> Option<&CompileFailure> {
        match self {
            CompileResult::Failed(f) => Some(f),
            CompileResult::Compiled { .. } => None,
        }
    }

    pub fn callable(&self) -> Option<&CompiledMethod> {
        match self {
            CompileResult::Compiled { callable, .. } => Some(callable),
            CompileResult::Failed(_) => None,
        }
    }
}

impl fmt::Debug for CompileResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileResult::Compiled { callable, referenced_names } => f
                .debug_struct("Compiled")
                .field("callable", &callable.name())
                .field("referenced_names", referenced_names)
                .finish(),
            CompileResult::Failed(failure) => f.debug_tuple("Failed").field(failure).finish(),
        }
    }
}

/// Tri-state compile status of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileStatus {
    /// Never attempted
    Pending,
    Compiled,
    Failed,
}

/// A method as the engine sees it: body, pool, captured scope and the
/// memoized compile result
pub struct MethodDescriptor {
    pub body: Rc<MethodBody>,
    pub pool: Rc<ConstantPool>,
    /// Scope chain the method closes over, outermost first
    pub outer_scope: Rc<[ScopeEntry]>,
    result: OnceCell<CompileResult>,
    use_count: Cell<u32>,
}

impl MethodDescriptor {
    pub fn new(body: MethodBody, pool: Rc<ConstantPool>) -> Self {
        MethodDescriptor {
            body: Rc::new(body),
            pool,
            outer_scope: Rc::from(Vec::new()),
            result: OnceCell::new(),
            use_count: Cell::new(0),
        }
    }

    pub fn with_outer_scope(mut self, scope: Vec<ScopeEntry>) -> Self {
        self.outer_scope = Rc::from(scope);
        self
    }

    pub fn status(&self) -> CompileStatus {
        self.result.get().map_or(CompileStatus::Pending, CompileResult::status)
    }

    /// Memoized result, `None` while pending
    pub fn result(&self) -> Option<&CompileResult> {
        self.result.get()
    }

    /// Compiled invocations so far
    pub fn use_count(&self) -> u32 {
        self.use_count.get()
    }

    /// Result of the one compile attempt, running `compile` if none was made
    pub(crate) fn get_or_compile(&self, compile: impl FnOnce() -> CompileResult) -> &CompileResult {
        self.result.get_or_init(compile)
    }

    pub(crate) fn record_use(&self) {
        self.use_count.set(self.use_count.get().saturating_add(1));
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("method", &self.body.qualified_name())
            .field("status", &self.status())
            .field("use_count", &self.use_count())
            .finish()
    }
}

/// Disambiguates derived identifiers: the first use of a base keeps it,
/// later uses get `_2`, `_3`, ... Entries are never removed.
#[derive(Debug, Default)]
pub struct PathTable {
    taken: FxHashSet<String>,
    counts: FxHashMap<String, u32>,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a unique identifier derived from `base`
    pub fn reserve(&mut self, base: &str) -> String {
        if self.taken.insert(base.to_string()) {
            self.counts.insert(base.to_string(), 1);
            return base.to_string();
        }
        let count = self.counts.entry(base.to_string()).or_insert(1);
        loop {
            *count += 1;
            let candidate = format!("{base}_{count}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.taken.contains(path)
    }

    pub fn len(&self) -> usize {
        self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_collisions() {
        let mut paths = PathTable::new();
        assert_eq!(paths.reserve("Main_run"), "Main_run");
        assert_eq!(paths.reserve("Main_run"), "Main_run_2");
        assert_eq!(paths.reserve("Main_run"), "Main_run_3");
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_suffix_does_not_collide_with_real_name() {
        let mut paths = PathTable::new();
        assert_eq!(paths.reserve("f_2"), "f_2");
        assert_eq!(paths.reserve("f"), "f");
        assert_eq!(paths.reserve("f"), "f_3");
        assert!(paths.contains("f_2"));
    }

    #[test]
    fn test_new_descriptor_is_pending() {
        let d = MethodDescriptor::new(MethodBody::new("m", vec![0x47]), Rc::new(ConstantPool::new()));
        assert_eq!(d.status(), CompileStatus::Pending);
        assert!(d.result().is_none());
        assert_eq!(d.use_count(), 0);
    }
}
