//! Top-level JIT engine: compile pipeline, memoized results, path table and
//! the interpreter fallback.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::jit::backend::{CodegenBackend, EvalBackend};
use crate::jit::flags::OptimizerFlags;
use crate::jit::pipeline::prewarm::{prewarm_methods, PrewarmConfig, PrewarmResult};
use crate::jit::pipeline::CompilePipeline;
use crate::jit::runtime::{interpret, CompileResult, ExecError, MethodDescriptor, ObjectModel, PathTable, Value};

/// Configuration for the JIT engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// Enabled optimizers and diagnostics (default: `OptimizerFlags::DEFAULT`)
    pub flags: OptimizerFlags,
    /// Instructions a fast-call alias stays live for (default: 16)
    pub fast_call_window: usize,
    /// Dispatcher iterations before the fuse trips (default: 10 million)
    pub dispatch_fuse_limit: u64,
    /// Global names `getlex` may resolve once per method
    pub hoist_allow_list: Vec<String>,
    /// Property names that open a null-guarded chain
    pub null_guard_roots: Vec<String>,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            flags: OptimizerFlags::DEFAULT,
            fast_call_window: 16,
            dispatch_fuse_limit: 10_000_000,
            hoist_allow_list: [
                "Math", "int", "uint", "Number", "String", "Boolean", "Array", "Object", "Error", "isNaN",
                "isFinite", "parseInt", "parseFloat", "NaN", "Infinity",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            null_guard_roots: vec!["loaderInfo".to_string(), "parameters".to_string()],
        }
    }
}

/// Top-level JIT engine managing compilation and the interpreter fallback
pub struct JitEngine<B: CodegenBackend = EvalBackend> {
    pipeline: CompilePipeline<B>,
    paths: RefCell<PathTable>,
}

impl JitEngine<EvalBackend> {
    /// Create a new JIT engine with default configuration
    pub fn new() -> Self {
        Self::with_config(JitConfig::default())
    }

    /// Create a new JIT engine with custom configuration
    pub fn with_config(config: JitConfig) -> Self {
        Self::with_backend(EvalBackend::new(), config)
    }
}

impl Default for JitEngine<EvalBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: CodegenBackend> JitEngine<B> {
    pub fn with_backend(backend: B, config: JitConfig) -> Self {
        JitEngine { pipeline: CompilePipeline::new(backend, config), paths: RefCell::new(PathTable::new()) }
    }

    /// The memoized compile result of `desc`, compiling on first request
    pub fn compile<'d>(&self, desc: &'d MethodDescriptor) -> &'d CompileResult {
        desc.get_or_compile(|| self.pipeline.compile(desc, &mut self.paths.borrow_mut()))
    }

    /// Invoke `desc`: the compiled callable when there is one, the
    /// interpreter otherwise
    pub fn invoke(
        &self,
        desc: &MethodDescriptor,
        host: &mut dyn ObjectModel,
        this: Value,
        args: &[Value],
    ) -> Result<Value, ExecError> {
        match self.compile(desc) {
            CompileResult::Compiled { callable, .. } => {
                desc.record_use();
                callable.invoke(host, this, args)
            }
            CompileResult::Failed(failure) => {
                tracing::debug!(method = %desc.body.qualified_name(), reason = %failure.reason, "interpreting");
                interpret(&desc.body, &desc.pool, &desc.outer_scope, host, this, args)
            }
        }
    }

    /// Compile every pending method in `methods` ahead of its first call
    pub fn prewarm<'a>(&self, methods: impl IntoIterator<Item = &'a MethodDescriptor>) -> PrewarmResult {
        self.prewarm_with(methods, &PrewarmConfig::default())
    }

    pub fn prewarm_with<'a>(
        &self,
        methods: impl IntoIterator<Item = &'a MethodDescriptor>,
        config: &PrewarmConfig,
    ) -> PrewarmResult {
        prewarm_methods(methods, config, &self.pipeline, &mut self.paths.borrow_mut())
    }

    /// Whether `path` has been handed out as a procedure identifier
    pub fn has_path(&self, path: &str) -> bool {
        self.paths.borrow().contains(path)
    }

    /// Get a reference to the compilation pipeline
    pub fn pipeline(&self) -> &CompilePipeline<B> {
        &self.pipeline
    }

    pub fn config(&self) -> &JitConfig {
        self.pipeline.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::abc::{ConstantPool, MethodBody};
    use crate::jit::runtime::{CompileStatus, SimpleHost};

    #[test]
    fn test_engine_creation() {
        let engine = JitEngine::new();
        assert_eq!(engine.pipeline().backend().name(), "eval");
        assert_eq!(engine.config().fast_call_window, 16);
        assert!(engine.config().flags.contains(OptimizerFlags::FAST_CALL));
    }

    #[test]
    fn test_compile_is_memoized() {
        let engine = JitEngine::new();
        let desc = MethodDescriptor::new(MethodBody::new("f", vec![0x47]), Rc::new(ConstantPool::new()));
        assert_eq!(desc.status(), CompileStatus::Pending);
        engine.compile(&desc);
        engine.compile(&desc);
        assert_eq!(desc.status(), CompileStatus::Compiled);
        assert!(engine.has_path("f"));
        assert!(!engine.has_path("f_2"));
    }

    #[test]
    fn test_use_count_only_counts_compiled_calls() {
        let engine = JitEngine::new();
        let mut host = SimpleHost::new();
        let pool = Rc::new(ConstantPool::new());
        let ok = MethodDescriptor::new(MethodBody::new("ok", vec![0x47]), Rc::clone(&pool));
        let bad = MethodDescriptor::new(MethodBody::new("bad", vec![0x24, 0x01, 0xFF]), pool);

        for _ in 0..3 {
            engine.invoke(&ok, &mut host, Value::Undefined, &[]).unwrap();
        }
        assert_eq!(ok.use_count(), 3);

        assert!(engine.invoke(&bad, &mut host, Value::Undefined, &[]).is_err());
        assert_eq!(bad.status(), CompileStatus::Failed);
        assert_eq!(bad.use_count(), 0);
    }
}
