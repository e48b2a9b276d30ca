//! Pre-warming: compile methods before they are first invoked
//!
//! Walks a set of method descriptors and compiles each one still pending,
//! storing the result in the descriptor exactly as a first invocation
//! would. Methods already attempted are left alone.

use std::time::Instant;

use crate::jit::backend::CodegenBackend;
use crate::jit::pipeline::{CompileFailure, CompilePipeline};
use crate::jit::runtime::{CompileResult, CompileStatus, MethodDescriptor, PathTable};

/// Configuration for pre-warming
#[derive(Debug, Clone)]
pub struct PrewarmConfig {
    /// Maximum number of methods to compile (default: unbounded)
    pub max_methods: usize,
    /// Compile time per method above which it is reported as slow, in
    /// milliseconds (default: 100)
    pub slow_compile_ms: u64,
}

impl Default for PrewarmConfig {
    fn default() -> Self {
        PrewarmConfig { max_methods: usize::MAX, slow_compile_ms: 100 }
    }
}

/// Result of pre-warming
#[derive(Debug, Default)]
pub struct PrewarmResult {
    /// Positions (in the input) of methods that compiled
    pub compiled: Vec<usize>,
    /// Methods that failed, with the reason
    pub failed: Vec<(usize, CompileFailure)>,
    /// Methods skipped because they were already attempted or over the limit
    pub skipped: Vec<usize>,
    /// Methods that compiled but took longer than `slow_compile_ms`
    pub slow: Vec<(usize, u64)>,
    /// Total time spent pre-warming in milliseconds
    pub total_time_ms: u64,
}

/// Compile every pending method in `methods`, up to `config.max_methods`
pub fn prewarm_methods<'a, B, I>(
    methods: I,
    config: &PrewarmConfig,
    pipeline: &CompilePipeline<B>,
    paths: &mut PathTable,
) -> PrewarmResult
where
    B: CodegenBackend,
    I: IntoIterator<Item = &'a MethodDescriptor>,
{
    let start = Instant::now();
    let mut result = PrewarmResult::default();
    let mut attempted = 0usize;

    for (position, desc) in methods.into_iter().enumerate() {
        if desc.status() != CompileStatus::Pending || attempted >= config.max_methods {
            result.skipped.push(position);
            continue;
        }
        attempted += 1;

        let method_start = Instant::now();
        match desc.get_or_compile(|| pipeline.compile(desc, paths)) {
            CompileResult::Compiled { .. } => {
                let elapsed = method_start.elapsed().as_millis() as u64;
                if elapsed > config.slow_compile_ms {
                    result.slow.push((position, elapsed));
                }
                result.compiled.push(position);
            }
            CompileResult::Failed(failure) => result.failed.push((position, failure.clone())),
        }
    }

    result.total_time_ms = start.elapsed().as_millis() as u64;
    tracing::debug!(
        compiled = result.compiled.len(),
        failed = result.failed.len(),
        skipped = result.skipped.len(),
        time_ms = result.total_time_ms,
        "pre-warm finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::abc::{ConstantPool, MethodBody};
    use crate::jit::backend::EvalBackend;
    use crate::jit::pipeline::FailureReason;
    use crate::jit::JitConfig;

    fn methods() -> Vec<MethodDescriptor> {
        let pool = Rc::new(ConstantPool::new());
        vec![
            MethodDescriptor::new(MethodBody::new("a", vec![0x47]), Rc::clone(&pool)),
            MethodDescriptor::new(MethodBody::new("b", vec![0xFF]), Rc::clone(&pool)),
            MethodDescriptor::new(MethodBody::new("c", vec![0x24, 0x01, 0x48]), pool),
        ]
    }

    #[test]
    fn test_prewarm_compiles_pending() {
        let pipeline = CompilePipeline::new(EvalBackend::new(), JitConfig::default());
        let methods = methods();
        let mut paths = PathTable::new();
        let result = prewarm_methods(&methods, &PrewarmConfig::default(), &pipeline, &mut paths);

        assert_eq!(result.compiled, vec![0, 2]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].1.reason, FailureReason::UnknownBytecode);
        assert_eq!(methods[1].status(), CompileStatus::Failed);
        assert_eq!(methods[2].status(), CompileStatus::Compiled);
    }

    #[test]
    fn test_prewarm_skips_attempted_and_respects_limit() {
        let pipeline = CompilePipeline::new(EvalBackend::new(), JitConfig::default());
        let methods = methods();
        let mut paths = PathTable::new();
        let config = PrewarmConfig { max_methods: 1, ..Default::default() };

        let first = prewarm_methods(&methods, &config, &pipeline, &mut paths);
        assert_eq!(first.compiled, vec![0]);
        assert_eq!(first.skipped, vec![1, 2]);

        let second = prewarm_methods(&methods, &PrewarmConfig::default(), &pipeline, &mut paths);
        assert_eq!(second.skipped, vec![0]);
        assert_eq!(second.compiled, vec![2]);
        assert_eq!(paths.len(), 2);
    }
}
