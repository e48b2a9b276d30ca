//! Compilation pipeline: method body → analysis → procedure → backend
//!
//! The pipeline chains together the compilation stages:
//! 1. Trivial-constructor shortcut
//! 2. Derive the procedure identifier
//! 3. Decode and analyze stack/scope depths
//! 4. Rewrite the instruction list (scope elision, redundant conversions)
//! 5. Generate the procedure, consulting the site optimizers
//! 6. Load it through the backend
//!
//! Every failure is returned as data: the method keeps running in the
//! interpreter.

pub mod codegen;
pub mod naming;
pub mod optimize;
pub mod prewarm;

use std::fmt;
use std::rc::Rc;

use crate::jit::analysis::{analyze, listing_around, rewrite, AnalyzeError};
use crate::jit::backend::{CodegenBackend, CompiledMethod, LoadError};
use crate::jit::flags::OptimizerFlags;
use crate::jit::runtime::{CompileResult, MethodContext, MethodDescriptor, MethodRef, PathTable};
use crate::jit::JitConfig;
use self::codegen::CodegenError;
use self::naming::NamingError;
use self::optimize::TrivialCtorDetector;

/// Disassembly lines shown on each side of an underrun
const UNDERRUN_LISTING_RADIUS: usize = 3;

/// Why a method was not compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// An opcode the decoder does not know or does not support
    UnknownBytecode,
    /// Truncated operands, bad branch targets or exception regions
    Malformed,
    /// An instruction pops more than the stack holds
    Underrun,
    /// Control paths meet with different depths
    DepthMismatch,
    /// No identifier can be derived from the class and method name
    MangledClassname,
    /// The backend rejected the generated procedure
    InvalidProcedure,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::UnknownBytecode => "UNKNOWN_BYTECODE",
            FailureReason::Malformed => "MALFORMED",
            FailureReason::Underrun => "UNDERRUN",
            FailureReason::DepthMismatch => "DEPTH_MISMATCH",
            FailureReason::MangledClassname => "MANGLED_CLASSNAME",
            FailureReason::InvalidProcedure => "INVALID_PROCEDURE",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed compile: reason code plus human-readable diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    pub reason: FailureReason,
    pub diagnostic: String,
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.diagnostic)
    }
}

/// Errors from the compilation pipeline
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Analysis error: {0}")]
    Analyze(#[from] AnalyzeError),
    #[error("Naming error: {0}")]
    Naming(#[from] NamingError),
    #[error("Codegen error: {0}")]
    Codegen(#[from] CodegenError),
    #[error("Load error: {0}")]
    Load(#[from] LoadError),
}

impl CompileError {
    pub fn reason(&self) -> FailureReason {
        match self {
            CompileError::Analyze(AnalyzeError::Decode(e)) if e.is_unknown_bytecode() => {
                FailureReason::UnknownBytecode
            }
            CompileError::Analyze(AnalyzeError::Underrun { .. } | AnalyzeError::ScopeUnderrun { .. }) => {
                FailureReason::Underrun
            }
            CompileError::Analyze(AnalyzeError::DepthMismatch { .. }) => FailureReason::DepthMismatch,
            CompileError::Analyze(_) => FailureReason::Malformed,
            CompileError::Naming(_) => FailureReason::MangledClassname,
            CompileError::Codegen(_) | CompileError::Load(_) => FailureReason::InvalidProcedure,
        }
    }
}

/// Complete compilation pipeline
pub struct CompilePipeline<B: CodegenBackend> {
    backend: B,
    config: JitConfig,
    trivial_ctor: TrivialCtorDetector,
}

impl<B: CodegenBackend> CompilePipeline<B> {
    pub fn new(backend: B, config: JitConfig) -> Self {
        CompilePipeline { backend, config, trivial_ctor: TrivialCtorDetector::new() }
    }

    /// Compile one method; failures come back as [`CompileResult::Failed`]
    pub fn compile(&self, desc: &MethodDescriptor, paths: &mut PathTable) -> CompileResult {
        let method = desc.body.qualified_name();
        match self.try_compile(desc, paths) {
            Ok(result) => result,
            Err(err) => {
                let reason = err.reason();
                let mut diagnostic = err.to_string();
                if let CompileError::Analyze(
                    AnalyzeError::Underrun { offset, .. } | AnalyzeError::ScopeUnderrun { offset, .. },
                ) = &err
                {
                    if self.config.flags.contains(OptimizerFlags::UNDERRUN_DIAGNOSTICS) {
                        diagnostic.push('\n');
                        diagnostic.push_str(&listing_around(
                            &desc.body.code,
                            &desc.pool,
                            *offset,
                            UNDERRUN_LISTING_RADIUS,
                        ));
                    }
                }
                match reason {
                    FailureReason::UnknownBytecode | FailureReason::MangledClassname => {
                        tracing::debug!(method = %method, reason = %reason, "compile skipped: {}", err)
                    }
                    _ => tracing::warn!(method = %method, reason = %reason, "compile failed: {}", err),
                }
                CompileResult::Failed(CompileFailure { reason, diagnostic })
            }
        }
    }

    fn try_compile(&self, desc: &MethodDescriptor, paths: &mut PathTable) -> Result<CompileResult, CompileError> {
        let body = &desc.body;
        let flags = self.config.flags;

        if flags.contains(OptimizerFlags::TRIVIAL_CTOR) && self.trivial_ctor.test(body, &desc.pool) {
            let name: Rc<str> = Rc::from(paths.reserve(&naming::derive_identifier(body)?));
            tracing::debug!(method = %name, "trivial constructor");
            return Ok(CompileResult::Compiled {
                callable: CompiledMethod::TrivialConstructor { name },
                referenced_names: Rc::from(Vec::new()),
            });
        }

        let base = naming::derive_identifier(body)?;
        let analysis = analyze(body, &desc.pool, flags.contains(OptimizerFlags::SCOPE_ELISION))?;
        let analysis = rewrite(analysis, flags);
        let name = paths.reserve(&base);

        let procedure = codegen::generate(&analysis, body, &desc.pool, &self.config, name)?;
        tracing::debug!(
            method = %procedure.name,
            shape = ?procedure.shape,
            blocks = procedure.blocks.len(),
            statements = procedure.stmt_count(),
            "generated procedure"
        );

        let referenced_names = procedure.referenced_names();
        let context = MethodContext::new(
            &procedure,
            MethodRef { name: Rc::from(body.qualified_name()), index: body.method_index },
            Rc::clone(&desc.pool),
            Rc::clone(&desc.outer_scope),
        );
        let callable = self.backend.load(procedure, context)?;
        Ok(CompileResult::Compiled { callable, referenced_names })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::{CodeWriter, ConstantPool, MethodBody, Opcode};
    use crate::jit::backend::EvalBackend;
    use crate::jit::runtime::CompileStatus;

    fn pipeline(flags: OptimizerFlags) -> CompilePipeline<EvalBackend> {
        let config = JitConfig { flags, ..JitConfig::default() };
        CompilePipeline::new(EvalBackend::new(), config)
    }

    fn descriptor(body: MethodBody) -> MethodDescriptor {
        MethodDescriptor::new(body, Rc::new(ConstantPool::new()))
    }

    fn compile(flags: OptimizerFlags, body: MethodBody) -> CompileResult {
        pipeline(flags).compile(&descriptor(body), &mut PathTable::new())
    }

    #[test]
    fn test_compiles_straight_line() {
        let mut w = CodeWriter::new();
        w.push_byte(2).push_byte(3).op(Opcode::Add).op(Opcode::ReturnValue);
        let result = compile(OptimizerFlags::DEFAULT, MethodBody::new("f", w.finish().unwrap()));
        assert_eq!(result.status(), CompileStatus::Compiled);
        assert_eq!(result.callable().map(|c| c.name().to_string()), Some("f".to_string()));
    }

    #[test]
    fn test_underrun_reason_and_listing() {
        let mut w = CodeWriter::new();
        w.op(Opcode::Add).op(Opcode::ReturnValue);
        let code = w.finish().unwrap();

        let plain = compile(OptimizerFlags::DEFAULT, MethodBody::new("f", code.clone()));
        let failure = plain.failure().unwrap();
        assert_eq!(failure.reason, FailureReason::Underrun);
        assert!(!failure.diagnostic.contains('\n'));

        let flags = OptimizerFlags::DEFAULT.union(OptimizerFlags::UNDERRUN_DIAGNOSTICS);
        let verbose = compile(flags, MethodBody::new("f", code));
        let failure = verbose.failure().unwrap();
        assert_eq!(failure.reason.as_str(), "UNDERRUN");
        assert!(failure.diagnostic.contains(">>"));
    }

    #[test]
    fn test_scope_underrun_gets_listing() {
        let mut w = CodeWriter::new();
        w.op(Opcode::GetScopeObject).byte(1).op(Opcode::ReturnValue);
        let flags = OptimizerFlags::DEFAULT.union(OptimizerFlags::UNDERRUN_DIAGNOSTICS);
        let result = compile(flags, MethodBody::new("f", w.finish().unwrap()));
        let failure = result.failure().unwrap();
        assert_eq!(failure.reason, FailureReason::Underrun);
        assert!(failure.diagnostic.contains("Scope stack underrun"));
        assert!(failure.diagnostic.contains(">>"));
    }

    #[test]
    fn test_oversized_operand_counts_underrun() {
        let mut w = CodeWriter::new();
        w.op(Opcode::GetLocal0).op(Opcode::GetLocal0).op_u30(Opcode::Call, u32::MAX).op(Opcode::ReturnValue);
        let call = compile(OptimizerFlags::DEFAULT, MethodBody::new("f", w.finish().unwrap()));
        assert_eq!(call.failure().unwrap().reason, FailureReason::Underrun);

        let mut w = CodeWriter::new();
        w.op_u30(Opcode::NewObject, 0x8000_0000).op(Opcode::ReturnValue);
        let object = compile(OptimizerFlags::DEFAULT, MethodBody::new("g", w.finish().unwrap()));
        assert_eq!(object.failure().unwrap().reason, FailureReason::Underrun);
    }

    #[test]
    fn test_unknown_opcode() {
        let result = compile(OptimizerFlags::DEFAULT, MethodBody::new("f", vec![0xFF]));
        assert_eq!(result.failure().unwrap().reason, FailureReason::UnknownBytecode);
    }

    #[test]
    fn test_mangled_name_without_index() {
        let result = compile(OptimizerFlags::DEFAULT, MethodBody::new("ünï", vec![0x47]));
        assert_eq!(result.failure().unwrap().reason, FailureReason::MangledClassname);
    }

    #[test]
    fn test_trivial_constructor_shortcut() {
        let mut w = CodeWriter::new();
        w.op(Opcode::GetLocal0)
            .op(Opcode::PushScope)
            .op(Opcode::GetLocal0)
            .op_u30(Opcode::ConstructSuper, 0)
            .op(Opcode::ReturnVoid);
        let body = MethodBody::new("Foo", w.finish().unwrap()).with_class("Foo").constructor().with_bounds(1, 0, 1);

        let result = compile(OptimizerFlags::DEFAULT, body.clone());
        assert!(matches!(result.callable(), Some(CompiledMethod::TrivialConstructor { .. })));

        let generic = compile(OptimizerFlags::DEFAULT.difference(OptimizerFlags::TRIVIAL_CTOR), body);
        assert!(matches!(generic.callable(), Some(CompiledMethod::Procedure(_))));
    }

    #[test]
    fn test_repeated_names_get_suffixes() {
        let p = pipeline(OptimizerFlags::DEFAULT);
        let mut paths = PathTable::new();
        let names: Vec<String> = (0..3)
            .map(|_| {
                let d = descriptor(MethodBody::new("run", vec![0x47]).with_class("Main"));
                p.compile(&d, &mut paths).callable().unwrap().name().to_string()
            })
            .collect();
        assert_eq!(names, ["Main_run", "Main_run_2", "Main_run_3"]);
    }
}
