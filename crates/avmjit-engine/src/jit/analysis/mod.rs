//! Bytecode analysis: operand reading, decoding, stack effects, depth
//! simulation and the annotation rewrite pass

pub mod decoder;
pub mod depth;
pub mod effects;
pub mod reader;
pub mod rewrite;

pub use decoder::{decode_at, decode_method, DecodeError, DecodedInstr, MnOperand, Op};
pub use depth::{analyze, listing_around, AnalyzeError, ExceptionRegion, Instruction, MethodAnalysis, ValueTag};
pub use effects::Effect;
pub use rewrite::rewrite;
