//! Procedure IR
//!
//! Statements over fixed frame slots, grouped into label-keyed blocks.
//! Generated by the pipeline, verified and loaded by a backend.

pub mod display;
pub mod instr;

pub use instr::{
    Args, Block, CellId, Cond, ControlShape, FrameLayout, Handler, Label, Local, NameExpr, NameId, Preamble,
    Procedure, ReferencedName, ScopeSlot, Slot, Stmt,
};
