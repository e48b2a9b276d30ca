//! Procedure verification
//!
//! Checks the structural promises the executor relies on: every slot,
//! scope slot and local is inside the frame, every label names a block,
//! names and cells index their tables, and each control shape only uses
//! the statements it allows.

use rustc_hash::FxHashSet;

use crate::jit::ir::{Args, Cond, ControlShape, Label, Local, NameExpr, NameId, Procedure, ScopeSlot, Slot, Stmt};
use crate::jit::runtime::MethodContext;
use super::traits::LoadError;

/// Verify `procedure` against its frame layout and `context`
pub fn verify(procedure: &Procedure, context: &MethodContext) -> Result<(), LoadError> {
    Verifier::new(procedure).run(context).map_err(|reason| LoadError::Invalid {
        procedure: procedure.name.clone(),
        reason,
    })
}

struct Verifier<'p> {
    procedure: &'p Procedure,
    labels: FxHashSet<Label>,
}

type Check = Result<(), String>;

impl<'p> Verifier<'p> {
    fn new(procedure: &'p Procedure) -> Self {
        Verifier { procedure, labels: procedure.blocks.iter().map(|b| b.label).collect() }
    }

    fn run(&self, context: &MethodContext) -> Check {
        let p = self.procedure;
        if p.blocks.is_empty() {
            return Err("no blocks".into());
        }
        if !p.blocks.windows(2).all(|w| w[0].label < w[1].label) {
            return Err("block labels are not strictly ascending".into());
        }
        if p.frame.locals == 0 || p.frame.locals <= p.frame.params {
            return Err(format!("{} locals cannot hold {} parameters and the receiver", p.frame.locals, p.frame.params));
        }
        if context.names.len() != p.names.len() {
            return Err(format!("context resolves {} names, procedure references {}", context.names.len(), p.names.len()));
        }
        if context.hoisted_len() != p.preamble.hoisted.len() {
            return Err("hoisted cell count differs from the context".into());
        }
        for &name in &p.preamble.hoisted {
            self.name(name)?;
        }

        match p.shape {
            ControlShape::Linear | ControlShape::Structured => {
                if p.blocks.len() != 1 {
                    return Err(format!("{:?} procedure has {} blocks", p.shape, p.blocks.len()));
                }
                if !p.handlers.is_empty() {
                    return Err(format!("{:?} procedure has exception handlers", p.shape));
                }
                if p.fuse.is_some() {
                    return Err("only dispatcher procedures carry a fuse".into());
                }
            }
            ControlShape::Dispatcher => {}
        }

        for handler in &p.handlers {
            self.label(handler.target)?;
            if handler.start >= handler.end {
                return Err(format!("handler region {}..{} is empty", handler.start, handler.end));
            }
            if handler.scope_depth > p.frame.scope {
                return Err(format!("handler scope depth {} exceeds the frame", handler.scope_depth));
            }
            if p.frame.stack == 0 {
                return Err("handlers need a stack slot for the caught value".into());
            }
            if let Some(filter) = handler.filter {
                self.name(filter)?;
            }
            if let Some(binding) = handler.binding {
                self.name(binding)?;
            }
        }

        for block in &p.blocks {
            for &h in &block.handlers {
                if usize::from(h) >= p.handlers.len() {
                    return Err(format!("block {} names missing handler {h}", block.label));
                }
            }
            if let Some(next) = block.next {
                self.label(next)?;
            }
            let ends_in_terminal = block.stmts.last().is_some_and(Stmt::is_terminal);
            if p.shape == ControlShape::Dispatcher && block.next.is_none() && !ends_in_terminal {
                return Err(format!("block {} falls through without a successor", block.label));
            }
            self.stmts(&block.stmts, 0)?;
        }
        Ok(())
    }

    fn stmts(&self, stmts: &[Stmt], nesting: usize) -> Check {
        for stmt in stmts {
            self.stmt(stmt, nesting)?;
        }
        Ok(())
    }

    fn stmt(&self, stmt: &Stmt, nesting: usize) -> Check {
        let shape = self.procedure.shape;
        match stmt {
            Stmt::Const { dest, .. } => self.slot(*dest),
            Stmt::Move { dest, src } => self.slots(&[*dest, *src]),
            Stmt::Swap { a, b } => self.slots(&[*a, *b]),

            Stmt::GetLocal { dest, local } => {
                self.slot(*dest)?;
                self.local(*local)
            }
            Stmt::SetLocal { local, src } => {
                self.local(*local)?;
                self.slot(*src)
            }
            Stmt::Kill(local) | Stmt::IncLocal { local, .. } => self.local(*local),

            Stmt::Unary { slot, .. } | Stmt::Convert { slot, .. } => self.slot(*slot),
            Stmt::Binary { dest, lhs, rhs, .. } => self.slots(&[*dest, *lhs, *rhs]),
            Stmt::Coerce { slot, ty } | Stmt::AsType { slot, ty } | Stmt::IsType { slot, ty } => {
                self.slot(*slot)?;
                self.name(*ty)
            }

            Stmt::PushScope { dest, src, .. } => {
                self.scope(*dest)?;
                self.slot(*src)
            }
            Stmt::PopScope(scope) => self.scope(*scope),
            Stmt::GetScopeObject { dest, scope } => {
                self.slot(*dest)?;
                self.scope(*scope)
            }
            Stmt::GetOuterScope { dest, .. } | Stmt::GetGlobalScope { dest } => self.slot(*dest),
            Stmt::FindProperty { dest, name, depth, .. } => {
                self.slot(*dest)?;
                self.name_expr(name)?;
                self.depth(*depth)
            }
            Stmt::FindDef { dest, name } => {
                self.slot(*dest)?;
                self.name(*name)
            }
            Stmt::GetLex { dest, name, depth } => {
                self.slot(*dest)?;
                self.name(*name)?;
                self.depth(*depth)
            }
            Stmt::GetHoisted { dest, cell, name, depth } => {
                self.slot(*dest)?;
                self.name(*name)?;
                self.depth(*depth)?;
                match self.procedure.preamble.hoisted.get(cell.0 as usize) {
                    Some(hoisted) if hoisted == name => Ok(()),
                    Some(_) => Err(format!("hoisted cell {cell} holds a different name than {name}")),
                    None => Err(format!("hoisted cell {cell} out of range")),
                }
            }

            Stmt::GetProperty { dest, obj, name, alias } => {
                self.slots(&[*dest, *obj])?;
                self.name_expr(name)?;
                match alias {
                    Some(cell) => self.fast_cell(cell.0),
                    None => Ok(()),
                }
            }
            Stmt::GuardedChain { dest, obj, names } => {
                self.slots(&[*dest, *obj])?;
                if names.is_empty() {
                    return Err("empty guarded chain".into());
                }
                names.iter().try_for_each(|n| self.name(*n))
            }
            Stmt::SetProperty { obj, name, value }
            | Stmt::InitProperty { obj, name, value }
            | Stmt::SetSuper { obj, name, value } => {
                self.slots(&[*obj, *value])?;
                self.name_expr(name)
            }
            Stmt::DeleteProperty { dest, obj, name } | Stmt::GetSuper { dest, obj, name } => {
                self.slots(&[*dest, *obj])?;
                self.name_expr(name)
            }
            Stmt::GetSlot { dest, obj, .. } => self.slots(&[*dest, *obj]),
            Stmt::SetSlot { obj, value, .. } => self.slots(&[*obj, *value]),
            Stmt::GetGlobalSlot { dest, .. } => self.slot(*dest),
            Stmt::SetGlobalSlot { value, .. } => self.slot(*value),

            Stmt::Call { dest, callee, receiver, args, fast } => {
                self.slots(&[*dest, *callee, *receiver])?;
                self.args(args)?;
                match fast {
                    Some(cell) => self.fast_cell(cell.0),
                    None => Ok(()),
                }
            }
            Stmt::Construct { dest, ctor, args } => {
                self.slots(&[*dest, *ctor])?;
                self.args(args)
            }
            Stmt::CallMethod { dest, receiver, args, .. } | Stmt::CallStatic { dest, receiver, args, .. } => {
                self.slots(&[*dest, *receiver])?;
                self.args(args)
            }
            Stmt::CallProperty { dest, obj, name, args, .. } | Stmt::CallSuper { dest, obj, name, args } => {
                if let Some(dest) = dest {
                    self.slot(*dest)?;
                }
                self.slot(*obj)?;
                self.name_expr(name)?;
                self.args(args)
            }
            Stmt::ConstructProp { dest, obj, name, args } => {
                self.slots(&[*dest, *obj])?;
                self.name_expr(name)?;
                self.args(args)
            }
            Stmt::ConstructSuper { obj, args } => {
                self.slot(*obj)?;
                self.args(args)
            }

            Stmt::NewObject { dest, pairs } => self.span(*dest, u32::from(*pairs) * 2),
            Stmt::NewArray { dest, count } => self.span(*dest, u32::from(*count)),
            Stmt::ApplyType { dest, count } => self.span(*dest, u32::from(*count) + 1),
            Stmt::NewActivation { dest } | Stmt::NewCatch { dest, .. } => self.slot(*dest),
            Stmt::NewFunction { dest, depth, .. } => {
                self.slot(*dest)?;
                self.depth(*depth)
            }

            Stmt::HasNext { dest, obj, index }
            | Stmt::NextName { dest, obj, index }
            | Stmt::NextValue { dest, obj, index } => self.slots(&[*dest, *obj, *index]),
            Stmt::HasNext2 { dest, object, index } => {
                self.slot(*dest)?;
                self.local(*object)?;
                self.local(*index)
            }

            Stmt::Load { slot, .. } => self.slot(*slot),
            Stmt::Store { value, addr, .. } => self.slots(&[*value, *addr]),

            Stmt::Unless { cond, body } => {
                if shape == ControlShape::Linear {
                    return Err("conditional in a linear procedure".into());
                }
                self.cond(cond)?;
                self.stmts(body, nesting + 1)
            }
            Stmt::Jump(target) => {
                self.dispatch_only("jump")?;
                self.label(*target)
            }
            Stmt::Branch { cond, target } => {
                self.dispatch_only("branch")?;
                self.cond(cond)?;
                self.label(*target)
            }
            Stmt::Switch { index, default, cases } => {
                self.dispatch_only("switch")?;
                self.slot(*index)?;
                self.label(*default)?;
                cases.iter().try_for_each(|l| self.label(*l))
            }
            Stmt::Return(value) => match value {
                Some(slot) => self.slot(*slot),
                None => Ok(()),
            },
            Stmt::Throw(slot) => self.slot(*slot),
        }
    }

    fn dispatch_only(&self, what: &str) -> Check {
        match self.procedure.shape {
            ControlShape::Dispatcher => Ok(()),
            shape => Err(format!("{what} in a {shape:?} procedure")),
        }
    }

    fn slot(&self, slot: Slot) -> Check {
        if slot.0 < self.procedure.frame.stack {
            Ok(())
        } else {
            Err(format!("slot {slot} outside a {}-slot stack", self.procedure.frame.stack))
        }
    }

    fn slots(&self, slots: &[Slot]) -> Check {
        slots.iter().try_for_each(|s| self.slot(*s))
    }

    /// `count` consecutive slots starting at `base`
    fn span(&self, base: Slot, count: u32) -> Check {
        self.slot(base)?;
        if u32::from(base.0) + count <= u32::from(self.procedure.frame.stack) {
            Ok(())
        } else {
            Err(format!("{count} slots from {base} overrun the stack"))
        }
    }

    fn args(&self, args: &Args) -> Check {
        if args.end() <= self.procedure.frame.stack {
            Ok(())
        } else {
            Err(format!("arguments {}..{} overrun the stack", args.base, args.end()))
        }
    }

    fn scope(&self, scope: ScopeSlot) -> Check {
        if scope.0 < self.procedure.frame.scope {
            Ok(())
        } else {
            Err(format!("scope slot {scope} outside a {}-entry scope stack", self.procedure.frame.scope))
        }
    }

    fn depth(&self, depth: u16) -> Check {
        if depth <= self.procedure.frame.scope {
            Ok(())
        } else {
            Err(format!("scope depth {depth} exceeds the frame"))
        }
    }

    fn local(&self, local: Local) -> Check {
        if local.0 < self.procedure.frame.locals {
            Ok(())
        } else {
            Err(format!("local {local} outside {} registers", self.procedure.frame.locals))
        }
    }

    fn name(&self, id: NameId) -> Check {
        match self.procedure.name(id) {
            Some(_) => Ok(()),
            None => Err(format!("name {id} not referenced")),
        }
    }

    fn name_expr(&self, name: &NameExpr) -> Check {
        self.name(name.template())?;
        if let NameExpr::Runtime { ns, name, .. } = name {
            for slot in ns.iter().chain(name.iter()) {
                self.slot(*slot)?;
            }
        }
        Ok(())
    }

    fn fast_cell(&self, cell: u32) -> Check {
        if cell < self.procedure.preamble.fast_cells {
            Ok(())
        } else {
            Err(format!("fast-call cell a{cell} out of range"))
        }
    }

    fn cond(&self, cond: &Cond) -> Check {
        match cond {
            Cond::Truthy(slot) | Cond::Falsy(slot) => self.slot(*slot),
            Cond::Compare { lhs, rhs, .. } => self.slots(&[*lhs, *rhs]),
        }
    }

    fn label(&self, label: Label) -> Check {
        if self.labels.contains(&label) {
            Ok(())
        } else {
            Err(format!("no block at {label}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::abc::ConstantPool;
    use crate::jit::ir::{Block, FrameLayout, Preamble};
    use crate::jit::runtime::{MethodRef, Value};

    fn procedure(shape: ControlShape, blocks: Vec<Block>) -> Procedure {
        Procedure {
            name: "p".into(),
            shape,
            blocks,
            handlers: Vec::new(),
            frame: FrameLayout { params: 0, locals: 1, stack: 2, scope: 1 },
            preamble: Preamble::default(),
            fuse: None,
            names: Vec::new(),
        }
    }

    fn block(label: usize, stmts: Vec<Stmt>, next: Option<usize>) -> Block {
        Block { label: Label(label), stmts, next: next.map(Label), handlers: Vec::new() }
    }

    fn check(p: &Procedure) -> Result<(), LoadError> {
        let ctx = MethodContext::new(
            p,
            MethodRef { name: Rc::from("p"), index: None },
            Rc::new(ConstantPool::new()),
            Rc::from(Vec::new()),
        );
        verify(p, &ctx)
    }

    fn ret_const() -> Vec<Stmt> {
        vec![Stmt::Const { dest: Slot(0), value: Value::Int(1) }, Stmt::Return(Some(Slot(0)))]
    }

    #[test]
    fn test_accepts_linear() {
        assert!(check(&procedure(ControlShape::Linear, vec![block(0, ret_const(), None)])).is_ok());
    }

    #[test]
    fn test_rejects_slot_outside_frame() {
        let stmts = vec![Stmt::Return(Some(Slot(2)))];
        let err = check(&procedure(ControlShape::Linear, vec![block(0, stmts, None)])).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { .. }));
        assert!(err.to_string().contains("s2"));
    }

    #[test]
    fn test_rejects_jump_outside_dispatcher() {
        let stmts = vec![Stmt::Jump(Label(0))];
        assert!(check(&procedure(ControlShape::Structured, vec![block(0, stmts, None)])).is_err());
    }

    #[test]
    fn test_rejects_missing_label_and_fallthrough() {
        let jump = procedure(ControlShape::Dispatcher, vec![block(0, vec![Stmt::Jump(Label(9))], None)]);
        assert!(check(&jump).is_err());

        let open = procedure(
            ControlShape::Dispatcher,
            vec![block(0, vec![Stmt::Const { dest: Slot(0), value: Value::Null }], None)],
        );
        assert!(check(&open).is_err());
    }

    #[test]
    fn test_rejects_unreferenced_name_and_cell() {
        let name = vec![Stmt::FindDef { dest: Slot(0), name: NameId(0) }, Stmt::Return(None)];
        assert!(check(&procedure(ControlShape::Linear, vec![block(0, name, None)])).is_err());

        let call = vec![
            Stmt::Call {
                dest: Slot(0),
                callee: Slot(0),
                receiver: Slot(1),
                args: Args::new(Slot(2), 0),
                fast: Some(crate::jit::ir::CellId(0)),
            },
            Stmt::Return(None),
        ];
        assert!(check(&procedure(ControlShape::Linear, vec![block(0, call, None)])).is_err());
    }

    #[test]
    fn test_rejects_unsorted_blocks() {
        let p = procedure(
            ControlShape::Dispatcher,
            vec![block(4, ret_const(), None), block(0, vec![Stmt::Jump(Label(4))], None)],
        );
        assert!(check(&p).is_err());
    }
}
