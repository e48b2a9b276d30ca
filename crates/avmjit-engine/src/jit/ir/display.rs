//! Pretty-printing for procedures
//!
//! The printed form is the procedure text: used in diagnostics, in compile
//! logs at trace level, and by tests that check the emitted shape.

use std::fmt;

use super::instr::{Args, Block, Cond, ControlShape, NameExpr, Procedure, Stmt};
use crate::jit::runtime::value::Value;

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self.shape {
            ControlShape::Linear => "linear",
            ControlShape::Structured => "structured",
            ControlShape::Dispatcher => "dispatcher",
        };
        writeln!(
            f,
            "procedure {} (params: {}, locals: {}, stack: {}, scope: {}) [{}] {{",
            self.name, self.frame.params, self.frame.locals, self.frame.stack, self.frame.scope, shape
        )?;

        for (i, r) in self.names.iter().enumerate() {
            writeln!(f, "  n{} = {} ; #{}", i, r.name, r.pool_index)?;
        }
        if self.preamble.memory {
            writeln!(f, "  mem = lazy domain memory")?;
        }
        for (cell, name) in self.preamble.hoisted.iter().enumerate() {
            writeln!(f, "  h{} = hoist {}", cell, name)?;
        }
        if self.preamble.fast_cells > 0 {
            writeln!(f, "  probes: {}", self.preamble.fast_cells)?;
        }

        match self.shape {
            ControlShape::Dispatcher => {
                writeln!(f, "  ip = L0")?;
                match self.fuse {
                    Some(limit) => writeln!(f, "  dispatch ip (fuse {limit}) {{")?,
                    None => writeln!(f, "  dispatch ip {{")?,
                }
                for block in &self.blocks {
                    write_block(f, block, 2)?;
                }
                writeln!(f, "  }}")?;
            }
            ControlShape::Linear | ControlShape::Structured => {
                for block in &self.blocks {
                    write_stmts(f, &block.stmts, 1)?;
                }
            }
        }

        for (i, h) in self.handlers.iter().enumerate() {
            write!(f, "  catch[{}] @{}..@{} -> {}", i, h.start, h.end, h.target)?;
            match h.filter {
                Some(ty) => write!(f, " if {ty}")?,
                None => write!(f, " any")?,
            }
            writeln!(f, " (scope {})", h.scope_depth)?;
        }
        writeln!(f, "}}")
    }
}

fn indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        f.write_str("  ")?;
    }
    Ok(())
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &Block, depth: usize) -> fmt::Result {
    indent(f, depth)?;
    write!(f, "{}:", block.label)?;
    if !block.handlers.is_empty() {
        write!(f, " ; guarded by {:?}", block.handlers)?;
    }
    writeln!(f)?;
    write_stmts(f, &block.stmts, depth + 1)?;
    if let Some(next) = block.next {
        indent(f, depth + 1)?;
        writeln!(f, "-> {next}")?;
    }
    Ok(())
}

fn write_stmts(f: &mut fmt::Formatter<'_>, stmts: &[Stmt], depth: usize) -> fmt::Result {
    for stmt in stmts {
        indent(f, depth)?;
        if let Stmt::Unless { cond, body } = stmt {
            writeln!(f, "unless {cond} {{")?;
            write_stmts(f, body, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "}}")?;
        } else {
            writeln!(f, "{stmt}")?;
        }
    }
    Ok(())
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cond::Truthy(s) => write!(f, "{s}"),
            Cond::Falsy(s) => write!(f, "!{s}"),
            Cond::Compare { cmp, negate, lhs, rhs } => {
                if *negate {
                    f.write_str("!")?;
                }
                write!(f, "{cmp:?}({lhs}, {rhs})")
            }
        }
    }
}

impl fmt::Display for NameExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameExpr::Static(id) => write!(f, "{id}"),
            NameExpr::Runtime { template, ns, name } => {
                write!(f, "rtname({template}")?;
                if let Some(ns) = ns {
                    write!(f, ", ns={ns}")?;
                }
                if let Some(name) = name {
                    write!(f, ", name={name}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.count {
            0 => f.write_str("()"),
            1 => write!(f, "({})", self.base),
            n => write!(f, "({}..s{})", self.base, self.base.0 + n - 1),
        }
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        Value::Number(n) => format!("{n:?}"),
        other => other.to_string(),
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Const { dest, value } => write!(f, "{dest} = const {}", literal(value)),
            Stmt::Move { dest, src } => write!(f, "{dest} = {src}"),
            Stmt::Swap { a, b } => write!(f, "swap {a}, {b}"),

            Stmt::GetLocal { dest, local } => write!(f, "{dest} = {local}"),
            Stmt::SetLocal { local, src } => write!(f, "{local} = {src}"),
            Stmt::Kill(local) => write!(f, "kill {local}"),
            Stmt::IncLocal { local, delta, int } => {
                write!(f, "{local} {}= 1{}", if *delta > 0 { "+" } else { "-" }, if *int { " (int)" } else { "" })
            }

            Stmt::Unary { slot, op } => write!(f, "{slot} = {op:?} {slot}"),
            Stmt::Binary { dest, op, lhs, rhs } => write!(f, "{dest} = {op:?} {lhs}, {rhs}"),
            Stmt::Convert { slot, conv } => write!(f, "{slot} = {conv:?} {slot}"),
            Stmt::Coerce { slot, ty } => write!(f, "{slot} = coerce {slot} as {ty}"),
            Stmt::AsType { slot, ty } => write!(f, "{slot} = {slot} as {ty}"),
            Stmt::IsType { slot, ty } => write!(f, "{slot} = {slot} is {ty}"),

            Stmt::PushScope { dest, src, with } => {
                write!(f, "{dest} = {}scope {src}", if *with { "with " } else { "" })
            }
            Stmt::PopScope(scope) => write!(f, "pop {scope}"),
            Stmt::GetScopeObject { dest, scope } => write!(f, "{dest} = {scope}"),
            Stmt::GetOuterScope { dest, index } => write!(f, "{dest} = outer[{index}]"),
            Stmt::GetGlobalScope { dest } => write!(f, "{dest} = global"),
            Stmt::FindProperty { dest, name, strict, depth } => {
                write!(f, "{dest} = find{} {name} in c0..c{depth}", if *strict { ".strict" } else { "" })
            }
            Stmt::FindDef { dest, name } => write!(f, "{dest} = finddef {name}"),
            Stmt::GetLex { dest, name, depth } => write!(f, "{dest} = lex {name} in c0..c{depth}"),
            Stmt::GetHoisted { dest, cell, name, depth } => {
                write!(f, "{dest} = h{} ?= lex {name} in c0..c{depth}", cell.0)
            }

            Stmt::GetProperty { dest, obj, name, alias } => {
                write!(f, "{dest} = {obj}.[{name}]")?;
                if let Some(cell) = alias {
                    write!(f, " ; probe {cell}")?;
                }
                Ok(())
            }
            Stmt::GuardedChain { dest, obj, names } => {
                write!(f, "{dest} = guard {obj}")?;
                for name in names {
                    write!(f, ".[{name}]")?;
                }
                Ok(())
            }
            Stmt::SetProperty { obj, name, value } => write!(f, "{obj}.[{name}] = {value}"),
            Stmt::InitProperty { obj, name, value } => write!(f, "{obj}.[{name}] := {value}"),
            Stmt::DeleteProperty { dest, obj, name } => write!(f, "{dest} = delete {obj}.[{name}]"),
            Stmt::GetSuper { dest, obj, name } => write!(f, "{dest} = super({obj}).[{name}]"),
            Stmt::SetSuper { obj, name, value } => write!(f, "super({obj}).[{name}] = {value}"),
            Stmt::GetSlot { dest, obj, index } => write!(f, "{dest} = {obj}.slot[{index}]"),
            Stmt::SetSlot { obj, index, value } => write!(f, "{obj}.slot[{index}] = {value}"),
            Stmt::GetGlobalSlot { dest, index } => write!(f, "{dest} = global.slot[{index}]"),
            Stmt::SetGlobalSlot { index, value } => write!(f, "global.slot[{index}] = {value}"),

            Stmt::Call { dest, callee, receiver, args, fast } => {
                write!(f, "{dest} = call {callee}.bind({receiver}){args}")?;
                if let Some(cell) = fast {
                    write!(f, " ; fast if {cell}")?;
                }
                Ok(())
            }
            Stmt::Construct { dest, ctor, args } => write!(f, "{dest} = new {ctor}{args}"),
            Stmt::CallMethod { dest, receiver, disp, args } => {
                write!(f, "{dest} = {receiver}.method[{disp}]{args}")
            }
            Stmt::CallStatic { dest, receiver, method, args } => {
                write!(f, "{dest} = static[{method}].bind({receiver}){args}")
            }
            Stmt::CallProperty { dest, obj, name, args, lex } => {
                if let Some(dest) = dest {
                    write!(f, "{dest} = ")?;
                }
                write!(f, "{obj}.[{name}]{args}")?;
                if *lex {
                    f.write_str(" ; lex")?;
                }
                Ok(())
            }
            Stmt::CallSuper { dest, obj, name, args } => {
                if let Some(dest) = dest {
                    write!(f, "{dest} = ")?;
                }
                write!(f, "super({obj}).[{name}]{args}")
            }
            Stmt::ConstructProp { dest, obj, name, args } => write!(f, "{dest} = new {obj}.[{name}]{args}"),
            Stmt::ConstructSuper { obj, args } => write!(f, "super.construct({obj}){args}"),

            Stmt::NewObject { dest, pairs } => write!(f, "{dest} = object {{{pairs} pairs}}"),
            Stmt::NewArray { dest, count } => write!(f, "{dest} = array [{count}]"),
            Stmt::NewActivation { dest } => write!(f, "{dest} = activation"),
            Stmt::NewFunction { dest, method, depth } => {
                write!(f, "{dest} = closure method[{method}] over c0..c{depth}")
            }
            Stmt::NewCatch { dest, index } => write!(f, "{dest} = catch scope {index}"),
            Stmt::ApplyType { dest, count } => write!(f, "{dest} = {dest}.<{count} params>"),

            Stmt::HasNext { dest, obj, index } => write!(f, "{dest} = hasnext {obj}, {index}"),
            Stmt::HasNext2 { dest, object, index } => write!(f, "{dest} = hasnext2 {object}, {index}"),
            Stmt::NextName { dest, obj, index } => write!(f, "{dest} = nextname {obj}, {index}"),
            Stmt::NextValue { dest, obj, index } => write!(f, "{dest} = nextvalue {obj}, {index}"),

            Stmt::Load { slot, kind } => write!(f, "{slot} = mem.{kind:?}[{slot}]"),
            Stmt::Store { kind, value, addr } => write!(f, "mem.{kind:?}[{addr}] = {value}"),

            Stmt::Unless { cond, body } => write!(f, "unless {cond} {{ {} stmts }}", body.len()),
            Stmt::Jump(l) => write!(f, "ip = {l}; continue"),
            Stmt::Branch { cond, target } => write!(f, "if {cond} {{ ip = {target}; continue }}"),
            Stmt::Switch { index, default, cases } => {
                write!(f, "ip = switch {index} [")?;
                for (i, c) in cases.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, "] else {default}; continue")
            }
            Stmt::Return(Some(s)) => write!(f, "return {s}"),
            Stmt::Return(None) => f.write_str("return"),
            Stmt::Throw(s) => write!(f, "throw {s}"),
        }
    }
}
