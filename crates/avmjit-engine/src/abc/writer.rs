//! Reference encoder for AVM2 code streams
//!
//! Used to build method bodies in tests, benchmarks and hosts that synthesize
//! small trampolines. Branches are written against labels and patched when
//! the code is finished.

use super::opcode::Opcode;

/// Error finishing a code stream
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Label {0} was referenced but never bound")]
    UnboundLabel(usize),
    #[error("Branch offset {0} does not fit in 24 bits")]
    OffsetOutOfRange(i64),
}

/// A branch target not yet bound to a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

struct Fixup {
    /// Where the s24 field starts
    at: usize,
    /// Position the offset is relative to
    base: usize,
    label: Label,
}

/// Append a u30 varint
pub fn write_u30(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Append a little-endian s24
pub fn write_s24(out: &mut Vec<u8>, value: i32) {
    let bytes = value.to_le_bytes();
    out.extend_from_slice(&bytes[..3]);
}

/// Builder for a method's code bytes
#[derive(Default)]
pub struct CodeWriter {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current byte offset
    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op.to_u8());
        self
    }

    pub fn byte(&mut self, value: u8) -> &mut Self {
        self.code.push(value);
        self
    }

    pub fn u30(&mut self, value: u32) -> &mut Self {
        write_u30(&mut self.code, value);
        self
    }

    pub fn op_u30(&mut self, op: Opcode, value: u32) -> &mut Self {
        self.op(op).u30(value)
    }

    pub fn op_u30_u30(&mut self, op: Opcode, a: u32, b: u32) -> &mut Self {
        self.op(op).u30(a).u30(b)
    }

    pub fn push_byte(&mut self, value: i8) -> &mut Self {
        self.op(Opcode::PushByte).byte(value as u8)
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the current position
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.code.len());
        self
    }

    /// Emit a branch opcode targeting `label`
    pub fn branch(&mut self, op: Opcode, label: Label) -> &mut Self {
        self.op(op);
        let at = self.code.len();
        self.code.extend_from_slice(&[0, 0, 0]);
        self.fixups.push(Fixup { at, base: at + 3, label });
        self
    }

    /// Emit `lookupswitch`; offsets are relative to the instruction start
    pub fn lookup_switch(&mut self, default: Label, cases: &[Label]) -> &mut Self {
        let base = self.code.len();
        self.op(Opcode::LookupSwitch);
        for (i, &label) in std::iter::once(&default).chain(cases).enumerate() {
            if i == 1 {
                write_u30(&mut self.code, cases.len().saturating_sub(1) as u32);
            }
            let at = self.code.len();
            self.code.extend_from_slice(&[0, 0, 0]);
            self.fixups.push(Fixup { at, base, label });
        }
        if cases.is_empty() {
            // A switch always carries at least one case offset.
            write_u30(&mut self.code, 0);
            let at = self.code.len();
            self.code.extend_from_slice(&[0, 0, 0]);
            self.fixups.push(Fixup { at, base, label: default });
        }
        self
    }

    /// Patch branches and return the code bytes
    pub fn finish(mut self) -> Result<Vec<u8>, WriteError> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0].ok_or(WriteError::UnboundLabel(fixup.label.0))?;
            let offset = target as i64 - fixup.base as i64;
            if !(-(1 << 23)..(1 << 23)).contains(&offset) {
                return Err(WriteError::OffsetOutOfRange(offset));
            }
            let bytes = (offset as i32).to_le_bytes();
            self.code[fixup.at..fixup.at + 3].copy_from_slice(&bytes[..3]);
        }
        Ok(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_u30() {
        let mut out = Vec::new();
        write_u30(&mut out, 0);
        write_u30(&mut out, 128);
        assert_eq!(out, vec![0x00, 0x80, 0x01]);
    }

    #[test]
    fn test_backward_branch() {
        let mut w = CodeWriter::new();
        let top = w.new_label();
        w.bind(top).op(Opcode::Nop).branch(Opcode::Jump, top);
        let code = w.finish().unwrap();
        // jump at 1, next instruction at 5, target 0 => -5
        assert_eq!(code, vec![0x02, 0x10, 0xFB, 0xFF, 0xFF]);
    }

    #[test]
    fn test_unbound_label() {
        let mut w = CodeWriter::new();
        let l = w.new_label();
        w.branch(Opcode::Jump, l);
        assert!(matches!(w.finish(), Err(WriteError::UnboundLabel(0))));
    }
}
