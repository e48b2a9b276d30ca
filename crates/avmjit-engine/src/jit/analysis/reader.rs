//! Operand reader
//!
//! Cursor over a method's code bytes. Each read either consumes a whole
//! operand or fails without moving the cursor.

use super::decoder::DecodeError;

/// Read position inside a code array
pub struct CodeReader<'a> {
    code: &'a [u8],
    pos: usize,
    /// Offset of the instruction being decoded, for error reports
    instr: usize,
}

impl<'a> CodeReader<'a> {
    pub fn new(code: &'a [u8], pos: usize) -> Self {
        CodeReader { code, pos, instr: pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.code.len()
    }

    /// Mark the start of a new instruction
    pub fn begin_instruction(&mut self) {
        self.instr = self.pos;
    }

    fn truncated(&self) -> DecodeError {
        DecodeError::UnexpectedEnd(self.instr)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.code.get(self.pos).ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(byte)
    }

    /// Signed byte, sign-extended from bit 7
    pub fn read_s8(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_u8()? as i8 as i32)
    }

    /// Little-endian base-128 varint of at most five bytes.
    ///
    /// Bits of the fifth byte that land beyond bit 31 are dropped; the value
    /// is never sign-extended.
    pub fn read_u30(&mut self) -> Result<u32, DecodeError> {
        let start = self.pos;
        let mut result: u32 = 0;
        for i in 0..5 {
            let Some(&byte) = self.code.get(self.pos) else {
                self.pos = start;
                return Err(self.truncated());
            };
            self.pos += 1;
            result |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(result)
    }

    /// Three bytes little-endian, sign-extended from bit 23
    pub fn read_s24(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.code.get(self.pos..self.pos + 3).ok_or_else(|| self.truncated())?;
        self.pos += 3;
        let raw = bytes[0] as i32 | (bytes[1] as i32) << 8 | (bytes[2] as i32) << 16;
        Ok((raw << 8) >> 8)
    }
}

/// Decode a single u30 from the start of `bytes`
pub fn decode_u30(bytes: &[u8]) -> Result<u32, DecodeError> {
    CodeReader::new(bytes, 0).read_u30()
}
