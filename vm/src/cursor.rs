use crate::op::{Op, INSTRUCTION_SIZE};

/// A read-only, bounds-checked view into bytecode, positioned at an instruction.
///
/// ```text
///   offset
///     │
///   ┌─▼──────────────┬────────────────┬────────────────┬─────┐
///   │ instruction 0  │ instruction 1  │ instruction 2  │ ... │ < too short: decoding stops
///   └────────────────┴────────────────┴────────────────┴─────┘
/// ```
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    bytecode: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytecode: &'a [u8], offset: usize) -> Self {
        Self {
            bytecode,
            position: offset,
        }
    }

    /// Byte offset of the next instruction to decode
    pub fn position(&self) -> usize {
        self.position
    }

    /// Decode the instruction under the cursor and advance past it.
    ///
    /// Returns [None] once fewer than [INSTRUCTION_SIZE] bytes remain.
    pub fn next_op(&mut self) -> Option<Op> {
        let end = self.position.checked_add(INSTRUCTION_SIZE)?;
        let bytes: &[u8; INSTRUCTION_SIZE] = self.bytecode.get(self.position..end)?.try_into().ok()?;
        self.position = end;
        Some(Op::decode(bytes))
    }
}

impl Iterator for Cursor<'_> {
    type Item = Op;

    fn next(&mut self) -> Option<Op> {
        self.next_op()
    }
}

#[cfg(test)]
mod tests {
    use super::Cursor;
    use crate::op::{Op, Operand, INSTRUCTION_SIZE};
    use proptest::prelude::*;

    #[test]
    fn test_stops_on_truncated_instruction() {
        let mut bytecode = Op::Mov(Operand::Register(0), Operand::Literal(1.0)).encode().to_vec();
        bytecode.extend_from_slice(&[1, 2, 3]);
        let mut cursor = Cursor::new(&bytecode, 0);
        assert!(cursor.next_op().is_some());
        assert_eq!(cursor.position(), INSTRUCTION_SIZE);
        assert!(cursor.next_op().is_none());
    }

    proptest! {
        #[test]
        fn test_never_reads_past_the_end(
            bytecode in prop::collection::vec(prop::bits::u8::ANY, 0..128),
            offset in 0..256usize,
        ) {
            let ops = Cursor::new(&bytecode, offset).count();
            prop_assert_eq!(ops, bytecode.len().saturating_sub(offset) / INSTRUCTION_SIZE);
        }
    }
}
