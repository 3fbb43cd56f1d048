use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use variantly::Variantly;

use crate::name::Name;

/// Width in bytes of every encoded instruction.
///
/// ```text
/// ┌────────┬──────────────┬──────────────┬──────────────┐
/// │ opcode │ dst operand  │  a operand   │  b operand   │
/// │  u8    │ tag u8 + u32 │ tag u8 + u32 │ tag u8 + u32 │
/// └────────┴──────────────┴──────────────┴──────────────┘
/// ```
pub const INSTRUCTION_SIZE: usize = 1 + 3 * Operand::SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    /// Ends the subroutine
    End,
    /// Copy `a` into `dst`
    Mov,
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    /// `dst = 1.0` if `a < b`, else `0.0`
    Lt,
    /// `dst = 1.0` if `a <= b`, else `0.0`
    Le,
    /// `dst = 1.0` if `a > b`, else `0.0`
    Gt,
    Neg,
    Abs,
    Sqrt,
    Sin,
    Cos,
    /// Flag the current particle as dead if `a` is nonzero and stop the subroutine
    Kill,
    /// Commit the staged outputs as one render instance if `a` is nonzero
    Instance,
}

impl Opcode {
    const ALL: [Opcode; 18] = [
        Opcode::End,
        Opcode::Mov,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Min,
        Opcode::Max,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Gt,
        Opcode::Neg,
        Opcode::Abs,
        Opcode::Sqrt,
        Opcode::Sin,
        Opcode::Cos,
        Opcode::Kill,
        Opcode::Instance,
    ];

    pub fn parse(byte: u8) -> Option<Opcode> {
        Self::ALL.get(byte as usize).copied()
    }

    fn binary(self) -> Option<BinaryOp> {
        Some(match self {
            Opcode::Add => BinaryOp::Add,
            Opcode::Sub => BinaryOp::Sub,
            Opcode::Mul => BinaryOp::Mul,
            Opcode::Div => BinaryOp::Div,
            Opcode::Min => BinaryOp::Min,
            Opcode::Max => BinaryOp::Max,
            Opcode::Lt => BinaryOp::Lt,
            Opcode::Le => BinaryOp::Le,
            Opcode::Gt => BinaryOp::Gt,
            _ => return None,
        })
    }

    fn unary(self) -> Option<UnaryOp> {
        Some(match self {
            Opcode::Neg => UnaryOp::Neg,
            Opcode::Abs => UnaryOp::Abs,
            Opcode::Sqrt => UnaryOp::Sqrt,
            Opcode::Sin => UnaryOp::Sin,
            Opcode::Cos => UnaryOp::Cos,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Lt,
    Le,
    Gt,
}

impl BinaryOp {
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::Lt => flag(a < b),
            BinaryOp::Le => flag(a <= b),
            BinaryOp::Gt => flag(a > b),
        }
    }

    pub fn opcode(self) -> Opcode {
        match self {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Min => Opcode::Min,
            BinaryOp::Max => Opcode::Max,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::Le => Opcode::Le,
            BinaryOp::Gt => Opcode::Gt,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
    Sin,
    Cos,
}

impl UnaryOp {
    pub fn apply(self, a: f32) -> f32 {
        match self {
            UnaryOp::Neg => -a,
            UnaryOp::Abs => a.abs(),
            UnaryOp::Sqrt => a.sqrt(),
            UnaryOp::Sin => a.sin(),
            UnaryOp::Cos => a.cos(),
        }
    }

    pub fn opcode(self) -> Opcode {
        match self {
            UnaryOp::Neg => Opcode::Neg,
            UnaryOp::Abs => Opcode::Abs,
            UnaryOp::Sqrt => Opcode::Sqrt,
            UnaryOp::Sin => Opcode::Sin,
            UnaryOp::Cos => Opcode::Cos,
        }
    }
}

fn flag(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Where an instruction reads a value from or writes it to.
#[derive(Clone, Copy, Debug, PartialEq, Variantly)]
pub enum Operand {
    /// Absent operand
    None,
    Literal(f32),
    /// A constant of the bound program, looked up by name
    Constant(Name),
    /// A channel, at the index of the particle being executed
    Channel(Name),
    /// A transient register, cleared before every run
    Register(u32),
    /// One of the values handed to the subroutine: emit arguments, `dt`, or the camera position
    Input(u32),
    /// A slot of the instance being staged by the output subroutine. Write only.
    Output(u32),
    /// An operand with a tag this VM does not know. Reads as zero, writes are dropped.
    Invalid(u8),
}

impl Operand {
    pub const SIZE: usize = 5;

    const TAG_LITERAL: u8 = 0;
    const TAG_CONSTANT: u8 = 1;
    const TAG_CHANNEL: u8 = 2;
    const TAG_REGISTER: u8 = 3;
    const TAG_INPUT: u8 = 4;
    const TAG_OUTPUT: u8 = 5;
    const TAG_NONE: u8 = 0xFF;

    pub fn decode(bytes: &[u8; Self::SIZE]) -> Self {
        let payload = LittleEndian::read_u32(&bytes[1..]);
        match bytes[0] {
            Self::TAG_LITERAL => Operand::Literal(f32::from_bits(payload)),
            Self::TAG_CONSTANT => Operand::Constant(Name(payload)),
            Self::TAG_CHANNEL => Operand::Channel(Name(payload)),
            Self::TAG_REGISTER => Operand::Register(payload),
            Self::TAG_INPUT => Operand::Input(payload),
            Self::TAG_OUTPUT => Operand::Output(payload),
            Self::TAG_NONE => Operand::None,
            tag => Operand::Invalid(tag),
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let (tag, payload) = match *self {
            Operand::None => (Self::TAG_NONE, 0),
            Operand::Literal(value) => (Self::TAG_LITERAL, value.to_bits()),
            Operand::Constant(name) => (Self::TAG_CONSTANT, name.0),
            Operand::Channel(name) => (Self::TAG_CHANNEL, name.0),
            Operand::Register(i) => (Self::TAG_REGISTER, i),
            Operand::Input(i) => (Self::TAG_INPUT, i),
            Operand::Output(i) => (Self::TAG_OUTPUT, i),
            Operand::Invalid(tag) => (tag, 0),
        };
        let mut bytes = [tag, 0, 0, 0, 0];
        LittleEndian::write_u32(&mut bytes[1..], payload);
        bytes
    }
}

impl From<f32> for Operand {
    fn from(value: f32) -> Self {
        Operand::Literal(value)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => write!(f, "_"),
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::Constant(name) => write!(f, "const[{name}]"),
            Operand::Channel(name) => write!(f, "chan[{name}]"),
            Operand::Register(i) => write!(f, "r{i}"),
            Operand::Input(i) => write!(f, "in{i}"),
            Operand::Output(i) => write!(f, "out{i}"),
            Operand::Invalid(tag) => write!(f, "?{tag}"),
        }
    }
}

/// A decoded instruction
#[derive(Clone, Copy, Debug, PartialEq, Variantly)]
pub enum Op {
    End,
    /// An opcode this VM does not know. Skipped.
    Noop(u8),
    /// `dst = a`
    Mov(Operand, Operand),
    /// `dst = a <op> b`
    Binary(BinaryOp, Operand, Operand, Operand),
    /// `dst = <op> a`
    Unary(UnaryOp, Operand, Operand),
    Kill(Operand),
    Instance(Operand),
}

impl Op {
    pub fn decode(bytes: &[u8; INSTRUCTION_SIZE]) -> Op {
        let operand = |i: usize| {
            let start = 1 + i * Operand::SIZE;
            let mut raw = [0u8; Operand::SIZE];
            raw.copy_from_slice(&bytes[start..start + Operand::SIZE]);
            Operand::decode(&raw)
        };
        let (dst, a, b) = (operand(0), operand(1), operand(2));

        let Some(opcode) = Opcode::parse(bytes[0]) else {
            return Op::Noop(bytes[0]);
        };
        if let Some(op) = opcode.binary() {
            return Op::Binary(op, dst, a, b);
        }
        if let Some(op) = opcode.unary() {
            return Op::Unary(op, dst, a);
        }
        match opcode {
            Opcode::End => Op::End,
            Opcode::Mov => Op::Mov(dst, a),
            Opcode::Kill => Op::Kill(a),
            Opcode::Instance => Op::Instance(a),
            _ => Op::Noop(bytes[0]),
        }
    }

    pub fn encode(&self) -> [u8; INSTRUCTION_SIZE] {
        let (opcode, dst, a, b) = match *self {
            Op::End => (Opcode::End as u8, Operand::None, Operand::None, Operand::None),
            Op::Noop(byte) => (byte, Operand::None, Operand::None, Operand::None),
            Op::Mov(dst, a) => (Opcode::Mov as u8, dst, a, Operand::None),
            Op::Binary(op, dst, a, b) => (op.opcode() as u8, dst, a, b),
            Op::Unary(op, dst, a) => (op.opcode() as u8, dst, a, Operand::None),
            Op::Kill(a) => (Opcode::Kill as u8, Operand::None, a, Operand::None),
            Op::Instance(a) => (Opcode::Instance as u8, Operand::None, a, Operand::None),
        };
        let mut bytes = [0u8; INSTRUCTION_SIZE];
        bytes[0] = opcode;
        for (i, operand) in [dst, a, b].iter().enumerate() {
            let start = 1 + i * Operand::SIZE;
            bytes[start..start + Operand::SIZE].copy_from_slice(&operand.encode());
        }
        bytes
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::End => write!(f, "end"),
            Op::Noop(byte) => write!(f, "noop {byte:#04x}"),
            Op::Mov(dst, a) => write!(f, "mov {dst}, {a}"),
            Op::Binary(op, dst, a, b) => write!(f, "{} {dst}, {a}, {b}", format!("{op:?}").to_lowercase()),
            Op::Unary(op, dst, a) => write!(f, "{} {dst}, {a}", format!("{op:?}").to_lowercase()),
            Op::Kill(a) => write!(f, "kill {a}"),
            Op::Instance(a) => write!(f, "instance {a}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_opcode_is_noop() {
        let mut bytes = Op::End.encode();
        bytes[0] = 200;
        assert_eq!(Op::decode(&bytes), Op::Noop(200));
    }

    #[test]
    fn test_unknown_operand_tag_is_invalid() {
        let mut bytes = Op::Mov(Operand::Register(0), Operand::Literal(1.0)).encode();
        bytes[1 + Operand::SIZE] = 42;
        assert_eq!(Op::decode(&bytes), Op::Mov(Operand::Register(0), Operand::Invalid(42)));
    }

    #[test]
    fn test_binary_decodes_all_operands() {
        let op = Op::Binary(
            BinaryOp::Sub,
            Operand::Channel(Name::new("life")),
            Operand::Channel(Name::new("life")),
            Operand::Input(0),
        );
        assert_eq!(Op::decode(&op.encode()), op);
        assert_eq!(op.encode()[0], Opcode::Sub as u8);
    }

    #[test]
    fn test_comparisons_yield_flags() {
        assert_eq!(BinaryOp::Le.apply(0.0, 0.0), 1.0);
        assert_eq!(BinaryOp::Lt.apply(0.0, 0.0), 0.0);
        assert_eq!(BinaryOp::Gt.apply(2.0, 1.0), 1.0);
    }

    #[test]
    fn test_display() {
        let op = Op::Mov(Operand::Register(2), Operand::Literal(1.5));
        assert_eq!(op.to_string(), "mov r2, 1.5");
    }
}
