use itertools::Itertools;
use particle_vm::{BinaryOp, Name, Op, Operand, UnaryOp};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AssembleError {
    #[error("unknown channel `{0}`")]
    UnknownChannel(String),
    #[error("unknown constant `{0}`")]
    UnknownConstant(String),
    #[error("register r{0} is out of range, {1} declared")]
    Register(usize, usize),
    #[error("output out{0} is out of range, {1} declared")]
    Output(usize, usize),
    #[error("input in{0} does not fit the operand encoding")]
    Input(usize),
    #[error("`{0:?}` cannot be written to")]
    ReadOnly(Arg),
    #[error("output out{0} cannot be read")]
    WriteOnly(usize),
}

/// An operand as written by hand, with names still as strings
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    None,
    Lit(f32),
    Const(String),
    Chan(String),
    Reg(usize),
    In(usize),
    Out(usize),
}

pub fn lit(value: f32) -> Arg {
    Arg::Lit(value)
}

pub fn konst(name: &str) -> Arg {
    Arg::Const(name.to_string())
}

pub fn chan(name: &str) -> Arg {
    Arg::Chan(name.to_string())
}

pub fn reg(i: usize) -> Arg {
    Arg::Reg(i)
}

pub fn input(i: usize) -> Arg {
    Arg::In(i)
}

pub fn out(i: usize) -> Arg {
    Arg::Out(i)
}

/// One instruction of a subroutine
#[derive(Clone, Debug, PartialEq)]
pub enum Asm {
    End,
    Mov(Arg, Arg),
    Binary(BinaryOp, Arg, Arg, Arg),
    Unary(UnaryOp, Arg, Arg),
    Kill(Arg),
    Instance(Arg),
}

/// The names and sizes a subroutine is checked against
#[derive(Clone, Copy, Debug)]
pub struct Tables<'a> {
    pub channels: &'a [String],
    pub constants: &'a [String],
    pub registers: usize,
    pub outputs: usize,
}

impl Tables<'_> {
    fn source(&self, arg: &Arg) -> Result<Operand, AssembleError> {
        Ok(match arg {
            Arg::None => Operand::None,
            Arg::Lit(value) => Operand::Literal(*value),
            Arg::Const(name) => {
                if !self.constants.contains(name) {
                    return Err(AssembleError::UnknownConstant(name.clone()));
                }
                Operand::Constant(Name::new(name))
            }
            Arg::Chan(name) => {
                if !self.channels.contains(name) {
                    return Err(AssembleError::UnknownChannel(name.clone()));
                }
                Operand::Channel(Name::new(name))
            }
            Arg::Reg(i) => {
                if *i >= self.registers {
                    return Err(AssembleError::Register(*i, self.registers));
                }
                Operand::Register(*i as u32)
            }
            Arg::In(i) => Operand::Input(u32::try_from(*i).map_err(|_| AssembleError::Input(*i))?),
            Arg::Out(i) => return Err(AssembleError::WriteOnly(*i)),
        })
    }

    fn destination(&self, arg: &Arg) -> Result<Operand, AssembleError> {
        match arg {
            Arg::Out(i) => {
                if *i >= self.outputs {
                    return Err(AssembleError::Output(*i, self.outputs));
                }
                Ok(Operand::Output(*i as u32))
            }
            Arg::Chan(_) | Arg::Reg(_) => self.source(arg),
            _ => Err(AssembleError::ReadOnly(arg.clone())),
        }
    }
}

/// Encode a subroutine, appending an [Op::End] if it does not finish with one.
///
/// Every instruction is checked, and all errors are reported together.
pub fn assemble<'a>(asm: impl IntoIterator<Item = &'a Asm>, tables: &Tables) -> Result<Vec<u8>, Vec<AssembleError>> {
    let ops = asm.into_iter().map(|asm| -> Result<Op, AssembleError> {
        Ok(match asm {
            Asm::End => Op::End,
            Asm::Mov(dst, a) => Op::Mov(tables.destination(dst)?, tables.source(a)?),
            Asm::Binary(op, dst, a, b) => Op::Binary(*op, tables.destination(dst)?, tables.source(a)?, tables.source(b)?),
            Asm::Unary(op, dst, a) => Op::Unary(*op, tables.destination(dst)?, tables.source(a)?),
            Asm::Kill(a) => Op::Kill(tables.source(a)?),
            Asm::Instance(a) => Op::Instance(tables.source(a)?),
        })
    });
    let (mut ops, errs): (Vec<Op>, Vec<AssembleError>) = ops.partition_result();
    if !errs.is_empty() {
        return Err(errs);
    }
    if !ops.last().is_some_and(Op::is_end) {
        ops.push(Op::End);
    }

    Ok(ops.iter().flat_map(Op::encode).collect_vec())
}
