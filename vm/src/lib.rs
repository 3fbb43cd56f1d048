//! Bytecode for particle emitters: the program resource, its instruction set and the interpreter that
//! runs one subroutine against one particle at a time.

pub mod backend;
pub mod cursor;
pub mod interpret;
pub mod name;
pub mod op;
pub mod program;
pub mod state;

pub use backend::{Backend, NoopBackend};
pub use interpret::{Halt, Vm, VmConfig};
pub use name::Name;
pub use op::{BinaryOp, Op, Operand, UnaryOp, INSTRUCTION_SIZE};
pub use program::{Program, ProgramError, ProgramParts, MAX_CHANNELS, MAX_CONSTANTS, MAX_OUTPUTS, MAX_REGISTERS};
