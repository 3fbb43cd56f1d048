//! Assembler for particle programs.
//!
//! Turns hand-written subroutines into the resource format loaded by [particle_vm::Program].

pub mod assemble;
pub mod build;

pub mod prelude {
    pub use crate::assemble::{chan, input, konst, lit, out, reg, Arg, Asm, AssembleError};
    pub use crate::build::{BuildError, ProgramBuilder};
    pub use particle_vm::{BinaryOp, UnaryOp};
}
