use itertools::Itertools;
use particle_vm::{Name, Program, ProgramError, ProgramParts};
use thiserror::Error;
use tracing::debug;

use crate::assemble::{assemble, AssembleError, Asm, Tables};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{subroutine} subroutine failed to assemble: {errors:?}")]
    Assemble {
        subroutine: &'static str,
        errors: Vec<AssembleError>,
    },
    #[error("`{0}` is declared more than once")]
    Duplicate(String),
    #[error(transparent)]
    Program(#[from] ProgramError),
}

/// Lays out the three subroutines of a program and its name tables.
///
/// The update subroutine goes first so it starts at byte 0, followed by emit and output.
///
/// # Example
///
/// ```
/// use particle_lang::prelude::*;
///
/// let program = ProgramBuilder::default()
///     .channel("life")
///     .emit([Asm::Mov(chan("life"), input(0))])
///     .update([
///         Asm::Binary(BinaryOp::Sub, chan("life"), chan("life"), input(0)),
///         Asm::Binary(BinaryOp::Le, reg(0), chan("life"), lit(0.0)),
///         Asm::Kill(reg(0)),
///     ])
///     .registers(1)
///     .build("fx/fade.pvm")
///     .unwrap();
/// assert_eq!(program.channels_count(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ProgramBuilder {
    channels: Vec<String>,
    constants: Vec<(String, f32)>,
    registers: usize,
    outputs: usize,
    material: Option<String>,
    update: Vec<Asm>,
    emit: Vec<Asm>,
    output: Vec<Asm>,
}

impl ProgramBuilder {
    pub fn channel(mut self, name: &str) -> Self {
        self.channels.push(name.to_string());
        self
    }

    pub fn constant(mut self, name: &str, value: f32) -> Self {
        self.constants.push((name.to_string(), value));
        self
    }

    pub fn registers(mut self, count: usize) -> Self {
        self.registers = count;
        self
    }

    pub fn outputs(mut self, count: usize) -> Self {
        self.outputs = count;
        self
    }

    pub fn material(mut self, path: &str) -> Self {
        self.material = Some(path.to_string());
        self
    }

    pub fn update(mut self, code: impl IntoIterator<Item = Asm>) -> Self {
        self.update = code.into_iter().collect();
        self
    }

    pub fn emit(mut self, code: impl IntoIterator<Item = Asm>) -> Self {
        self.emit = code.into_iter().collect();
        self
    }

    pub fn output(mut self, code: impl IntoIterator<Item = Asm>) -> Self {
        self.output = code.into_iter().collect();
        self
    }

    pub fn build(&self, path: &str) -> Result<Program, BuildError> {
        let names = self.channels.iter().chain(self.constants.iter().map(|(name, _)| name));
        if let Some(name) = names.duplicates().next() {
            return Err(BuildError::Duplicate(name.clone()));
        }

        let constant_names = self.constants.iter().map(|(name, _)| name.clone()).collect_vec();
        let tables = Tables {
            channels: &self.channels,
            constants: &constant_names,
            registers: self.registers,
            outputs: self.outputs,
        };
        let subroutine = |subroutine: &'static str, code: &[Asm]| {
            assemble(code, &tables).map_err(|errors| BuildError::Assemble { subroutine, errors })
        };
        let mut bytecode = subroutine("update", &self.update)?;
        let emit_offset = bytecode.len();
        bytecode.extend(subroutine("emit", &self.emit)?);
        let output_offset = bytecode.len();
        bytecode.extend(subroutine("output", &self.output)?);

        debug!(path, bytes = bytecode.len(), emit_offset, output_offset, "assembled particle program");

        Ok(Program::new(
            path,
            ProgramParts {
                bytecode,
                emit_offset,
                output_offset,
                channels: self.channels.iter().map(|name| Name::new(name)).collect(),
                registers_count: self.registers,
                outputs_count: self.outputs,
                constants: self.constants.iter().map(|(name, value)| (Name::new(name), *value)).collect(),
                material: self.material.clone(),
            },
        )?)
    }

    /// The resource bytes [Program::load] reads
    pub fn to_bytes(&self) -> Result<Vec<u8>, BuildError> {
        Ok(self.build("")?.to_bytes().map_err(ProgramError::from)?)
    }
}

#[cfg(test)]
mod tests {
    use particle_vm::{BinaryOp, Op, Operand, INSTRUCTION_SIZE, MAX_CHANNELS};

    use super::*;
    use crate::assemble::{chan, input, lit, out};

    #[test]
    fn test_layout() {
        let program = ProgramBuilder::default()
            .channel("life")
            .outputs(1)
            .update([Asm::Binary(BinaryOp::Sub, chan("life"), chan("life"), input(0))])
            .emit([Asm::Mov(chan("life"), lit(2.0))])
            .output([Asm::Mov(out(0), chan("life")), Asm::Instance(lit(1.0))])
            .build("fx/a.pvm")
            .unwrap();

        assert_eq!(program.emit_offset(), 2 * INSTRUCTION_SIZE);
        assert_eq!(program.output_offset(), 4 * INSTRUCTION_SIZE);
        assert_eq!(program.bytecode().len(), 7 * INSTRUCTION_SIZE);
        assert_eq!(
            program.disassemble(program.emit_offset()),
            vec![Op::Mov(Operand::Channel(Name::new("life")), Operand::Literal(2.0)), Op::End]
        );
    }

    #[test]
    fn test_bytes_load_back() {
        let builder = ProgramBuilder::default().channel("x").constant("k", 3.0).material("m.mat");
        let bytes = builder.to_bytes().unwrap();
        let program = Program::from_bytes("p", &bytes).unwrap();
        assert_eq!(program.constants(), &[(Name::new("k"), 3.0)]);
        assert_eq!(program.material(), Some("m.mat"));
    }

    #[test]
    fn test_errors_name_the_subroutine() {
        let err = ProgramBuilder::default().emit([Asm::Mov(chan("nope"), lit(1.0))]).build("p").unwrap_err();
        assert!(matches!(err, BuildError::Assemble { subroutine: "emit", .. }));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = ProgramBuilder::default().channel("a").constant("a", 1.0).build("p").unwrap_err();
        assert!(matches!(err, BuildError::Duplicate(name) if name == "a"));
    }

    #[test]
    fn test_too_many_channels() {
        let builder = (0..=MAX_CHANNELS).fold(ProgramBuilder::default(), |b, i| b.channel(&format!("c{i}")));
        let err = builder.build("p").unwrap_err();
        assert!(matches!(err, BuildError::Program(ProgramError::Count { table: "channels", .. })));
    }
}
