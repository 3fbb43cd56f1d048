//! The compiled bytecode resource shared by every emitter that uses it.
//!
//! Binary layout, all little endian:
//!
//! ```text
//! emit_byte_offset:i32  output_byte_offset:i32
//! channels_count:i32    registers_count:i32    outputs_count:i32    constants_count:i32
//! channel_names:   u32 * channels_count
//! constants:       (name:u32, value:f32) * constants_count
//! material_path:   len:u32, utf8 * len       (len 0 = no material)
//! bytecode:        the rest of the stream
//! ```
//!
//! The update subroutine always starts at byte 0 of the bytecode.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use itertools::Itertools;
use thiserror::Error;
use tracing::debug;

use crate::{cursor::Cursor, name::Name, op::Op};

pub const MAX_CHANNELS: usize = 16;
pub const MAX_CONSTANTS: usize = 16;
pub const MAX_OUTPUTS: usize = 16;
pub const MAX_REGISTERS: usize = 256;

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("truncated or unreadable program: {0}")]
    Io(#[from] io::Error),
    #[error("{table} count {count} is outside 0..={max}")]
    Count {
        table: &'static str,
        count: i64,
        max: usize,
    },
    #[error("{subroutine} subroutine offset {offset} is outside the {len} bytes of bytecode")]
    Offset {
        subroutine: &'static str,
        offset: i64,
        len: usize,
    },
    #[error("{table} name {name} is declared more than once")]
    Duplicate { table: &'static str, name: Name },
    #[error("material path is not valid UTF-8")]
    MaterialPath(#[from] std::string::FromUtf8Error),
}

/// Everything a [Program] is made of, before validation
#[derive(Clone, Debug, Default)]
pub struct ProgramParts {
    pub bytecode: Vec<u8>,
    pub emit_offset: usize,
    pub output_offset: usize,
    pub channels: Vec<Name>,
    pub registers_count: usize,
    pub outputs_count: usize,
    pub constants: Vec<(Name, f32)>,
    pub material: Option<String>,
}

/// A validated, immutable bytecode program
#[derive(derive_more::Debug, Clone, PartialEq)]
pub struct Program {
    path: String,
    #[debug(ignore)]
    bytecode: Vec<u8>,
    emit_offset: usize,
    output_offset: usize,
    channels: Vec<Name>,
    registers_count: usize,
    outputs_count: usize,
    constants: Vec<(Name, f32)>,
    material: Option<String>,
}

impl Program {
    pub fn new(path: impl Into<String>, parts: ProgramParts) -> Result<Self, ProgramError> {
        check_count("channels", parts.channels.len() as i64, MAX_CHANNELS)?;
        check_count("registers", parts.registers_count as i64, MAX_REGISTERS)?;
        check_count("outputs", parts.outputs_count as i64, MAX_OUTPUTS)?;
        check_count("constants", parts.constants.len() as i64, MAX_CONSTANTS)?;
        check_offset("emit", parts.emit_offset as i64, parts.bytecode.len())?;
        check_offset("output", parts.output_offset as i64, parts.bytecode.len())?;
        check_unique("channels", parts.channels.iter().copied())?;
        check_unique("constants", parts.constants.iter().map(|(name, _)| *name))?;

        Ok(Self {
            path: path.into(),
            bytecode: parts.bytecode,
            emit_offset: parts.emit_offset,
            output_offset: parts.output_offset,
            channels: parts.channels,
            registers_count: parts.registers_count,
            outputs_count: parts.outputs_count,
            constants: parts.constants,
            material: parts.material,
        })
    }

    /// Parse a program resource from `reader`
    pub fn load(path: impl Into<String>, mut reader: impl Read) -> Result<Self, ProgramError> {
        let path = path.into();
        let emit_offset = reader.read_i32::<LittleEndian>()?;
        let output_offset = reader.read_i32::<LittleEndian>()?;
        let channels_count = read_count(&mut reader, "channels", MAX_CHANNELS)?;
        let registers_count = read_count(&mut reader, "registers", MAX_REGISTERS)?;
        let outputs_count = read_count(&mut reader, "outputs", MAX_OUTPUTS)?;
        let constants_count = read_count(&mut reader, "constants", MAX_CONSTANTS)?;

        let channels = (0..channels_count)
            .map(|_| reader.read_u32::<LittleEndian>().map(Name))
            .collect::<Result<Vec<_>, _>>()?;
        let constants = (0..constants_count)
            .map(|_| {
                let name = Name(reader.read_u32::<LittleEndian>()?);
                let value = reader.read_f32::<LittleEndian>()?;
                Ok::<_, io::Error>((name, value))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let material_len = reader.read_u32::<LittleEndian>()? as u64;
        let mut material = Vec::new();
        (&mut reader).take(material_len).read_to_end(&mut material)?;
        if material.len() as u64 != material_len {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        let material = if material.is_empty() {
            None
        } else {
            Some(String::from_utf8(material)?)
        };

        let mut bytecode = Vec::new();
        reader.read_to_end(&mut bytecode)?;
        check_offset("emit", emit_offset.into(), bytecode.len())?;
        check_offset("output", output_offset.into(), bytecode.len())?;

        debug!(
            path = %path,
            bytes = bytecode.len(),
            channels = channels_count,
            registers = registers_count,
            outputs = outputs_count,
            "loaded particle program"
        );

        Self::new(
            path,
            ProgramParts {
                bytecode,
                emit_offset: emit_offset as usize,
                output_offset: output_offset as usize,
                channels,
                registers_count,
                outputs_count,
                constants,
                material,
            },
        )
    }

    pub fn from_bytes(path: impl Into<String>, bytes: &[u8]) -> Result<Self, ProgramError> {
        Self::load(path, bytes)
    }

    /// Write the program in the format [Program::load] reads
    pub fn write_to(&self, mut writer: impl Write) -> io::Result<()> {
        writer.write_i32::<LittleEndian>(self.emit_offset as i32)?;
        writer.write_i32::<LittleEndian>(self.output_offset as i32)?;
        writer.write_i32::<LittleEndian>(self.channels.len() as i32)?;
        writer.write_i32::<LittleEndian>(self.registers_count as i32)?;
        writer.write_i32::<LittleEndian>(self.outputs_count as i32)?;
        writer.write_i32::<LittleEndian>(self.constants.len() as i32)?;
        for name in &self.channels {
            writer.write_u32::<LittleEndian>(name.0)?;
        }
        for (name, value) in &self.constants {
            writer.write_u32::<LittleEndian>(name.0)?;
            writer.write_f32::<LittleEndian>(*value)?;
        }
        let material = self.material.as_deref().unwrap_or_default();
        writer.write_u32::<LittleEndian>(material.len() as u32)?;
        writer.write_all(material.as_bytes())?;
        writer.write_all(&self.bytecode)
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn update_offset(&self) -> usize {
        0
    }

    pub fn emit_offset(&self) -> usize {
        self.emit_offset
    }

    pub fn output_offset(&self) -> usize {
        self.output_offset
    }

    pub fn channels(&self) -> &[Name] {
        &self.channels
    }

    pub fn channels_count(&self) -> usize {
        self.channels.len()
    }

    pub fn registers_count(&self) -> usize {
        self.registers_count
    }

    pub fn outputs_count(&self) -> usize {
        self.outputs_count
    }

    pub fn constants(&self) -> &[(Name, f32)] {
        &self.constants
    }

    pub fn material(&self) -> Option<&str> {
        self.material.as_deref()
    }

    /// Decode the subroutine at `offset` up to and including its [Op::End]
    pub fn disassemble(&self, offset: usize) -> Vec<Op> {
        let mut ops = Vec::new();
        for op in Cursor::new(&self.bytecode, offset) {
            ops.push(op);
            if op.is_end() {
                break;
            }
        }
        ops
    }
}

fn read_count(reader: &mut impl Read, table: &'static str, max: usize) -> Result<usize, ProgramError> {
    let count = reader.read_i32::<LittleEndian>()?;
    check_count(table, count.into(), max)?;
    Ok(count as usize)
}

fn check_count(table: &'static str, count: i64, max: usize) -> Result<(), ProgramError> {
    if count < 0 || count > max as i64 {
        return Err(ProgramError::Count { table, count, max });
    }
    Ok(())
}

fn check_unique(table: &'static str, names: impl Iterator<Item = Name>) -> Result<(), ProgramError> {
    match names.duplicates().next() {
        Some(name) => Err(ProgramError::Duplicate { table, name }),
        None => Ok(()),
    }
}

fn check_offset(subroutine: &'static str, offset: i64, len: usize) -> Result<(), ProgramError> {
    if offset < 0 || offset > len as i64 {
        return Err(ProgramError::Offset {
            subroutine,
            offset,
            len,
        });
    }
    Ok(())
}
