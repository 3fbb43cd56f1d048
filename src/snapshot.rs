//! Save and restore the runtime state of an emitter.
//!
//! The program itself is not stored, only its path, which is resolved again on restore. Layout, all little
//! endian:
//!
//! ```text
//! path_len:u32  path:utf8 * path_len                   (0 = unbound, nothing follows)
//! constants_count:u32  (name:u32, value:f32) * constants_count
//! channels_count:u32  particles_count:u32  instances_count:u32
//! per channel:  name:u32  values:f32 * particles_count
//! ```

use std::{
    io::{self, Read, Write},
    mem::size_of,
};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use particle_vm::Name;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    emitter::{Emitter, EmitterError},
    resource::ResourceManager,
    store::Constant,
};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("program path is not valid UTF-8")]
    Path(#[from] std::string::FromUtf8Error),
    #[error("snapshot holds {found} constants but the program declares {expected}")]
    ConstantCount { expected: usize, found: usize },
    #[error("snapshot constant {index} is {found}, the program expects {expected}")]
    ConstantName { index: usize, expected: Name, found: Name },
    #[error("snapshot holds {found} channels but the program declares {expected}")]
    ChannelCount { expected: usize, found: usize },
    #[error("snapshot channel {index} is {found}, the program expects {expected}")]
    ChannelName { index: usize, expected: Name, found: Name },
    #[error(transparent)]
    Emitter(#[from] EmitterError),
}

impl Emitter {
    /// Write the emitter's runtime state to `writer`
    #[instrument(level = "debug", skip_all, fields(entity = %self.entity()))]
    pub fn serialize(&self, mut writer: impl Write) -> Result<(), SnapshotError> {
        let Some(program) = self.program() else {
            writer.write_u32::<LittleEndian>(0)?;
            return Ok(());
        };
        writer.write_u32::<LittleEndian>(program.path().len() as u32)?;
        writer.write_all(program.path().as_bytes())?;

        writer.write_u32::<LittleEndian>(self.constants().len() as u32)?;
        for constant in self.constants() {
            writer.write_u32::<LittleEndian>(constant.name.0)?;
            writer.write_f32::<LittleEndian>(constant.value)?;
        }

        writer.write_u32::<LittleEndian>(self.channels_count() as u32)?;
        writer.write_u32::<LittleEndian>(self.particles_count() as u32)?;
        writer.write_u32::<LittleEndian>(self.instances_count() as u32)?;
        for channel in self.channels() {
            writer.write_u32::<LittleEndian>(channel.name.0)?;
            for value in &channel.data()[..self.particles_count()] {
                writer.write_f32::<LittleEndian>(*value)?;
            }
        }
        debug!(particles = self.particles_count(), "serialized emitter");
        Ok(())
    }

    /// Replace the emitter's state with a snapshot written by [Emitter::serialize].
    ///
    /// The program is resolved through `resources`. On failure the emitter is left unbound.
    #[instrument(level = "debug", skip_all, fields(entity = %self.entity()))]
    pub fn deserialize(&mut self, reader: impl Read, resources: &dyn ResourceManager) -> Result<(), SnapshotError> {
        let restored = self.restore(reader, resources);
        if restored.is_err() {
            self.unbind();
        }
        restored
    }

    fn restore(&mut self, mut reader: impl Read, resources: &dyn ResourceManager) -> Result<(), SnapshotError> {
        let path_len = reader.read_u32::<LittleEndian>()? as u64;
        if path_len == 0 {
            self.unbind();
            return Ok(());
        }
        let mut path = Vec::new();
        (&mut reader).take(path_len).read_to_end(&mut path)?;
        if path.len() as u64 != path_len {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        let path = String::from_utf8(path)?;
        self.bind(&path, resources)?;

        let declared = self.program().map(|p| p.constants().to_vec()).unwrap_or_default();
        let constants_count = reader.read_u32::<LittleEndian>()? as usize;
        if constants_count != declared.len() {
            return Err(SnapshotError::ConstantCount {
                expected: declared.len(),
                found: constants_count,
            });
        }
        let mut constants = Vec::with_capacity(constants_count);
        for (index, (expected, _)) in declared.into_iter().enumerate() {
            let name = Name(reader.read_u32::<LittleEndian>()?);
            if name != expected {
                return Err(SnapshotError::ConstantName {
                    index,
                    expected,
                    found: name,
                });
            }
            let value = reader.read_f32::<LittleEndian>()?;
            constants.push(Constant { name, value });
        }

        let channels_count = reader.read_u32::<LittleEndian>()? as usize;
        if channels_count != self.channels_count() {
            return Err(SnapshotError::ChannelCount {
                expected: self.channels_count(),
                found: channels_count,
            });
        }
        let particles_count = reader.read_u32::<LittleEndian>()? as usize;
        let instances_count = reader.read_u32::<LittleEndian>()? as usize;

        // channel data is read in full before the store is sized from the particle count
        let channel_bytes = particles_count as u64 * size_of::<f32>() as u64;
        let mut channels = Vec::with_capacity(channels_count);
        let mut bytes = Vec::new();
        for (index, channel) in self.channels().iter().enumerate() {
            let name = Name(reader.read_u32::<LittleEndian>()?);
            if name != channel.name {
                return Err(SnapshotError::ChannelName {
                    index,
                    expected: channel.name,
                    found: name,
                });
            }
            bytes.clear();
            (&mut reader).take(channel_bytes).read_to_end(&mut bytes)?;
            if bytes.len() as u64 != channel_bytes {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            let mut values = vec![0.0; particles_count];
            LittleEndian::read_f32_into(&bytes, &mut values);
            channels.push(values);
        }

        let store = self.store_mut();
        store.set_constants(constants);
        store.reserve(particles_count).map_err(|source| EmitterError::Alloc {
            capacity: particles_count,
            source,
        })?;
        store.set_len(particles_count);
        for (index, values) in channels.iter().enumerate() {
            if let Some(live) = store.channel_mut(index) {
                live.copy_from_slice(values);
            }
        }
        self.set_instances_count(instances_count);

        debug!(path = %path, particles = particles_count, "restored emitter");
        Ok(())
    }
}
