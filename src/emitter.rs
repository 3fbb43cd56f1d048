use std::{collections::TryReserveError, mem::size_of, sync::Arc};

use glam::Vec3;
use particle_vm::{Backend, Halt, Name, Program, Vm, VmConfig};
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::{
    resource::{MaterialHandle, ResourceError, ResourceManager},
    store::{Channel, Constant, ParticleStore},
    world::Entity,
};

#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("emitter has no program bound")]
    Unbound,
    #[error("failed to grow particle storage to {capacity} slots: {source}")]
    Alloc {
        capacity: usize,
        #[source]
        source: TryReserveError,
    },
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

#[derive(Clone, Copy, Debug)]
pub struct EmitterConfig {
    /// Slots allocated per channel when a program is bound
    pub initial_capacity: usize,
    /// Smallest capacity a full store grows to. Past that, capacity doubles.
    pub min_growth: usize,
    pub vm: VmConfig,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            min_growth: 16,
            vm: VmConfig::default(),
        }
    }
}

/// Where the output subroutine's instances go
pub trait InstanceWriter {
    /// Append one instance. Returns false if there is no room for it.
    fn write(&mut self, instance: &[f32]) -> bool;
}

impl InstanceWriter for Vec<f32> {
    fn write(&mut self, instance: &[f32]) -> bool {
        self.extend_from_slice(instance);
        true
    }
}

struct SliceWriter<'a> {
    out: &'a mut [f32],
    len: usize,
}

impl InstanceWriter for SliceWriter<'_> {
    fn write(&mut self, instance: &[f32]) -> bool {
        let end = self.len + instance.len();
        match self.out.get_mut(self.len..end) {
            Some(dst) => {
                dst.copy_from_slice(instance);
                self.len = end;
                true
            }
            None => false,
        }
    }
}

/// One particle of the store, as seen by the [Vm]
struct ParticleBackend<'a> {
    store: &'a mut ParticleStore,
    index: usize,
    inputs: &'a [f32],
    staged: &'a mut [f32],
    writer: Option<&'a mut dyn InstanceWriter>,
    instances: usize,
    dropped: usize,
}

impl<'a> ParticleBackend<'a> {
    fn new(store: &'a mut ParticleStore, index: usize, inputs: &'a [f32]) -> Self {
        Self {
            store,
            index,
            inputs,
            staged: &mut [],
            writer: None,
            instances: 0,
            dropped: 0,
        }
    }
}

impl Backend for ParticleBackend<'_> {
    fn constant(&self, name: Name) -> Option<f32> {
        self.store.constant(name)
    }

    fn channel(&self, name: Name) -> Option<f32> {
        self.store.get(name, self.index)
    }

    fn set_channel(&mut self, name: Name, value: f32) {
        self.store.set(name, self.index, value)
    }

    fn input(&self, index: usize) -> Option<f32> {
        self.inputs.get(index).copied()
    }

    fn set_output(&mut self, index: usize, value: f32) {
        if let Some(slot) = self.staged.get_mut(index) {
            *slot = value;
        }
    }

    fn instance(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            trace!(particle = self.index, "instance outside of the output pass");
            return;
        };
        if writer.write(self.staged) {
            self.instances += 1;
        } else {
            self.dropped += 1;
        }
    }
}

/// A particle emitter: the live particles of one entity and the program that drives them.
///
/// Call order per frame is [Emitter::emit] (any number of times), [Emitter::update], then
/// [Emitter::fill_instance_data]. An emitter has no internal locking; `&mut self` keeps those calls from
/// overlapping.
#[derive(derive_more::Debug)]
pub struct Emitter {
    entity: Entity,
    config: EmitterConfig,
    program: Option<Arc<Program>>,
    store: ParticleStore,
    #[debug(ignore)]
    vm: Vm,
    material: Option<MaterialHandle>,
    instances_count: usize,
    #[debug(ignore)]
    staged: Vec<f32>,
}

impl Emitter {
    pub fn new(entity: Entity) -> Self {
        Self::with_config(entity, EmitterConfig::default())
    }

    pub fn with_config(entity: Entity, config: EmitterConfig) -> Self {
        Self {
            entity,
            config,
            program: None,
            store: ParticleStore::default(),
            vm: Vm::new(config.vm, 0),
            material: None,
            instances_count: 0,
            staged: Vec::new(),
        }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Load the program at `path` through `resources` and bind it, discarding all particles.
    ///
    /// On failure the emitter is left unbound.
    pub fn bind(&mut self, path: &str, resources: &dyn ResourceManager) -> Result<(), EmitterError> {
        match resources.load_program(path) {
            Ok(program) => self.set_program(program, resources),
            Err(err) => {
                warn!(entity = %self.entity, path, %err, "failed to load particle program");
                self.unbind();
                Err(err.into())
            }
        }
    }

    /// Bind an already loaded program, reallocating channels and constants to match it
    #[instrument(skip_all, fields(entity = %self.entity, path = program.path()))]
    pub fn set_program(&mut self, program: Arc<Program>, resources: &dyn ResourceManager) -> Result<(), EmitterError> {
        let capacity = self.config.initial_capacity;
        let store = match ParticleStore::new(program.channels(), program.constants(), capacity) {
            Ok(store) => store,
            Err(source) => {
                self.unbind();
                return Err(EmitterError::Alloc { capacity, source });
            }
        };

        self.store = store;
        self.vm.resize_registers(program.registers_count());
        self.staged = vec![0.0; program.outputs_count()];
        self.instances_count = 0;
        self.program = Some(program);
        self.resolve_material(resources);
        debug!(capacity, "bound particle program");
        Ok(())
    }

    /// Drop the program and every particle
    pub fn unbind(&mut self) {
        self.program = None;
        self.store = ParticleStore::default();
        self.vm.resize_registers(0);
        self.staged.clear();
        self.material = None;
        self.instances_count = 0;
    }

    /// Look up the bound program's material. Stays [None] until the resource layer has it.
    pub fn resolve_material(&mut self, resources: &dyn ResourceManager) -> Option<MaterialHandle> {
        let path = self.program.as_deref().and_then(Program::material);
        self.material = path.and_then(|path| resources.material(path));
        if let (Some(path), None) = (path, self.material) {
            debug!(entity = %self.entity, path, "material not available yet");
        }
        self.material
    }

    /// Spawn one particle, running the emit subroutine with `args` as its inputs.
    ///
    /// `args` must hold as many values as the program's emit subroutine reads. Missing ones read as zero.
    /// A kill issued by the emit subroutine is ignored: the particle lives until its first update.
    pub fn emit(&mut self, args: &[f32]) -> Result<usize, EmitterError> {
        let Some(program) = self.program.as_deref() else {
            return Err(EmitterError::Unbound);
        };
        if self.store.is_full() {
            let old = self.store.capacity();
            self.store.grow(self.config.min_growth).map_err(|source| EmitterError::Alloc {
                capacity: old.saturating_mul(2).max(self.config.min_growth),
                source,
            })?;
            debug!(entity = %self.entity, from = old, to = self.store.capacity(), "grew particle storage");
        }

        let index = self.store.push();
        let mut backend = ParticleBackend::new(&mut self.store, index, args);
        if self.vm.run(program.bytecode(), program.emit_offset(), &mut backend) == Halt::Killed {
            trace!(entity = %self.entity, index, "ignoring kill in emit subroutine");
        }
        Ok(index)
    }

    /// Advance every live particle by `dt`, removing the ones the update subroutine kills.
    ///
    /// A dead particle's slot is refilled with the last live particle, which is then updated in the same
    /// pass, so every particle alive at the start runs exactly once. Survivor order is not preserved.
    #[instrument(level = "trace", skip(self), fields(entity = %self.entity))]
    pub fn update(&mut self, dt: f32) {
        let Some(program) = self.program.as_deref() else {
            return;
        };
        let inputs = [dt];
        let mut killed = 0;
        let mut i = 0;
        while i < self.store.len() {
            let mut backend = ParticleBackend::new(&mut self.store, i, &inputs);
            if self.vm.run(program.bytecode(), program.update_offset(), &mut backend) == Halt::Killed {
                self.store.swap_remove(i);
                killed += 1;
            } else {
                i += 1;
            }
        }
        trace!(alive = self.store.len(), killed, "updated particles");
    }

    /// Run the output subroutine for every live particle, writing instances into `out`.
    ///
    /// Returns the number of floats written, always `instances_count() * outputs_count()`. Instances that
    /// do not fit are dropped. Size `out` with [Emitter::instance_data_len_hint].
    pub fn fill_instance_data(&mut self, camera: Vec3, out: &mut [f32]) -> usize {
        let mut writer = SliceWriter { out, len: 0 };
        self.fill_instances(camera, &mut writer);
        writer.len
    }

    /// Like [Emitter::fill_instance_data], but grows `out` to fit every instance
    pub fn fill_instance_vec(&mut self, camera: Vec3, out: &mut Vec<f32>) {
        out.clear();
        self.fill_instances(camera, out);
    }

    /// Run the output subroutine for every live particle, handing each committed instance to `writer`.
    ///
    /// Instances the writer refuses are dropped and not counted.
    pub fn fill_instances<W: InstanceWriter>(&mut self, camera: Vec3, writer: &mut W) {
        self.instances_count = 0;
        let Some(program) = self.program.as_deref() else {
            return;
        };
        let inputs = camera.to_array();
        let mut dropped = 0;
        for index in 0..self.store.len() {
            self.staged.fill(0.0);
            let mut backend = ParticleBackend {
                staged: &mut self.staged,
                writer: Some(&mut *writer as &mut dyn InstanceWriter),
                ..ParticleBackend::new(&mut self.store, index, &inputs)
            };
            self.vm.run(program.bytecode(), program.output_offset(), &mut backend);
            self.instances_count += backend.instances;
            dropped += backend.dropped;
        }
        if dropped > 0 {
            warn!(entity = %self.entity, dropped, written = self.instances_count, "instance buffer too small");
        }
    }

    /// Size of the instance data written by the last output pass
    pub fn instance_data_size_bytes(&self) -> usize {
        self.instances_count * self.outputs_count() * size_of::<f32>()
    }

    /// Floats needed for one instance per live particle
    pub fn instance_data_len_hint(&self) -> usize {
        self.store.len() * self.outputs_count()
    }

    pub fn program(&self) -> Option<&Arc<Program>> {
        self.program.as_ref()
    }

    pub fn material(&self) -> Option<MaterialHandle> {
        self.material
    }

    pub fn channels_count(&self) -> usize {
        self.store.channels().len()
    }

    pub fn registers_count(&self) -> usize {
        self.program.as_ref().map_or(0, |p| p.registers_count())
    }

    pub fn outputs_count(&self) -> usize {
        self.staged.len()
    }

    pub fn particles_count(&self) -> usize {
        self.store.len()
    }

    pub fn instances_count(&self) -> usize {
        self.instances_count
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Live values of the channel at `index`, in program order
    pub fn channel_data(&self, index: usize) -> Option<&[f32]> {
        self.store
            .channels()
            .get(index)
            .map(|c| &c.data()[..self.store.len()])
    }

    /// Live values of the channel called `name`
    pub fn channel(&self, name: impl Into<Name>) -> Option<&[f32]> {
        self.store.channel(name.into())
    }

    pub fn channels(&self) -> &[Channel] {
        self.store.channels()
    }

    pub fn constant(&self, name: impl Into<Name>) -> Option<f32> {
        self.store.constant(name.into())
    }

    pub fn constants(&self) -> &[Constant] {
        self.store.constants()
    }

    pub(crate) fn store_mut(&mut self) -> &mut ParticleStore {
        &mut self.store
    }

    pub(crate) fn set_instances_count(&mut self, count: usize) {
        self.instances_count = count;
    }
}
