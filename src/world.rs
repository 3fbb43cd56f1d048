use std::collections::{hash_map::Entry, HashMap};

use glam::Vec3;
use itertools::Itertools;
use tracing::{debug, instrument, warn};

use crate::{
    emitter::{Emitter, EmitterConfig, EmitterError},
    resource::{MaterialHandle, ResourceManager},
};

/// The entity an emitter is attached to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::From, derive_more::Display)]
#[display("entity#{_0}")]
pub struct Entity(pub u32);

/// Instance data of one emitter, ready to be handed to the renderer
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceBatch {
    pub entity: Entity,
    pub material: Option<MaterialHandle>,
    /// Floats per instance
    pub outputs_count: usize,
    pub data: Vec<f32>,
}

impl InstanceBatch {
    pub fn instances_count(&self) -> usize {
        self.data.len().checked_div(self.outputs_count).unwrap_or(0)
    }
}

/// Every emitter in a scene, keyed by entity
#[derive(Debug, Default)]
pub struct Emitters {
    emitters: HashMap<Entity, Emitter>,
    config: EmitterConfig,
}

impl Emitters {
    pub fn new(config: EmitterConfig) -> Self {
        Self {
            emitters: HashMap::new(),
            config,
        }
    }

    /// Attach an emitter running the program at `path` to `entity`, replacing any emitter it had.
    ///
    /// The emitter is created even if the program fails to load, in which case it stays unbound.
    #[instrument(level = "debug", skip(self, resources), fields(entity = %entity))]
    pub fn create(
        &mut self,
        entity: Entity,
        path: &str,
        resources: &dyn ResourceManager,
    ) -> Result<&mut Emitter, EmitterError> {
        let mut emitter = Emitter::with_config(entity, self.config);
        let bound = emitter.bind(path, resources);
        let emitter = match self.emitters.entry(entity) {
            Entry::Occupied(mut slot) => {
                debug!("replacing emitter");
                slot.insert(emitter);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(emitter),
        };
        bound.map(|()| emitter)
    }

    pub fn destroy(&mut self, entity: Entity) -> Option<Emitter> {
        self.emitters.remove(&entity)
    }

    pub fn get(&self, entity: Entity) -> Option<&Emitter> {
        self.emitters.get(&entity)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut Emitter> {
        self.emitters.get_mut(&entity)
    }

    pub fn len(&self) -> usize {
        self.emitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Emitter> {
        self.emitters.values()
    }

    /// Spawn a particle on `entity`'s emitter
    pub fn emit(&mut self, entity: Entity, args: &[f32]) -> Result<usize, EmitterError> {
        match self.emitters.get_mut(&entity) {
            Some(emitter) => emitter.emit(args),
            None => {
                warn!(%entity, "emit on an entity without an emitter");
                Err(EmitterError::Unbound)
            }
        }
    }

    /// Update every emitter. Emitters share no state, so with the `parallel` feature they run on the rayon
    /// pool.
    #[instrument(level = "trace", skip(self))]
    pub fn update_all(&mut self, dt: f32) {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            self.emitters.par_iter_mut().for_each(|(_, emitter)| emitter.update(dt));
        }
        #[cfg(not(feature = "parallel"))]
        for emitter in self.emitters.values_mut() {
            emitter.update(dt);
        }
    }

    /// Run the output pass of every bound emitter, one batch per emitter that produced instances.
    ///
    /// Batches are ordered by material, then entity.
    pub fn fill_all(&mut self, camera: Vec3) -> Vec<InstanceBatch> {
        let fill = |emitter: &mut Emitter| {
            let mut data = Vec::with_capacity(emitter.instance_data_len_hint());
            emitter.fill_instance_vec(camera, &mut data);
            InstanceBatch {
                entity: emitter.entity(),
                material: emitter.material(),
                outputs_count: emitter.outputs_count(),
                data,
            }
        };

        #[cfg(feature = "parallel")]
        let batches: Vec<InstanceBatch> = {
            use rayon::prelude::*;
            self.emitters.par_iter_mut().map(|(_, emitter)| fill(emitter)).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let batches: Vec<InstanceBatch> = self.emitters.values_mut().map(fill).collect();

        batches
            .into_iter()
            .filter(|batch| !batch.data.is_empty())
            .sorted_by_key(|batch| (batch.material.map(|m| m.0), batch.entity))
            .collect()
    }

    /// Re-resolve materials of emitters still waiting on the resource layer
    pub fn resolve_materials(&mut self, resources: &dyn ResourceManager) {
        for emitter in self.emitters.values_mut() {
            if emitter.material().is_none() && emitter.program().is_some() {
                emitter.resolve_material(resources);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use particle_lang::prelude::*;

    use super::*;
    use crate::resource::ResourceCache;

    fn resources() -> ResourceCache {
        let cache = ResourceCache::default();
        for (path, material) in [("fx/a.pvm", "a.mat"), ("fx/b.pvm", "b.mat")] {
            let program = ProgramBuilder::default()
                .channel("life")
                .outputs(1)
                .material(material)
                .emit([Asm::Mov(chan("life"), input(0))])
                .update([Asm::Binary(BinaryOp::Sub, chan("life"), chan("life"), input(0)), Asm::Kill(Arg::None)])
                .output([Asm::Mov(out(0), chan("life")), Asm::Instance(Arg::None)])
                .build(path)
                .unwrap();
            cache.insert_program(program);
        }
        cache
    }

    #[test]
    fn test_create_and_destroy() {
        let resources = resources();
        let mut emitters = Emitters::default();
        emitters.create(Entity(1), "fx/a.pvm", &resources).unwrap();
        assert!(emitters.create(Entity(2), "fx/missing.pvm", &resources).is_err());

        assert_eq!(emitters.len(), 2);
        assert!(emitters.get(Entity(2)).unwrap().program().is_none());
        assert!(emitters.destroy(Entity(1)).is_some());
        assert!(emitters.destroy(Entity(1)).is_none());
        assert_eq!(emitters.len(), 1);
    }

    #[test]
    fn test_emit_on_missing_entity() {
        let mut emitters = Emitters::default();
        assert!(matches!(emitters.emit(Entity(9), &[1.0]), Err(EmitterError::Unbound)));
    }

    #[test]
    fn test_update_and_fill_all() {
        let resources = resources();
        let mut emitters = Emitters::default();
        let b = resources.insert_material("b.mat");
        emitters.create(Entity(2), "fx/b.pvm", &resources).unwrap();
        emitters.create(Entity(1), "fx/a.pvm", &resources).unwrap();
        emitters.create(Entity(3), "fx/b.pvm", &resources).unwrap();
        emitters.emit(Entity(1), &[1.0]).unwrap();
        emitters.emit(Entity(2), &[2.0]).unwrap();
        emitters.emit(Entity(2), &[3.0]).unwrap();

        let batches = emitters.fill_all(Vec3::ZERO);
        assert_eq!(batches.iter().map(|b| b.entity).collect_vec(), vec![Entity(1), Entity(2)]);
        assert_eq!(batches[0].material, None);
        assert_eq!(batches[1].material, Some(b));
        assert_eq!(batches[1].instances_count(), 2);
        assert_eq!(batches[1].data, vec![2.0, 3.0]);

        // every particle kills itself on update
        emitters.update_all(0.5);
        assert!(emitters.iter().all(|e| e.particles_count() == 0));
        assert!(emitters.fill_all(Vec3::ZERO).is_empty());
    }

    #[test]
    fn test_late_materials_resolve() {
        let resources = resources();
        let mut emitters = Emitters::default();
        emitters.create(Entity(1), "fx/a.pvm", &resources).unwrap();
        assert_eq!(emitters.get(Entity(1)).unwrap().material(), None);

        let a = resources.insert_material("a.mat");
        emitters.resolve_materials(&resources);
        assert_eq!(emitters.get(Entity(1)).unwrap().material(), Some(a));
    }
}
