use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::Receiver;
use glam::Vec3;
use tracing::{debug, trace, warn};
use triple_buffer::{triple_buffer, Input, Output};

use crate::{
    resource::ResourceManager,
    world::{Emitters, Entity, InstanceBatch},
};

pub enum Message {
    Create { entity: Entity, path: String },
    Destroy(Entity),
    Emit { entity: Entity, args: Vec<f32> },
    /// Advance the simulation and publish a new frame of instances
    Update { dt: f32, camera: Vec3 },
    Shutdown,
}

/// Owns the emitters and runs them off the caller's thread, driven by [Message]s.
pub struct SimulationThread {
    emitters: Emitters,
    resources: Arc<dyn ResourceManager>,
    rx: Receiver<Message>,
}

pub struct SimulationComms {
    /// Latest frame of instance batches
    pub instances_out: Output<Vec<InstanceBatch>>,
    /// Yields the emitters once the thread stops
    pub handle: JoinHandle<Emitters>,
}

impl SimulationThread {
    pub fn new(emitters: Emitters, resources: Arc<dyn ResourceManager>, msgs: Receiver<Message>) -> Self {
        Self {
            emitters,
            resources,
            rx: msgs,
        }
    }

    /// Start the simulation loop. It runs until [Message::Shutdown] or until every sender is dropped.
    pub fn spawn(mut self) -> SimulationComms {
        let (mut instances_in, instances_out) = triple_buffer(&Vec::new());
        let handle = thread::spawn(move || {
            #[cfg(feature = "tracing")]
            tracy_client::set_thread_name!("particle simulation");
            while let Ok(msg) = self.rx.recv() {
                if !self.handle(msg, &mut instances_in) {
                    break;
                }
            }
            debug!(emitters = self.emitters.len(), "simulation thread stopped");
            self.emitters
        });

        SimulationComms { instances_out, handle }
    }

    fn handle(&mut self, msg: Message, instances_in: &mut Input<Vec<InstanceBatch>>) -> bool {
        match msg {
            Message::Create { entity, path } => {
                if let Err(err) = self.emitters.create(entity, &path, self.resources.as_ref()) {
                    warn!(%entity, path = %path, %err, "emitter created unbound");
                }
            }
            Message::Destroy(entity) => {
                self.emitters.destroy(entity);
            }
            Message::Emit { entity, args } => {
                if let Err(err) = self.emitters.emit(entity, &args) {
                    warn!(%entity, %err, "emit failed");
                }
            }
            Message::Update { dt, camera } => {
                trace!(dt, "simulation step");
                self.emitters.update_all(dt);
                self.emitters.resolve_materials(self.resources.as_ref());
                instances_in.write(self.emitters.fill_all(camera));
            }
            Message::Shutdown => return false,
        }
        true
    }
}
