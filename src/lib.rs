//! Particle emitters driven by bytecode.
//!
//! Each [Emitter] owns a dense struct-of-arrays [ParticleStore] and runs the three subroutines of its
//! [Program] on a small register [particle_vm::Vm]: emit once per spawned particle, update once per particle
//! per frame, and output to produce renderer instances. [Emitters] holds every emitter of a scene and
//! [SimulationThread] drives them from a message channel.

mod emitter;
mod resource;
mod snapshot;
mod store;
mod threads;
#[cfg(feature = "tracing")]
mod trace;
mod world;

pub use emitter::{Emitter, EmitterConfig, EmitterError, InstanceWriter};
pub use particle_vm::{Name, Program, ProgramError, VmConfig};
pub use resource::{MaterialHandle, ResourceCache, ResourceError, ResourceManager};
pub use snapshot::SnapshotError;
pub use store::{Channel, Constant, ParticleStore};
pub use threads::{Message, SimulationComms, SimulationThread};
#[cfg(feature = "tracing")]
pub use trace::Tracing;
pub use world::{Emitters, Entity, InstanceBatch};
