use crate::name::Name;

/// The data a subroutine runs against: one particle of an emitter plus the run's inputs and outputs.
///
/// Lookups that miss return [None] and are read as zero by the [crate::interpret::Vm].
pub trait Backend {
    fn constant(&self, name: Name) -> Option<f32>;
    /// Value of channel `name` for the particle being executed
    fn channel(&self, name: Name) -> Option<f32>;
    fn set_channel(&mut self, name: Name, value: f32);
    fn input(&self, index: usize) -> Option<f32>;
    fn set_output(&mut self, index: usize, value: f32);
    /// Commit the staged outputs as one render instance
    fn instance(&mut self);
}

/// Reads nothing and drops every write
pub struct NoopBackend;

impl Backend for NoopBackend {
    fn constant(&self, _name: Name) -> Option<f32> {
        None
    }
    fn channel(&self, _name: Name) -> Option<f32> {
        None
    }
    fn set_channel(&mut self, _name: Name, _value: f32) {}
    fn input(&self, _index: usize) -> Option<f32> {
        None
    }
    fn set_output(&mut self, _index: usize, _value: f32) {}
    fn instance(&mut self) {}
}
