//! Struct-of-arrays storage for the particles of one emitter.
//!
//! ```text
//!             0     1     2     3   particles_count   capacity
//!           ┌─────┬─────┬─────┬─────┬─────┬─────┬─────┐
//! life      │ 0.4 │ 0.9 │ 0.1 │ 0.7 │  ·  │  ·  │  ·  │
//! pos_x     │ 1.0 │ 3.2 │-0.5 │ 2.2 │  ·  │  ·  │  ·  │
//!           └─────┴─────┴─────┴─────┴─────┴─────┴─────┘
//!             live, contiguous        unused
//! ```

use std::collections::TryReserveError;

use particle_vm::Name;

#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub name: Name,
    /// Always exactly `capacity` long
    data: Vec<f32>,
}

impl Channel {
    /// Every slot, live or not
    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Constant {
    pub name: Name,
    pub value: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticleStore {
    channels: Vec<Channel>,
    constants: Vec<Constant>,
    capacity: usize,
    particles_count: usize,
}

impl ParticleStore {
    /// Allocate `capacity` slots for each of `channels`
    pub fn new(channels: &[Name], constants: &[(Name, f32)], capacity: usize) -> Result<Self, TryReserveError> {
        let mut allocated = Vec::new();
        allocated.try_reserve_exact(channels.len())?;
        for name in channels {
            allocated.push(Channel {
                name: *name,
                data: zeroed(capacity)?,
            });
        }
        Ok(Self {
            channels: allocated,
            constants: constants
                .iter()
                .map(|(name, value)| Constant {
                    name: *name,
                    value: *value,
                })
                .collect(),
            capacity,
            particles_count: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live particles
    pub fn len(&self) -> usize {
        self.particles_count
    }

    pub fn is_empty(&self) -> bool {
        self.particles_count == 0
    }

    pub fn is_full(&self) -> bool {
        self.particles_count == self.capacity
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub(crate) fn set_constants(&mut self, constants: Vec<Constant>) {
        self.constants = constants;
    }

    pub fn constant(&self, name: Name) -> Option<f32> {
        self.constants.iter().find(|c| c.name == name).map(|c| c.value)
    }

    fn position(&self, name: Name) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    /// The live values of channel `name`
    pub fn channel(&self, name: Name) -> Option<&[f32]> {
        let channel = &self.channels[self.position(name)?];
        Some(&channel.data[..self.particles_count])
    }

    pub(crate) fn channel_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        let count = self.particles_count;
        self.channels.get_mut(index).map(|c| &mut c.data[..count])
    }

    pub fn get(&self, name: Name, particle: usize) -> Option<f32> {
        self.channels[self.position(name)?].data.get(particle).copied()
    }

    pub fn set(&mut self, name: Name, particle: usize, value: f32) {
        if let Some(slot) = self
            .position(name)
            .and_then(|i| self.channels[i].data.get_mut(particle))
        {
            *slot = value;
        }
    }

    /// Grow every channel to `max(min_growth, 2 * capacity)` slots, keeping live data.
    ///
    /// All new arrays are allocated before any is swapped in, so a failed allocation leaves the store untouched.
    pub fn grow(&mut self, min_growth: usize) -> Result<(), TryReserveError> {
        let capacity = self.capacity.saturating_mul(2).max(min_growth).max(1);
        self.reallocate(capacity)
    }

    /// Make room for at least `capacity` particles
    pub fn reserve(&mut self, capacity: usize) -> Result<(), TryReserveError> {
        if capacity <= self.capacity {
            return Ok(());
        }
        self.reallocate(capacity)
    }

    fn reallocate(&mut self, capacity: usize) -> Result<(), TryReserveError> {
        let mut grown = Vec::new();
        grown.try_reserve_exact(self.channels.len())?;
        for channel in &self.channels {
            let mut data = Vec::new();
            data.try_reserve_exact(capacity)?;
            data.extend_from_slice(&channel.data[..self.particles_count]);
            data.resize(capacity, 0.0);
            grown.push(data);
        }

        for (channel, data) in self.channels.iter_mut().zip(grown) {
            channel.data = data;
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Claim the first unused slot, zeroed, and return its index. The store must not be full.
    pub(crate) fn push(&mut self) -> usize {
        debug_assert!(!self.is_full());
        let index = self.particles_count;
        for channel in &mut self.channels {
            channel.data[index] = 0.0;
        }
        self.particles_count += 1;
        index
    }

    /// Remove `particle` by swapping the last live particle into its slot
    pub fn swap_remove(&mut self, particle: usize) {
        if particle >= self.particles_count {
            return;
        }
        let last = self.particles_count - 1;
        for channel in &mut self.channels {
            channel.data.swap(particle, last);
        }
        self.particles_count = last;
    }

    /// Mark the first `count` slots live. `count` must not exceed the capacity.
    pub(crate) fn set_len(&mut self, count: usize) {
        debug_assert!(count <= self.capacity);
        self.particles_count = count.min(self.capacity);
    }
}

fn zeroed(len: usize) -> Result<Vec<f32>, TryReserveError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)?;
    data.resize(len, 0.0);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize) -> ParticleStore {
        ParticleStore::new(&[Name::new("id"), Name::new("life")], &[(Name::new("k"), 2.0)], capacity).unwrap()
    }

    fn spawn(store: &mut ParticleStore, id: f32) {
        if store.is_full() {
            store.grow(4).unwrap();
        }
        let i = store.push();
        store.set(Name::new("id"), i, id);
    }

    #[test]
    fn test_grow_keeps_live_data() {
        let mut store = store(2);
        spawn(&mut store, 1.0);
        spawn(&mut store, 2.0);
        spawn(&mut store, 3.0);
        assert_eq!(store.capacity(), 4);
        assert_eq!(store.channel(Name::new("id")), Some(&[1.0, 2.0, 3.0][..]));
        assert!(store.channels().iter().all(|c| c.data().len() == 4));
    }

    #[test]
    fn test_grow_from_empty_uses_minimum() {
        let mut store = store(0);
        store.grow(16).unwrap();
        assert_eq!(store.capacity(), 16);
        store.grow(16).unwrap();
        assert_eq!(store.capacity(), 32);
    }

    #[test]
    fn test_swap_remove_moves_last_into_hole() {
        let mut store = store(4);
        for id in [1.0, 2.0, 3.0, 4.0] {
            spawn(&mut store, id);
        }
        store.swap_remove(1);
        assert_eq!(store.channel(Name::new("id")), Some(&[1.0, 4.0, 3.0][..]));
        store.swap_remove(2);
        assert_eq!(store.channel(Name::new("id")), Some(&[1.0, 4.0][..]));
        store.swap_remove(7);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_push_zeroes_reused_slot() {
        let mut store = store(2);
        spawn(&mut store, 5.0);
        store.swap_remove(0);
        let i = store.push();
        assert_eq!(store.get(Name::new("id"), i), Some(0.0));
    }

    #[test]
    fn test_unknown_names() {
        let mut store = store(1);
        spawn(&mut store, 1.0);
        store.set(Name::new("missing"), 0, 1.0);
        assert_eq!(store.get(Name::new("missing"), 0), None);
        assert_eq!(store.channel(Name::new("missing")), None);
        assert_eq!(store.constant(Name::new("k")), Some(2.0));
        assert_eq!(store.constant(Name::new("missing")), None);
    }

    #[test]
    fn test_impossible_allocation_leaves_store_intact() {
        let mut store = store(2);
        spawn(&mut store, 1.0);
        let before = store.clone();
        assert!(store.reserve(usize::MAX).is_err());
        assert_eq!(store, before);
    }
}
