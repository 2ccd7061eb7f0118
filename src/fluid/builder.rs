//! Flattening of emitters into `add_particles` dispatch data
//!
//! Emitters are split into records so that no partition holds more than
//! [`MAX_EMITTER_PARTICLE_COUNT_PER_GROUP`] particles. `partitions` holds the
//! record boundaries: partition `p` covers records
//! `partitions[p]..partitions[p + 1]`, and the inclusive sums restart at
//! every partition.

use bytemuck::{Pod, Zeroable};

use crate::fluid::emitter::FluidEmitter;
use crate::fluid::{MAX_EMITTER_PARTICLE_COUNT_PER_GROUP, MAX_PARTICLE_COUNT};

/// Layout must match `EmitterRecord` in `fluid_solver.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct EmitterRecord {
    pub emitter_type: u32,
    /// Word offset of the emitter's property block
    pub property_offset: u32,
    /// Index of the record's first particle within its emitter
    pub first_particle: u32,
    /// Particles of this partition up to and including this record
    pub inclusive_sum: u32,
}

const _: () = assert!(std::mem::size_of::<EmitterRecord>() == 16);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum BuilderState {
    #[default]
    Building,
    Submitted,
}

/// Two-phase builder: `reserve` + `allocate` size the arrays once, then
/// `add_emitter` fills them and `submit` closes the last partition
#[derive(Debug, Default)]
pub struct EmitterBufferBuilder {
    records: Vec<EmitterRecord>,
    partitions: Vec<u32>,
    properties: Vec<u8>,

    reserved_records: usize,
    reserved_partitions: usize,
    reserved_bytes: usize,

    group_count: u32,
    total: u32,
    truncated: u32,
    state: BuilderState,
}

impl EmitterBufferBuilder {
    pub fn new() -> Self {
        Self {
            partitions: vec![0],
            ..Default::default()
        }
    }

    /// Account for `emitters` in the next `allocate`
    pub fn reserve(&mut self, emitters: &[FluidEmitter]) {
        let mut particles = 0usize;
        for emitter in emitters {
            let count = emitter.particle_count() as usize;
            particles += count;
            // A record per emitter plus one per partition it crosses
            self.reserved_records += 1 + count / MAX_EMITTER_PARTICLE_COUNT_PER_GROUP as usize;
            self.reserved_bytes += emitter.property_byte_count();
        }
        self.reserved_partitions += particles.div_ceil(MAX_EMITTER_PARTICLE_COUNT_PER_GROUP as usize) + 1;
    }

    /// Grow the backing arrays to the reserved sizes and reset the reservation
    pub fn allocate(&mut self) {
        self.records.reserve(self.reserved_records.saturating_sub(self.records.len()));
        self.partitions.reserve((self.reserved_partitions + 1).saturating_sub(self.partitions.len()));
        self.properties.reserve(self.reserved_bytes.saturating_sub(self.properties.len()));
        self.reserved_records = 0;
        self.reserved_partitions = 0;
        self.reserved_bytes = 0;
    }

    /// Start a new batch, keeping capacity
    pub fn clear(&mut self) {
        self.records.clear();
        self.partitions.clear();
        self.partitions.push(0);
        self.properties.clear();
        self.group_count = 0;
        self.total = 0;
        self.truncated = 0;
        self.state = BuilderState::Building;
    }

    /// Append one emitter's property block and records
    ///
    /// Particles beyond [`MAX_PARTICLE_COUNT`] per batch are dropped.
    pub fn add_emitter(&mut self, emitter: &FluidEmitter) {
        assert!(
            self.state == BuilderState::Building,
            "emitter added to a submitted builder; call clear first"
        );

        let wanted = emitter.particle_count();
        let mut remaining = wanted.min(MAX_PARTICLE_COUNT - self.total);
        self.truncated += wanted - remaining;
        if remaining == 0 {
            return;
        }

        let byte_count = emitter.property_byte_count();
        debug_assert_eq!(byte_count % 4, 0, "property blocks are word aligned");
        let property_offset = (self.properties.len() / 4) as u32;
        emitter.write_properties(&mut self.properties);
        debug_assert_eq!(self.properties.len(), (property_offset as usize) * 4 + byte_count);

        let emitter_type = emitter.emitter_type() as u32;
        let mut first_particle = 0;
        while remaining > 0 {
            let take = remaining.min(MAX_EMITTER_PARTICLE_COUNT_PER_GROUP - self.group_count);
            self.group_count += take;
            self.records.push(EmitterRecord {
                emitter_type,
                property_offset,
                first_particle,
                inclusive_sum: self.group_count,
            });
            first_particle += take;
            remaining -= take;
            self.total += take;

            if self.group_count == MAX_EMITTER_PARTICLE_COUNT_PER_GROUP {
                self.partitions.push(self.records.len() as u32);
                self.group_count = 0;
            }
        }
    }

    pub fn add_emitters(&mut self, emitters: &[FluidEmitter]) {
        for emitter in emitters {
            self.add_emitter(emitter);
        }
    }

    /// Close the open partition; the builder is read-only afterwards
    pub fn submit(&mut self) {
        assert!(self.state == BuilderState::Building, "emitter builder submitted twice");
        if self.group_count > 0 {
            self.partitions.push(self.records.len() as u32);
            self.group_count = 0;
        }
        if self.truncated > 0 {
            log::warn!(
                "emitter batch truncated: {} particles over the {} per-batch limit dropped",
                self.truncated,
                MAX_PARTICLE_COUNT
            );
        }
        self.state = BuilderState::Submitted;
    }

    pub fn is_submitted(&self) -> bool {
        self.state == BuilderState::Submitted
    }

    /// Particles across every record
    pub fn total_particle_count(&self) -> u32 {
        self.total
    }

    pub fn records(&self) -> &[EmitterRecord] {
        &self.records
    }

    /// Record boundaries, `partition_count() + 1` entries
    pub fn partitions(&self) -> &[u32] {
        &self.partitions
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len().saturating_sub(1) as u32
    }

    pub fn properties(&self) -> &[u8] {
        &self.properties
    }

    /// Whether the solver has anything to consume
    pub fn is_ready(&self) -> bool {
        self.is_submitted() && self.total > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fluid::emitter::{CubeEmitter, ParticleEmitter};
    use glam::Vec3;

    fn cube(count: u32) -> FluidEmitter {
        let mut cube = CubeEmitter::new(Vec3::ZERO, Vec3::ONE);
        cube.add_particles(count);
        FluidEmitter::Cube(cube)
    }

    fn build(emitters: &[FluidEmitter]) -> EmitterBufferBuilder {
        let mut builder = EmitterBufferBuilder::new();
        builder.reserve(emitters);
        builder.allocate();
        builder.add_emitters(emitters);
        builder.submit();
        builder
    }

    #[test]
    fn test_split_at_group_boundary() {
        let builder = build(&[cube(1000), cube(25)]);

        assert_eq!(builder.total_particle_count(), 1025);
        assert_eq!(builder.partitions(), &[0, 2, 3]);
        assert_eq!(builder.partition_count(), 2);

        let records = builder.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].inclusive_sum, 1000);
        assert_eq!(records[1].inclusive_sum, 1024);
        assert_eq!((records[2].first_particle, records[2].inclusive_sum), (24, 1));
        // Both halves of the second emitter share its property block
        assert_eq!(records[1].property_offset, 16);
        assert_eq!(records[2].property_offset, 16);
    }

    #[test]
    fn test_large_emitter_spans_partitions() {
        let builder = build(&[cube(3000)]);
        assert_eq!(builder.partitions(), &[0, 1, 2, 3]);
        let firsts: Vec<u32> = builder.records().iter().map(|r| r.first_particle).collect();
        assert_eq!(firsts, vec![0, 1024, 2048]);
        assert_eq!(builder.records()[2].inclusive_sum, 3000 - 2048);
    }

    #[test]
    fn test_exact_group_closes_once() {
        let builder = build(&[cube(1024)]);
        assert_eq!(builder.partitions(), &[0, 1]);
    }

    #[test]
    fn test_mixed_emitter_properties() {
        let mut particles = ParticleEmitter::new();
        particles.add_particle(Vec3::ZERO, Vec3::ZERO);
        particles.add_particle(Vec3::ONE, Vec3::ZERO);
        let builder = build(&[FluidEmitter::Particle(particles), cube(5)]);

        assert_eq!(builder.properties().len(), 48 + 64);
        assert_eq!(builder.records()[0].emitter_type, 0);
        assert_eq!(builder.records()[1].emitter_type, 1);
        assert_eq!(builder.records()[1].property_offset, 12);
        assert_eq!(builder.records()[1].inclusive_sum, 7);
    }

    #[test]
    fn test_empty_or_unsubmitted_is_not_ready() {
        let builder = build(&[cube(0)]);
        assert!(builder.is_submitted());
        assert!(!builder.is_ready());
        assert!(builder.records().is_empty());
        assert_eq!(builder.partitions(), &[0]);

        let mut pending = EmitterBufferBuilder::new();
        pending.add_emitter(&cube(10));
        assert!(!pending.is_ready());
    }

    #[test]
    fn test_batch_truncated_at_capacity() {
        let builder = build(&[cube(60_000), cube(10_000)]);
        assert_eq!(builder.total_particle_count(), MAX_PARTICLE_COUNT);
        assert_eq!(builder.partition_count(), MAX_PARTICLE_COUNT / MAX_EMITTER_PARTICLE_COUNT_PER_GROUP);
        let last = builder.records().last().unwrap();
        assert_eq!(last.inclusive_sum, MAX_EMITTER_PARTICLE_COUNT_PER_GROUP);
        // 5536 of the second emitter's particles fit; its last record holds the final 1024
        assert_eq!(last.first_particle, 5536 - 1024);
    }

    #[test]
    fn test_clear_reuses_builder() {
        let mut builder = build(&[cube(10)]);
        builder.clear();
        assert!(!builder.is_submitted());
        builder.add_emitter(&cube(3));
        builder.submit();
        assert_eq!(builder.total_particle_count(), 3);
        assert_eq!(builder.partitions(), &[0, 1]);
    }

    #[test]
    #[should_panic(expected = "submitted twice")]
    fn test_double_submit_panics() {
        let mut builder = build(&[cube(1)]);
        builder.submit();
    }
}
