use criterion::{criterion_group, criterion_main, Criterion, black_box};

use antares::fluid::{CubeEmitter, EmitterBufferBuilder, FluidEmitter, ParticleEmitter};
use antares::scene::SceneDescription;
use antares::sdf::reference::{occupied_cells, CullRadii};
use antares::sdf::NumericalSdf;

use glam::{UVec3, Vec3};

fn cube_emitters(count: usize, particles: u32) -> Vec<FluidEmitter> {
    (0..count)
        .map(|i| {
            let mut cube = CubeEmitter::from_offset_size(Vec3::new(i as f32, 0.0, 0.0), Vec3::ONE);
            cube.add_particles(particles);
            FluidEmitter::Cube(cube)
        })
        .collect()
}

fn bench_builder_cubes(c: &mut Criterion) {
    let emitters = cube_emitters(64, 700);
    let mut builder = EmitterBufferBuilder::new();

    c.bench_function("emitter_builder_64_cubes", |b| {
        b.iter(|| {
            builder.clear();
            builder.reserve(black_box(&emitters));
            builder.allocate();
            builder.add_emitters(black_box(&emitters));
            builder.submit();
            builder.partition_count()
        });
    });
}

fn bench_builder_particles(c: &mut Criterion) {
    let mut emitter = ParticleEmitter::new();
    for i in 0..8192 {
        let t = i as f32 * 0.01;
        emitter.add_particle(Vec3::new(t.sin(), t.cos(), t), Vec3::Z);
    }
    let emitters = vec![FluidEmitter::Particle(emitter)];
    let mut builder = EmitterBufferBuilder::new();

    c.bench_function("emitter_builder_8k_particles", |b| {
        b.iter(|| {
            builder.clear();
            builder.add_emitters(black_box(&emitters));
            builder.submit();
            builder.total_particle_count()
        });
    });
}

fn bench_occupied_cells(c: &mut Criterion) {
    let scene = SceneDescription::demo().sdf;
    let flat = scene.brushes.flatten().unwrap();
    let radius = CullRadii::for_grid_size(scene.grid_size).grid;

    c.bench_function("occupied_cells_demo", |b| {
        b.iter(|| occupied_cells(black_box(&scene), black_box(&flat), radius).len());
    });
}

fn bench_numerical_bake(c: &mut Criterion) {
    c.bench_function("numerical_bake_32", |b| {
        b.iter(|| {
            NumericalSdf::bake(black_box(UVec3::splat(32)), |p| p.length() - 0.4)
        });
    });
}

criterion_group!(
    benches,
    bench_builder_cubes,
    bench_builder_particles,
    bench_occupied_cells,
    bench_numerical_bake,
);
criterion_main!(benches);
