use aviary_core::{CourseConfig, CourseState, OBS_SIZE, PolicyRunner};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use std::time::Duration;

/// Glides forever; keeps the whole population alive for the measured steps.
struct Glide;

impl PolicyRunner for Glide {
    fn kind(&self) -> &'static str {
        "bench.glide"
    }

    fn decide(&mut self, _observation: &[f32; OBS_SIZE]) -> f32 {
        -1.0
    }
}

fn bench_course_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("course_step");
    group.sample_size(30);
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(8));

    // Bounds pushed out of the way so no agent dies mid-measurement.
    let config = CourseConfig {
        floor_y: 1.0e9,
        ceiling_y: -1.0e9,
        score_limit: 0,
        rng_seed: Some(0xBEEF),
        ..CourseConfig::default()
    };

    let steps = 64usize;
    for &agents in &[16usize, 128, 1024] {
        group.bench_function(format!("steps{steps}_agents{agents}"), |b| {
            b.iter_batched(
                || {
                    let mut course = CourseState::new(config).expect("course");
                    let key = course
                        .registry_mut()
                        .register("bench.glide", |_rng| Box::new(Glide));
                    for _ in 0..agents {
                        let id = course.spawn_agent();
                        assert!(course.bind_policy(id, key));
                    }
                    course
                },
                |mut course| {
                    for _ in 0..steps {
                        course.step().expect("tick");
                    }
                    course
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_course_steps);
criterion_main!(benches);
