use aviary_core::{
    AgentId, CourseConfig, CourseState, CourseStatus, DeathCause, OBS_SIZE, PolicyRunner, Tick,
    TickReport,
};

/// Emits the same action signal every tick.
struct ConstantRunner(f32);

impl PolicyRunner for ConstantRunner {
    fn kind(&self) -> &'static str {
        "test.constant"
    }

    fn decide(&mut self, _observation: &[f32; OBS_SIZE]) -> f32 {
        self.0
    }
}

/// Flaps on every `period`-th tick, glides otherwise.
struct PeriodicFlapper {
    counter: u32,
    period: u32,
}

impl PeriodicFlapper {
    fn new(period: u32) -> Self {
        Self { counter: 0, period }
    }
}

impl PolicyRunner for PeriodicFlapper {
    fn kind(&self) -> &'static str {
        "test.periodic"
    }

    fn decide(&mut self, _observation: &[f32; OBS_SIZE]) -> f32 {
        self.counter += 1;
        if self.counter % self.period == 0 { 1.0 } else { -1.0 }
    }
}

fn approx(value: f32, want: f32) -> bool {
    (value - want).abs() < 1e-3
}

#[test]
fn gravity_only_agent_hits_the_floor_on_tick_24() {
    let config = CourseConfig {
        rng_seed: Some(1),
        ..CourseConfig::default()
    };
    let mut course = CourseState::new(config).expect("course");
    let id = course.spawn_agent();
    assert!(course.bind_runner(id, Box::new(ConstantRunner(0.0))));

    let summary = course.run_to_completion().expect("batch");
    assert_eq!(summary.status, CourseStatus::AllDead);
    assert_eq!(summary.ticks, Tick(24));
    assert_eq!(summary.score, 0);
    assert_eq!(summary.survivors, 0);
    assert_eq!(summary.retired, 1);

    let retired = &course.retired()[0];
    assert_eq!(retired.id, id);
    assert_eq!(retired.cause, DeathCause::Floor);
    assert_eq!(retired.tick, Tick(24));
    // 24 survival ticks, no passes, no barrier penalty.
    assert!(approx(retired.fitness, 2.4));
}

/// Course tuned so the kill windows are exact: the first barrier pair
/// reaches the agents while the gliders are falling through its lower
/// barrier's span and the flapper has already climbed clear of its upper
/// barrier. Both world bounds are pushed out of the way.
fn open_sky_config() -> CourseConfig {
    CourseConfig {
        floor_y: 10_000.0,
        ceiling_y: -1.0e9,
        gap_min: 449,
        gap_max: 450,
        first_pipe_x: 568.0,
        score_limit: 0,
        rng_seed: Some(11),
        ..CourseConfig::default()
    }
}

#[test]
fn flapper_outlives_gliders_and_score_counts_its_passes() {
    let mut course = CourseState::new(open_sky_config()).expect("course");
    let glider_a = course.spawn_agent();
    let flapper = course.spawn_agent();
    let glider_b = course.spawn_agent();
    assert!(course.bind_runner(glider_a, Box::new(ConstantRunner(0.0))));
    assert!(course.bind_runner(flapper, Box::new(ConstantRunner(1.0))));
    assert!(course.bind_runner(glider_b, Box::new(ConstantRunner(0.0))));

    let mut glider_death_tick = None;
    for _ in 0..200 {
        let report = course.step().expect("tick");
        if report.deaths > 0 {
            assert_eq!(report.deaths, 2, "both gliders die in the same sweep");
            glider_death_tick = Some(report.tick);
        }
    }

    // The falling gliders meet the first lower barrier as soon as its span
    // reaches them; the climbing flapper is already above its upper barrier.
    assert_eq!(glider_death_tick, Some(Tick(55)));
    assert_eq!(course.agent_count(), 1);
    assert!(course.agents().contains(flapper));
    assert!(!course.agents().contains(glider_a));
    assert!(!course.agents().contains(glider_b));

    // Passes at ticks 68 and 143; the pair spawned at tick 143 is still
    // ahead of the agents at tick 200.
    assert_eq!(course.score(), 2);
    assert_eq!(course.status(), CourseStatus::Running);

    let report = course.fitness_report();
    assert_eq!(report.entries.len(), 3);
    for id in [glider_a, glider_b] {
        let entry = report.entry(id).expect("retired entry");
        let death = entry.death.expect("glider died");
        assert_eq!(death.cause, DeathCause::Barrier);
        assert_eq!(death.tick, Tick(55));
        // 55 survival ticks minus the barrier penalty.
        assert!(approx(entry.fitness, 4.5));
    }
    let survivor = report.entry(flapper).expect("live entry");
    assert!(survivor.death.is_none());
    // 200 survival ticks plus two pass bonuses.
    assert!(approx(survivor.fitness, 30.0));
    assert_eq!(report.best().map(|entry| entry.id), Some(flapper));
}

#[test]
fn score_ceiling_terminates_the_batch() {
    let config = CourseConfig {
        score_limit: 1,
        ..open_sky_config()
    };
    let mut course = CourseState::new(config).expect("course");
    let id = course.spawn_agent();
    assert!(course.bind_runner(id, Box::new(ConstantRunner(1.0))));

    let summary = course.run_to_completion().expect("batch");
    assert_eq!(summary.status, CourseStatus::ScoreLimit);
    assert_eq!(summary.score, 2);
    assert_eq!(summary.ticks, Tick(143));
    assert_eq!(summary.survivors, 1);
}

#[test]
fn max_tick_safety_valve_cuts_an_endless_batch() {
    let config = CourseConfig {
        max_ticks: 50,
        ..open_sky_config()
    };
    let mut course = CourseState::new(config).expect("course");
    let id = course.spawn_agent();
    assert!(course.bind_runner(id, Box::new(ConstantRunner(1.0))));

    let summary = course.run_to_completion().expect("batch");
    assert_eq!(summary.status, CourseStatus::Running);
    assert_eq!(summary.ticks, Tick(50));
    assert_eq!(summary.survivors, 1);
}

fn run_seeded(seed: u64, steps: usize) -> (Vec<TickReport>, Vec<(AgentId, f32)>) {
    let config = CourseConfig {
        score_limit: 0,
        rng_seed: Some(seed),
        ..CourseConfig::default()
    };
    let mut course = CourseState::new(config).expect("course");
    let agents = [
        course.spawn_agent(),
        course.spawn_agent(),
        course.spawn_agent(),
    ];
    assert!(course.bind_runner(agents[0], Box::new(ConstantRunner(0.0))));
    assert!(course.bind_runner(agents[1], Box::new(PeriodicFlapper::new(7))));
    assert!(course.bind_runner(agents[2], Box::new(PeriodicFlapper::new(3))));

    let mut reports = Vec::with_capacity(steps);
    for _ in 0..steps {
        if course.status().is_terminal() {
            break;
        }
        reports.push(course.step().expect("tick"));
    }
    let fitness = course
        .fitness_report()
        .entries
        .iter()
        .map(|entry| (entry.id, entry.fitness))
        .collect();
    (reports, fitness)
}

#[test]
fn seeded_batches_are_deterministic() {
    let (reports_a, fitness_a) = run_seeded(0xDEAD_BEEF, 400);
    let (reports_b, fitness_b) = run_seeded(0xDEAD_BEEF, 400);
    assert_eq!(
        reports_a, reports_b,
        "identical seeds should produce identical tick histories"
    );
    assert_eq!(fitness_a, fitness_b);
}

#[test]
fn registry_backed_population_records_policy_kinds() {
    let mut course = CourseState::new(open_sky_config()).expect("course");
    let key = course
        .registry_mut()
        .register("flap.always", |_rng| Box::new(ConstantRunner(1.0)));

    let mut agents = Vec::new();
    for _ in 0..4 {
        let id = course.spawn_agent();
        assert!(course.bind_policy(id, key));
        agents.push(id);
    }
    assert!(!course.bind_policy(agents[0], key + 1), "unknown key");

    for _ in 0..10 {
        course.step().expect("tick");
    }
    let report = course.fitness_report();
    assert_eq!(report.entries.len(), 4);
    for entry in &report.entries {
        assert_eq!(entry.policy.as_deref(), Some("flap.always"));
    }
}

#[test]
fn observations_track_the_focus_obstacle() {
    let mut course = CourseState::new(open_sky_config()).expect("course");
    let id = course.spawn_agent();
    assert!(course.bind_runner(id, Box::new(ConstantRunner(0.0))));

    let report = course.step().expect("tick");
    assert_eq!(report.focus, 0, "single obstacle is always the focus");

    let frame = course.snapshot();
    assert_eq!(frame.pipes.len(), 1);
    let pipe = frame.pipes[0];
    assert_eq!(pipe.gap_bottom, pipe.gap_top + course.config().gap_size);
    assert!(!pipe.passed);
}
