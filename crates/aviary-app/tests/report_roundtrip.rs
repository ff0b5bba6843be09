use anyhow::Result;
use aviary_app::EvaluationReport;
use aviary_app::renderer::{HeadlessRenderer, Renderer};
use aviary_core::{CourseConfig, CourseState, CourseStatus};
use aviary_policy::{ConstantPolicy, GapChaserPolicy, into_runner};

fn temp_report_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("aviary-report-{tag}-{}.json", std::process::id()))
}

#[test]
fn evaluation_report_survives_a_json_roundtrip() -> Result<()> {
    let config = CourseConfig {
        rng_seed: Some(99),
        ..CourseConfig::default()
    };
    let mut course = CourseState::new(config)?;
    let glider = course.spawn_agent();
    let chaser = course.spawn_agent();
    assert!(course.bind_runner(glider, into_runner(ConstantPolicy::glide())));
    assert!(course.bind_runner(chaser, into_runner(GapChaserPolicy::default())));

    let mut renderer = HeadlessRenderer::new(10);
    while course.status() == CourseStatus::Running && course.tick().0 < 500 {
        course.step()?;
        renderer.frame(&course.snapshot())?;
    }

    let report = EvaluationReport {
        seed: Some(99),
        summary: course.summary(),
        fitness: course.fitness_report(),
    };
    let path = temp_report_path("roundtrip");
    report.write_json(&path)?;
    let raw = std::fs::read_to_string(&path)?;
    std::fs::remove_file(&path).ok();

    let restored: EvaluationReport = serde_json::from_str(&raw)?;
    assert_eq!(restored.seed, Some(99));
    assert_eq!(restored.summary, report.summary);
    assert_eq!(restored.fitness.entries.len(), 2);
    // The glider free-falls into the floor early; its entry records the death.
    let glider_entry = restored.fitness.entry(glider).expect("glider entry");
    assert!(glider_entry.death.is_some());
    Ok(())
}
