//! Shared application plumbing for aviary entry points.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use aviary_core::{BatchSummary, FitnessReport};

pub mod renderer {
    use anyhow::Result;
    use aviary_core::FrameSnapshot;
    use tracing::debug;

    /// Presentation seam. Implementations receive read-only frames and never
    /// touch simulation state; a failing frame is logged by the caller and
    /// must not abort the tick loop.
    pub trait Renderer {
        /// Stable identifier describing the renderer implementation.
        fn name(&self) -> &'static str;

        /// Present one frame.
        fn frame(&mut self, snapshot: &FrameSnapshot) -> Result<()>;
    }

    /// Default renderer: periodic progress lines, no drawing.
    pub struct HeadlessRenderer {
        every: u64,
    }

    impl HeadlessRenderer {
        /// Log every `every` ticks (minimum 1).
        #[must_use]
        pub fn new(every: u64) -> Self {
            Self {
                every: every.max(1),
            }
        }
    }

    impl Renderer for HeadlessRenderer {
        fn name(&self) -> &'static str {
            "headless"
        }

        fn frame(&mut self, snapshot: &FrameSnapshot) -> Result<()> {
            if snapshot.tick.0 % self.every == 0 {
                debug!(
                    tick = snapshot.tick.0,
                    alive = snapshot.alive,
                    score = snapshot.score,
                    "frame"
                );
            }
            Ok(())
        }
    }
}

/// Evaluation outcome handed to the external optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub seed: Option<u64>,
    pub summary: BatchSummary,
    pub fitness: FitnessReport,
}

impl EvaluationReport {
    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create report file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .context("failed to serialize evaluation report")?;
        Ok(())
    }
}
