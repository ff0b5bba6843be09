//! Hand-written baseline policies, handy as smoke-test opponents.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::Policy;
use aviary_core::OBS_SIZE;

/// Emits a fixed action signal forever.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConstantPolicy {
    pub signal: f32,
}

impl ConstantPolicy {
    /// A policy that never flaps.
    #[must_use]
    pub const fn glide() -> Self {
        Self { signal: -1.0 }
    }

    /// A policy that flaps every tick.
    #[must_use]
    pub const fn flap() -> Self {
        Self { signal: 1.0 }
    }
}

impl Policy for ConstantPolicy {
    fn kind(&self) -> &'static str {
        "policy.constant"
    }

    fn decide(&mut self, _observation: &[f32; OBS_SIZE]) -> f32 {
        self.signal
    }

    fn mutate<R: Rng>(&mut self, _rng: &mut R, _rate: f32, _scale: f32) {}
}

/// Flaps whenever the lower gap edge gets close, gliding otherwise; a crude
/// but surprisingly capable heuristic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GapChaserPolicy {
    /// Distance to the gap-bottom edge below which the policy flaps.
    pub margin: f32,
}

impl Default for GapChaserPolicy {
    fn default() -> Self {
        Self { margin: 70.0 }
    }
}

impl Policy for GapChaserPolicy {
    fn kind(&self) -> &'static str {
        "policy.gap_chaser"
    }

    fn decide(&mut self, observation: &[f32; OBS_SIZE]) -> f32 {
        let gap_bottom_distance = observation[2];
        if gap_bottom_distance < self.margin {
            1.0
        } else {
            -1.0
        }
    }

    fn mutate<R: Rng>(&mut self, rng: &mut R, rate: f32, scale: f32) {
        if rate > 0.0 && scale > 0.0 && rng.random::<f32>() < rate {
            self.margin = (self.margin + rng.random_range(-scale..scale)).max(0.0);
        }
    }
}
