//! Decision policies for aviary agents.
//!
//! The course runner only knows the object-safe [`PolicyRunner`] seam; this
//! crate provides concrete policies behind it — scripted baselines and a
//! serializable feed-forward network — plus the adapter wiring them in.

use aviary_core::{OBS_SIZE, PolicyRunner};
use rand::Rng;

pub mod feedforward;
pub mod scripted;

pub use feedforward::{FeedForwardPolicy, PolicyFileError};
pub use scripted::{ConstantPolicy, GapChaserPolicy};

/// Shared interface implemented by all concrete policies.
pub trait Policy {
    /// Immutable policy identifier (useful for reports and analytics).
    fn kind(&self) -> &'static str;

    /// Map an observation triple to one action signal.
    fn decide(&mut self, observation: &[f32; OBS_SIZE]) -> f32;

    /// Jitter the policy's parameters given mutation rates.
    fn mutate<R: Rng>(&mut self, rng: &mut R, rate: f32, scale: f32);
}

/// Adapter giving any [`Policy`] the core's object-safe runner shape.
pub struct PolicyRunnerAdapter<P: Policy> {
    pub policy: P,
}

impl<P: Policy + Send + Sync> PolicyRunner for PolicyRunnerAdapter<P> {
    fn kind(&self) -> &'static str {
        self.policy.kind()
    }

    fn decide(&mut self, observation: &[f32; OBS_SIZE]) -> f32 {
        self.policy.decide(observation)
    }
}

/// Box a policy as a course-side runner.
pub fn into_runner<P>(policy: P) -> Box<dyn PolicyRunner>
where
    P: Policy + Send + Sync + 'static,
{
    Box::new(PolicyRunnerAdapter { policy })
}
