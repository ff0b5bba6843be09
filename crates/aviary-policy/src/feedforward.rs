//! Serializable feed-forward policy, the representation persisted winners
//! are stored and replayed in.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

use crate::Policy;
use aviary_core::OBS_SIZE;

/// Errors raised while persisting or restoring a policy file.
#[derive(Debug, Error)]
pub enum PolicyFileError {
    #[error("policy file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("policy file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
    #[error("invalid policy topology: {0}")]
    Topology(&'static str),
}

/// One fully-connected tanh layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct DenseLayer {
    inputs: usize,
    outputs: usize,
    /// Row-major, `outputs` rows of `inputs` weights each.
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl DenseLayer {
    fn random(rng: &mut dyn RngCore, inputs: usize, outputs: usize) -> Self {
        let mut weights = Vec::with_capacity(inputs * outputs);
        for _ in 0..inputs * outputs {
            weights.push(rng.random_range(-1.0..1.0));
        }
        let mut biases = Vec::with_capacity(outputs);
        for _ in 0..outputs {
            biases.push(rng.random_range(-1.0..1.0));
        }
        Self {
            inputs,
            outputs,
            weights,
            biases,
        }
    }

    fn forward(&self, inputs: &[f32], outputs: &mut Vec<f32>) {
        outputs.clear();
        for row in 0..self.outputs {
            let base = row * self.inputs;
            let mut sum = self.biases[row];
            for (col, input) in inputs.iter().enumerate() {
                sum += self.weights[base + col] * input;
            }
            outputs.push(sum.tanh());
        }
    }

    fn jitter(&mut self, rng: &mut dyn RngCore, rate: f32, scale: f32) {
        if rate <= 0.0 || scale <= 0.0 {
            return;
        }
        for weight in self.weights.iter_mut().chain(self.biases.iter_mut()) {
            if rng.random::<f32>() < rate {
                *weight += rng.random_range(-scale..scale);
            }
        }
    }

    fn validate(&self) -> Result<(), PolicyFileError> {
        if self.inputs == 0 || self.outputs == 0 {
            return Err(PolicyFileError::Topology("zero-sized layer"));
        }
        if self.weights.len() != self.inputs * self.outputs {
            return Err(PolicyFileError::Topology("weight count mismatch"));
        }
        if self.biases.len() != self.outputs {
            return Err(PolicyFileError::Topology("bias count mismatch"));
        }
        if self
            .weights
            .iter()
            .chain(self.biases.iter())
            .any(|value| !value.is_finite())
        {
            return Err(PolicyFileError::Topology("non-finite parameter"));
        }
        Ok(())
    }
}

/// Fully-connected tanh network mapping the observation triple to one
/// action scalar in [-1, 1].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedForwardPolicy {
    layers: Vec<DenseLayer>,
    #[serde(skip)]
    scratch_a: Vec<f32>,
    #[serde(skip)]
    scratch_b: Vec<f32>,
}

impl FeedForwardPolicy {
    /// Trait identifier for this policy family.
    pub const KIND: &'static str = "policy.feedforward";

    /// Hidden-layer widths used when no topology is specified.
    pub const DEFAULT_HIDDEN: &'static [usize] = &[6];

    /// Construct a randomly initialized network with the given hidden-layer
    /// widths; the input and output widths are fixed by the observation and
    /// action shapes.
    #[must_use]
    pub fn random(rng: &mut dyn RngCore, hidden: &[usize]) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut inputs = OBS_SIZE;
        for &width in hidden {
            layers.push(DenseLayer::random(rng, inputs, width.max(1)));
            inputs = width.max(1);
        }
        layers.push(DenseLayer::random(rng, inputs, 1));
        Self {
            layers,
            scratch_a: Vec::new(),
            scratch_b: Vec::new(),
        }
    }

    /// Validate the layer chain end to end.
    pub fn validate(&self) -> Result<(), PolicyFileError> {
        let first = self
            .layers
            .first()
            .ok_or(PolicyFileError::Topology("network has no layers"))?;
        if first.inputs != OBS_SIZE {
            return Err(PolicyFileError::Topology(
                "first layer width does not match the observation size",
            ));
        }
        let mut expected = OBS_SIZE;
        for layer in &self.layers {
            layer.validate()?;
            if layer.inputs != expected {
                return Err(PolicyFileError::Topology("layer widths do not chain"));
            }
            expected = layer.outputs;
        }
        if expected != 1 {
            return Err(PolicyFileError::Topology(
                "final layer must emit a single action",
            ));
        }
        Ok(())
    }

    /// Persist the network as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), PolicyFileError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Restore a network from JSON, rejecting malformed topologies.
    pub fn load(path: &Path) -> Result<Self, PolicyFileError> {
        let file = File::open(path)?;
        let policy: Self = serde_json::from_reader(BufReader::new(file))?;
        policy.validate()?;
        Ok(policy)
    }
}

impl Policy for FeedForwardPolicy {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn decide(&mut self, observation: &[f32; OBS_SIZE]) -> f32 {
        self.scratch_a.clear();
        self.scratch_a.extend_from_slice(observation);
        for layer in &self.layers {
            layer.forward(&self.scratch_a, &mut self.scratch_b);
            std::mem::swap(&mut self.scratch_a, &mut self.scratch_b);
        }
        self.scratch_a.first().copied().unwrap_or(0.0)
    }

    fn mutate<R: Rng>(&mut self, rng: &mut R, rate: f32, scale: f32) {
        for layer in &mut self.layers {
            layer.jitter(rng, rate, scale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::into_runner;
    use rand::{SeedableRng, rngs::SmallRng};
    use std::env;

    fn temp_path(tag: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("aviary-policy-{tag}-{}.json", std::process::id()))
    }

    #[test]
    fn random_networks_chain_and_bound_their_output() {
        let mut rng = SmallRng::seed_from_u64(17);
        let mut policy = FeedForwardPolicy::random(&mut rng, &[8, 4]);
        policy.validate().expect("random topology is valid");
        for sample in 0..100 {
            let altitude = sample as f32 * 7.0;
            let action = policy.decide(&[altitude, 120.0, 80.0]);
            assert!((-1.0..=1.0).contains(&action));
        }
    }

    #[test]
    fn decisions_are_stable_for_identical_observations() {
        let mut rng = SmallRng::seed_from_u64(5);
        let mut policy = FeedForwardPolicy::random(&mut rng, FeedForwardPolicy::DEFAULT_HIDDEN);
        let first = policy.decide(&[350.0, 150.0, 50.0]);
        let second = policy.decide(&[350.0, 150.0, 50.0]);
        assert_eq!(first, second);
    }

    #[test]
    fn save_then_load_preserves_behavior() {
        let mut rng = SmallRng::seed_from_u64(23);
        let mut policy = FeedForwardPolicy::random(&mut rng, &[5]);
        let path = temp_path("roundtrip");
        policy.save(&path).expect("save");
        let mut restored = FeedForwardPolicy::load(&path).expect("load");
        std::fs::remove_file(&path).ok();

        for sample in 0..20 {
            let observation = [sample as f32 * 31.0, sample as f32, 400.0 - sample as f32];
            assert_eq!(policy.decide(&observation), restored.decide(&observation));
        }
    }

    #[test]
    fn load_rejects_a_broken_layer_chain() {
        let path = temp_path("broken");
        let json = r#"{"layers":[
            {"inputs":3,"outputs":2,"weights":[0.1,0.1,0.1,0.1,0.1,0.1],"biases":[0.0,0.0]},
            {"inputs":4,"outputs":1,"weights":[0.1,0.1,0.1,0.1],"biases":[0.0]}
        ]}"#;
        std::fs::write(&path, json).expect("write fixture");
        let result = FeedForwardPolicy::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(
            result,
            Err(PolicyFileError::Topology("layer widths do not chain"))
        ));
    }

    #[test]
    fn mutation_respects_a_zero_rate() {
        let mut rng = SmallRng::seed_from_u64(9);
        let mut policy = FeedForwardPolicy::random(&mut rng, &[4]);
        let before = policy.clone();
        policy.mutate(&mut rng, 0.0, 0.5);
        assert_eq!(policy, before);
        policy.mutate(&mut rng, 1.0, 0.5);
        assert_ne!(policy, before);
    }

    #[test]
    fn adapter_exposes_the_policy_through_the_runner_seam() {
        let mut rng = SmallRng::seed_from_u64(2);
        let policy = FeedForwardPolicy::random(&mut rng, FeedForwardPolicy::DEFAULT_HIDDEN);
        let mut runner = into_runner(policy.clone());
        let mut reference = policy;
        let observation = [300.0, 90.0, 110.0];
        assert_eq!(runner.kind(), FeedForwardPolicy::KIND);
        assert_eq!(runner.decide(&observation), reference.decide(&observation));
    }
}
