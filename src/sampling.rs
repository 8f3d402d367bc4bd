use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Batch source is exhausted")]
    Exhausted,
    #[error("Invalid batch source parameters: {0}")]
    Invalid(String),
}

/// Supplies batches on demand. What a batch contains is up to the model.
pub trait BatchSource {
    type Batch;

    fn next_batch(&mut self) -> Result<Self::Batch, DataError>;
}

/// Inputs and targets for a regression task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionBatch {
    pub inputs: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl RegressionBatch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Parameters of the synthetic linear task.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SyntheticTaskConfig {
    pub features: usize,
    pub batch_size: usize,
    #[serde(default = "default_noise")]
    pub noise: f64,
    /// Initial learning rates are drawn log-uniformly from
    /// `[initial / spread, initial * spread]`; 1 starts every model equal.
    #[serde(default = "default_spread")]
    pub initial_spread: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_noise() -> f64 {
    0.1
}

fn default_spread() -> f64 {
    1.0
}

impl Default for SyntheticTaskConfig {
    fn default() -> Self {
        SyntheticTaskConfig {
            features: 8,
            batch_size: 60,
            noise: default_noise(),
            initial_spread: default_spread(),
            seed: None,
        }
    }
}

/// Gaussian inputs with targets from a fixed hidden linear map plus noise.
///
/// Clones share the hidden map but keep their own random stream position,
/// so a training and an evaluation source can be split from one generator.
#[derive(Debug, Clone)]
pub struct SyntheticRegression {
    true_weights: Vec<f64>,
    true_bias: f64,
    batch_size: usize,
    input_distribution: Normal,
    noise_distribution: Option<Normal>,
    rng: StdRng,
}

impl SyntheticRegression {
    pub fn new(config: &SyntheticTaskConfig) -> Result<Self, DataError> {
        if config.features == 0 || config.batch_size == 0 {
            return Err(DataError::Invalid(
                "features and batch size must be positive".into(),
            ));
        }
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let input_distribution =
            Normal::new(0.0, 1.0).map_err(|e| DataError::Invalid(e.to_string()))?;
        let noise_distribution = if config.noise > 0.0 {
            Some(Normal::new(0.0, config.noise).map_err(|e| DataError::Invalid(e.to_string()))?)
        } else {
            None
        };
        let true_weights = (0..config.features)
            .map(|_| input_distribution.sample(&mut rng))
            .collect::<Vec<f64>>();
        let true_bias = input_distribution.sample(&mut rng);

        Ok(SyntheticRegression {
            true_weights,
            true_bias,
            batch_size: config.batch_size,
            input_distribution,
            noise_distribution,
            rng,
        })
    }

    /// A second source over the same hidden map with an independent stream.
    pub fn split(&mut self) -> Self {
        let mut other = self.clone();
        other.rng = StdRng::seed_from_u64(self.rng.gen());
        other
    }

    pub fn features(&self) -> usize {
        self.true_weights.len()
    }
}

impl BatchSource for SyntheticRegression {
    type Batch = RegressionBatch;

    fn next_batch(&mut self) -> Result<RegressionBatch, DataError> {
        let mut inputs = Vec::with_capacity(self.batch_size);
        let mut targets = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            let input = (0..self.true_weights.len())
                .map(|_| self.input_distribution.sample(&mut self.rng))
                .collect::<Vec<f64>>();
            let noise = self
                .noise_distribution
                .as_ref()
                .map_or(0.0, |distribution| distribution.sample(&mut self.rng));
            let target = self
                .true_weights
                .iter()
                .zip(input.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>()
                + self.true_bias
                + noise;
            inputs.push(input);
            targets.push(target);
        }
        Ok(RegressionBatch { inputs, targets })
    }
}

/// Replays a fixed list of batches, then reports exhaustion.
#[derive(Debug, Clone)]
pub struct ReplaySource<B> {
    batches: Vec<B>,
    cursor: usize,
    cycle: bool,
}

impl<B: Clone> ReplaySource<B> {
    pub fn new(batches: Vec<B>) -> Self {
        ReplaySource {
            batches,
            cursor: 0,
            cycle: false,
        }
    }

    /// Starts over from the first batch instead of running dry.
    pub fn cycled(batches: Vec<B>) -> Self {
        ReplaySource {
            batches,
            cursor: 0,
            cycle: true,
        }
    }
}

impl<B: Clone> BatchSource for ReplaySource<B> {
    type Batch = B;

    fn next_batch(&mut self) -> Result<B, DataError> {
        if self.cursor >= self.batches.len() {
            if !self.cycle || self.batches.is_empty() {
                return Err(DataError::Exhausted);
            }
            self.cursor = 0;
        }
        let batch = self.batches[self.cursor].clone();
        self.cursor += 1;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64, noise: f64) -> SyntheticRegression {
        SyntheticRegression::new(&SyntheticTaskConfig {
            features: 3,
            batch_size: 16,
            noise,
            initial_spread: 1.0,
            seed: Some(seed),
        })
        .unwrap()
    }

    #[test]
    fn test_synthetic_batches_have_requested_shape() {
        let mut source = seeded(5, 0.1);
        let batch = source.next_batch().unwrap();
        assert_eq!(batch.len(), 16);
        assert!(batch.inputs.iter().all(|row| row.len() == 3));
    }

    #[test]
    fn test_noiseless_targets_follow_hidden_map() {
        let mut source = seeded(9, 0.0);
        let weights = source.true_weights.clone();
        let bias = source.true_bias;
        let batch = source.next_batch().unwrap();
        for (input, target) in batch.inputs.iter().zip(batch.targets.iter()) {
            let expected = weights.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + bias;
            assert!((expected - target).abs() < 1e-12);
        }
    }

    #[test]
    fn test_split_shares_map_but_not_stream() {
        let mut train = seeded(11, 0.1);
        let mut eval = train.split();
        assert_eq!(train.true_weights, eval.true_weights);
        assert_ne!(train.next_batch().unwrap(), eval.next_batch().unwrap());
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        let config = SyntheticTaskConfig {
            features: 0,
            ..SyntheticTaskConfig::default()
        };
        assert!(matches!(
            SyntheticRegression::new(&config),
            Err(DataError::Invalid(_))
        ));
    }

    #[test]
    fn test_replay_source_exhausts_or_cycles() {
        let mut once = ReplaySource::new(vec![1, 2]);
        assert_eq!(once.next_batch().unwrap(), 1);
        assert_eq!(once.next_batch().unwrap(), 2);
        assert!(matches!(once.next_batch(), Err(DataError::Exhausted)));

        let mut looped = ReplaySource::cycled(vec![1, 2]);
        let drawn = (0..5).map(|_| looped.next_batch().unwrap()).collect::<Vec<_>>();
        assert_eq!(drawn, vec![1, 2, 1, 2, 1]);
    }
}
