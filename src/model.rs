use crate::sampling::RegressionBatch;
use rand::distributions::Uniform;
use rand::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Training step failed: {0}")]
    Training(String),
    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

/// A member of the evolving population.
///
/// The controller only ever sees a model through this trait: it trains it,
/// asks for an evaluation loss, and reads/writes its single evolvable
/// hyperparameter (kept in the open interval (0, 1)).
pub trait TrainableModel: Send + Sync {
    type Batch: Sync;

    /// Consumes a training batch. Must leave the hyperparameter untouched.
    fn step(&mut self, batch: &Self::Batch) -> Result<(), ModelError>;

    /// Loss on `batch`. No side effects on the hyperparameter or the weights.
    fn evaluate(&self, batch: &Self::Batch) -> Result<f64, ModelError>;

    fn hyperparameter(&self) -> f64;

    fn set_hyperparameter(&mut self, value: f64);

    /// Every value the hyperparameter has been logged with, oldest first.
    fn hyperparameter_log(&self) -> &[f64];

    /// Appends the current hyperparameter to the log.
    fn log_hyperparameter(&mut self);
}

/// Linear least-squares model trained by plain SGD.
///
/// The evolvable hyperparameter is the learning rate.
#[derive(Debug, Clone)]
pub struct LinearRegressor {
    id: usize,
    weights: Vec<f64>,
    bias: f64,
    learning_rate: f64,
    learning_rate_log: Vec<f64>,
}

impl LinearRegressor {
    pub fn new(id: usize, features: usize, learning_rate: f64) -> Self {
        LinearRegressor {
            id,
            weights: vec![0.0; features],
            bias: 0.0,
            learning_rate,
            learning_rate_log: vec![learning_rate],
        }
    }

    /// Starts from small uniform weights instead of zeros.
    pub fn with_random_weights<R: Rng + ?Sized>(
        id: usize,
        features: usize,
        learning_rate: f64,
        rng: &mut R,
    ) -> Self {
        let uniform = Uniform::new(-0.1, 0.1);
        let mut model = LinearRegressor::new(id, features, learning_rate);
        model.weights = (0..features).map(|_| rng.sample(uniform)).collect();
        model
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn predict(&self, input: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(input.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }

    fn check_batch(&self, batch: &RegressionBatch) -> Result<(), String> {
        if batch.is_empty() {
            return Err("empty batch".into());
        }
        if let Some(row) = batch.inputs.iter().find(|row| row.len() != self.weights.len()) {
            return Err(format!(
                "expected {} features, got {}",
                self.weights.len(),
                row.len()
            ));
        }
        Ok(())
    }
}

impl TrainableModel for LinearRegressor {
    type Batch = RegressionBatch;

    fn step(&mut self, batch: &RegressionBatch) -> Result<(), ModelError> {
        self.check_batch(batch).map_err(ModelError::Training)?;
        let scale = 2.0 / batch.len() as f64;
        let mut weight_gradient = vec![0.0; self.weights.len()];
        let mut bias_gradient = 0.0;

        for (input, target) in batch.inputs.iter().zip(batch.targets.iter()) {
            let residual = self.predict(input) - target;
            weight_gradient
                .iter_mut()
                .zip(input.iter())
                .for_each(|(g, x)| *g += scale * residual * x);
            bias_gradient += scale * residual;
        }

        let learning_rate = self.learning_rate;
        self.weights
            .iter_mut()
            .zip(weight_gradient)
            .for_each(|(w, g)| *w -= learning_rate * g);
        self.bias -= learning_rate * bias_gradient;
        Ok(())
    }

    fn evaluate(&self, batch: &RegressionBatch) -> Result<f64, ModelError> {
        self.check_batch(batch).map_err(ModelError::Evaluation)?;
        let squared_error = batch
            .inputs
            .iter()
            .zip(batch.targets.iter())
            .map(|(input, target)| (self.predict(input) - target).powi(2))
            .sum::<f64>();
        Ok(squared_error / batch.len() as f64)
    }

    fn hyperparameter(&self) -> f64 {
        self.learning_rate
    }

    fn set_hyperparameter(&mut self, value: f64) {
        self.learning_rate = value;
    }

    fn hyperparameter_log(&self) -> &[f64] {
        &self.learning_rate_log
    }

    fn log_hyperparameter(&mut self) {
        self.learning_rate_log.push(self.learning_rate);
    }
}
