use crate::consts::LOSS_CEILING;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitnessError {
    #[error("Population fitness is degenerate: {0}")]
    DegeneratePopulation(String),
}

/// Inverts an evaluation loss into a fitness value.
///
/// Losses above `LOSS_CEILING` (and NaN losses, which `f64::min` discards)
/// count as the ceiling, so the worst fitness is `1 / LOSS_CEILING`.
pub fn raw_fitness(loss: f64) -> f64 {
    1.0 / loss.min(LOSS_CEILING)
}

/// Raw fitness for every model, in population order.
pub fn raw_fitnesses(losses: &[f64]) -> Vec<f64> {
    losses.iter().map(|&loss| raw_fitness(loss)).collect()
}

/// Divides every fitness by the population size.
///
/// This is a tracking scale, not a probability normalization; parent
/// selection renormalizes by the sum on its own.
pub fn normalize(raw: &[f64]) -> Vec<f64> {
    let n = raw.len() as f64;
    raw.iter().map(|fitness| fitness / n).collect()
}

/// Number of parents drawn per evolutionary step.
pub fn parent_count(population_size: usize) -> usize {
    population_size / 2
}

/// Checks that `fitness` can be used as sampling weights.
pub fn check_weights(fitness: &[f64]) -> Result<f64, FitnessError> {
    if fitness.is_empty() {
        return Err(FitnessError::DegeneratePopulation(
            "population is empty".into(),
        ));
    }
    if let Some((idx, value)) = fitness
        .iter()
        .enumerate()
        .find(|(_, value)| !value.is_finite() || **value < 0.0)
    {
        return Err(FitnessError::DegeneratePopulation(format!(
            "model {} has fitness {}",
            idx, value
        )));
    }
    let total = fitness.iter().sum::<f64>();
    if total <= 0.0 || !total.is_finite() {
        return Err(FitnessError::DegeneratePopulation(format!(
            "fitness sums to {}",
            total
        )));
    }
    Ok(total)
}

/// Fitness-proportional parent selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitnessSampler;

impl FitnessSampler {
    /// Draws `floor(n / 2)` parent ids with replacement, each weighted by
    /// `fitness / sum(fitness)`. The same id may appear several times.
    pub fn select_parents<R: Rng + ?Sized>(
        &self,
        fitness: &[f64],
        rng: &mut R,
    ) -> Result<Vec<usize>, FitnessError> {
        self.draw(fitness, parent_count(fitness.len()), rng)
    }

    /// Draws `count` ids with replacement from the fitness distribution.
    pub fn draw<R: Rng + ?Sized>(
        &self,
        fitness: &[f64],
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<usize>, FitnessError> {
        check_weights(fitness)?;
        let distribution = WeightedIndex::new(fitness)
            .map_err(|e| FitnessError::DegeneratePopulation(e.to_string()))?;
        Ok(distribution.sample_iter(rng).take(count).collect())
    }
}
