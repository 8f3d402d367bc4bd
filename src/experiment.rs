use crate::consts::UNIT_INTERVAL_MAX;
use crate::evolution::population::{EvolutionConfig, EvolutionError, PopulationController, RunReport};
use crate::model::LinearRegressor;
use crate::sampling::{SyntheticRegression, SyntheticTaskConfig};
use rand::distributions::Uniform;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

/// An evolution run over the synthetic regression task.
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct ExperimentRequest {
    pub config: EvolutionConfig,
    #[serde(default)]
    pub task: SyntheticTaskConfig,
}

/// Draws one starting learning rate per model, log-uniform around
/// `initial` within a factor of `spread`.
pub fn initial_learning_rates<R: Rng + ?Sized>(
    population_size: usize,
    initial: f64,
    spread: f64,
    rng: &mut R,
) -> Result<Vec<f64>, EvolutionError> {
    if !(spread.is_finite() && spread >= 1.0) {
        return Err(EvolutionError::InvalidConfiguration(format!(
            "initial spread must be at least 1, got {}",
            spread
        )));
    }
    if initial * spread > UNIT_INTERVAL_MAX {
        return Err(EvolutionError::InvalidConfiguration(format!(
            "initial learning rate {} times spread {} leaves (0, 1)",
            initial, spread
        )));
    }
    if spread == 1.0 {
        return Ok(vec![initial; population_size]);
    }
    let exponent = Uniform::new_inclusive(-1.0, 1.0);
    Ok((0..population_size)
        .map(|_| initial * spread.powf(rng.sample(exponent)))
        .collect())
}

/// Builds the models and data sources for a synthetic run.
pub fn build_synthetic_population(
    config: &EvolutionConfig,
    task: &SyntheticTaskConfig,
) -> Result<(Vec<LinearRegressor>, SyntheticRegression, SyntheticRegression), EvolutionError> {
    let mut train_data = SyntheticRegression::new(task)?;
    let eval_data = train_data.split();
    let mut rng = match task.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
        None => StdRng::from_entropy(),
    };
    let rates = initial_learning_rates(
        config.population_size,
        config.initial_hyperparameter,
        task.initial_spread,
        &mut rng,
    )?;
    let models = rates
        .into_iter()
        .enumerate()
        .map(|(id, rate)| LinearRegressor::with_random_weights(id, task.features, rate, &mut rng))
        .collect();
    Ok((models, train_data, eval_data))
}

/// Runs a full evolution of linear regressors on the synthetic task.
pub fn run_synthetic(request: ExperimentRequest) -> Result<RunReport, EvolutionError> {
    let ExperimentRequest { config, task } = request;
    config.plan()?;
    let (models, train_data, eval_data) = build_synthetic_population(&config, &task)?;
    info!(
        population = config.population_size,
        topology = %config.topology,
        features = task.features,
        "starting synthetic run"
    );
    let mut controller = PopulationController::new(config, models, train_data, eval_data)?;
    let report = controller.run()?;
    info!(
        run_id = %report.run_id,
        live = report.live_population,
        retired = report.retired.len(),
        "synthetic run finished"
    );
    Ok(report)
}
