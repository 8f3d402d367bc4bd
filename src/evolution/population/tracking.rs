use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use utoipa::ToSchema;

use super::EvolutionConfig;
use crate::visualization::StructureSnapshot;

/// Per-run accumulators. Append-only; a fresh controller starts empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GlobalTracking {
    /// Mean raw fitness of the live population, one entry per step.
    pub mean_fitness: Vec<f64>,
    /// Mean logged hyperparameter of the live population, one entry per step.
    pub mean_hyperparameter: Vec<f64>,
    /// Vertex count of every topology built, in order.
    pub topology_sizes: Vec<usize>,
}

impl GlobalTracking {
    pub fn record_fitness(&mut self, raw_fitness: &[f64]) {
        self.mean_fitness.push(raw_fitness.iter().mean());
    }

    pub fn record_hyperparameters(&mut self, values: &[f64]) {
        self.mean_hyperparameter.push(values.iter().mean());
    }

    pub fn record_topology(&mut self, n: usize) {
        self.topology_sizes.push(n);
    }

    pub fn steps(&self) -> usize {
        self.mean_fitness.len()
    }
}

/// Hyperparameter history of one population member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelTrace {
    pub id: usize,
    pub retired: bool,
    pub hyperparameter_log: Vec<f64>,
}

/// Everything a finished run leaves behind for analysis and plotting.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunReport {
    pub run_id: String,
    pub config: EvolutionConfig,
    pub tracking: GlobalTracking,
    pub models: Vec<ModelTrace>,
    /// Arena ids in the order they were retired.
    pub retired: Vec<usize>,
    pub live_population: usize,
    pub snapshots: Vec<StructureSnapshot>,
}
