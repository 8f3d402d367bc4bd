use crate::consts::{DEFAULT_INITIAL_HYPERPARAMETER, STEP_COEFFICIENT};
use crate::evolution::fitness::{check_weights, normalize, raw_fitnesses, FitnessError, FitnessSampler};
use crate::evolution::topology::{effective_flag, generate, Topology, TopologyError, TopologyFamily};
use crate::evolution::transport::{LogitTransport, TransportError};
use crate::model::{ModelError, TrainableModel};
use crate::sampling::{BatchSource, DataError};
use crate::visualization::{StructureObserver, StructureSnapshot};
use itertools::Itertools;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod schedule;
pub mod tracking;

pub use schedule::{RetirementPlan, ScheduleEntry};
pub use tracking::{GlobalTracking, ModelTrace, RunReport};

#[derive(Error, Debug)]
pub enum EvolutionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid population parameters were passed: {0}")]
    BadPopulationParameter(String),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Fitness(#[from] FitnessError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),
}

fn default_max_concurrency() -> usize {
    num_cpus::get()
}

fn default_step_coefficient() -> f64 {
    STEP_COEFFICIENT
}

fn default_initial_hyperparameter() -> f64 {
    DEFAULT_INITIAL_HYPERPARAMETER
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub topology: TopologyFamily,
    /// Layer multiplier for the layered families. Defaults to 5.
    #[serde(default)]
    pub flag: Option<usize>,
    #[serde(default = "default_step_coefficient")]
    pub step_coefficient: f64,
    #[serde(default = "default_initial_hyperparameter")]
    pub initial_hyperparameter: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Worker threads for stepping and evaluating models; 1 runs serially.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Fixed number of steps. Mutually exclusive with `schedule`.
    #[serde(default)]
    pub steps: Option<usize>,
    #[serde(default)]
    pub schedule: Option<Vec<ScheduleEntry>>,
}

impl EvolutionConfig {
    pub fn new(population_size: usize, topology: TopologyFamily) -> Self {
        EvolutionConfig {
            population_size,
            topology,
            flag: None,
            step_coefficient: STEP_COEFFICIENT,
            initial_hyperparameter: DEFAULT_INITIAL_HYPERPARAMETER,
            seed: None,
            max_concurrency: default_max_concurrency(),
            steps: None,
            schedule: None,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, EvolutionError> {
        serde_json::from_str(raw).map_err(|e| EvolutionError::InvalidConfiguration(e.to_string()))
    }

    /// Checks the configuration and resolves which training mode it asks for.
    pub fn plan(&self) -> Result<TrainingPlan, EvolutionError> {
        if self.population_size == 0 {
            return Err(EvolutionError::BadPopulationParameter(
                "Population size cannot be zero".into(),
            ));
        }
        if !(self.initial_hyperparameter > 0.0 && self.initial_hyperparameter < 1.0) {
            return Err(EvolutionError::InvalidConfiguration(format!(
                "initial hyperparameter {} is outside (0, 1)",
                self.initial_hyperparameter
            )));
        }
        if !(self.step_coefficient.is_finite() && self.step_coefficient > 0.0) {
            return Err(EvolutionError::InvalidConfiguration(format!(
                "step coefficient must be finite and positive, got {}",
                self.step_coefficient
            )));
        }
        if self.topology.is_layered() && self.flag == Some(0) {
            return Err(TopologyError::InvalidFlag(0).into());
        }
        let plan = TrainingPlan::from_parts(self.steps, self.schedule.clone())?;
        if let TrainingPlan::Schedule(entries) = &plan {
            check_schedule(self.topology, entries)?;
        }
        Ok(plan)
    }
}

fn check_schedule(family: TopologyFamily, entries: &[ScheduleEntry]) -> Result<(), EvolutionError> {
    for (index, entry) in entries.iter().enumerate() {
        if entry.target_population == 0 {
            return Err(EvolutionError::InvalidConfiguration(format!(
                "schedule entry {} targets an empty population",
                index
            )));
        }
        if family.is_layered() && entry.target_flag == 0 {
            return Err(EvolutionError::InvalidConfiguration(format!(
                "schedule entry {} sets layer multiplier 0",
                index
            )));
        }
    }
    Ok(())
}

/// The two mutually exclusive ways of driving a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingPlan {
    Steps(usize),
    Schedule(Vec<ScheduleEntry>),
}

impl TrainingPlan {
    pub fn from_parts(
        steps: Option<usize>,
        schedule: Option<Vec<ScheduleEntry>>,
    ) -> Result<Self, EvolutionError> {
        match (steps, schedule) {
            (Some(_), Some(_)) => Err(EvolutionError::InvalidConfiguration(
                "Cannot train with both a schedule and a step count".into(),
            )),
            (None, None) => Err(EvolutionError::InvalidConfiguration(
                "Either a schedule or a step count is required".into(),
            )),
            (Some(steps), None) => Ok(TrainingPlan::Steps(steps)),
            (None, Some(schedule)) => Ok(TrainingPlan::Schedule(schedule)),
        }
    }
}

struct Member<M> {
    model: M,
    live: bool,
}

/// Owns the population and runs the evolutionary loop over it.
///
/// Models live in an arena indexed by a stable id. `live` lists the arena
/// ids of the trainable models in vertex order: vertex `v` of the current
/// topology is model `live[v]`. Retired models stay in the arena.
pub struct PopulationController<M, D>
where
    M: TrainableModel,
    D: BatchSource<Batch = M::Batch>,
{
    config: EvolutionConfig,
    members: Vec<Member<M>>,
    live: Vec<usize>,
    retired: Vec<usize>,
    flag: usize,
    topology: Topology,
    transport: LogitTransport,
    sampler: FitnessSampler,
    tracking: GlobalTracking,
    snapshots: Vec<StructureSnapshot>,
    observer: Option<Box<dyn StructureObserver>>,
    train_data: D,
    eval_data: D,
    rng: StdRng,
    pool: Option<rayon::ThreadPool>,
}

impl<M, D> PopulationController<M, D>
where
    M: TrainableModel,
    D: BatchSource<Batch = M::Batch>,
{
    pub fn new(
        config: EvolutionConfig,
        models: Vec<M>,
        train_data: D,
        eval_data: D,
    ) -> Result<Self, EvolutionError> {
        if models.is_empty() {
            return Err(EvolutionError::BadPopulationParameter(
                "Population size cannot be zero".into(),
            ));
        }
        if models.len() != config.population_size {
            return Err(EvolutionError::BadPopulationParameter(format!(
                "expected {} models, got {}",
                config.population_size,
                models.len()
            )));
        }
        if let Some((id, model)) = models
            .iter()
            .enumerate()
            .find(|(_, model)| !(model.hyperparameter() > 0.0 && model.hyperparameter() < 1.0))
        {
            return Err(EvolutionError::BadPopulationParameter(format!(
                "model {} starts with hyperparameter {} outside (0, 1)",
                id,
                model.hyperparameter()
            )));
        }

        let flag = effective_flag(config.flag);
        let topology = generate(models.len(), config.topology, Some(flag))?;
        let mut tracking = GlobalTracking::default();
        tracking.record_topology(topology.len());

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let pool = if config.max_concurrency > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.max_concurrency)
                    .build()
                    .map_err(|e| EvolutionError::ThreadPool(e.to_string()))?,
            )
        } else {
            None
        };

        info!(
            population = models.len(),
            topology = %config.topology,
            flag,
            "population initialized"
        );

        Ok(PopulationController {
            transport: LogitTransport::new(config.step_coefficient),
            live: (0..models.len()).collect(),
            members: models
                .into_iter()
                .map(|model| Member { model, live: true })
                .collect(),
            retired: Vec::new(),
            flag,
            topology,
            sampler: FitnessSampler,
            tracking,
            snapshots: Vec::new(),
            observer: None,
            train_data,
            eval_data,
            rng,
            pool,
            config,
        })
    }

    pub fn with_observer(mut self, observer: Box<dyn StructureObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn population_size(&self) -> usize {
        self.live.len()
    }

    pub fn flag(&self) -> usize {
        self.flag
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn tracking(&self) -> &GlobalTracking {
        &self.tracking
    }

    pub fn snapshots(&self) -> &[StructureSnapshot] {
        &self.snapshots
    }

    /// Arena ids of the trainable models, in vertex order.
    pub fn live_ids(&self) -> &[usize] {
        &self.live
    }

    /// Arena ids of retired models, oldest retirement first.
    pub fn retired_ids(&self) -> &[usize] {
        &self.retired
    }

    pub fn model(&self, id: usize) -> Option<&M> {
        self.members.get(id).map(|member| &member.model)
    }

    pub fn is_live(&self, id: usize) -> bool {
        self.members.get(id).map_or(false, |member| member.live)
    }

    /// Current hyperparameter at every vertex.
    pub fn hyperparameters(&self) -> Vec<f64> {
        self.live
            .iter()
            .map(|&id| self.members[id].model.hyperparameter())
            .collect()
    }

    /// Most recently logged hyperparameter at every vertex.
    pub fn logged_hyperparameters(&self) -> Vec<f64> {
        self.live
            .iter()
            .map(|&id| {
                let model = &self.members[id].model;
                model
                    .hyperparameter_log()
                    .last()
                    .copied()
                    .unwrap_or_else(|| model.hyperparameter())
            })
            .collect()
    }

    /// Runs either a fixed number of steps or a schedule, never both.
    pub fn train(
        &mut self,
        steps: Option<usize>,
        schedule: Option<Vec<ScheduleEntry>>,
    ) -> Result<(), EvolutionError> {
        let plan = TrainingPlan::from_parts(steps, schedule)?;
        self.run_plan(&plan)
    }

    /// Runs whatever the controller's own configuration asks for.
    pub fn run(&mut self) -> Result<RunReport, EvolutionError> {
        let plan = self.config.plan()?;
        self.run_plan(&plan)?;
        Ok(self.report())
    }

    pub fn run_plan(&mut self, plan: &TrainingPlan) -> Result<(), EvolutionError> {
        match plan {
            TrainingPlan::Steps(steps) => self.train_steps(*steps),
            TrainingPlan::Schedule(entries) => self.train_schedule(entries),
        }
    }

    pub fn train_steps(&mut self, steps: usize) -> Result<(), EvolutionError> {
        info!(steps, "training for a fixed number of steps");
        for _ in 0..steps {
            self.evolve_step()?;
        }
        Ok(())
    }

    pub fn train_schedule(&mut self, schedule: &[ScheduleEntry]) -> Result<(), EvolutionError> {
        check_schedule(self.topology.family(), schedule)?;
        for (index, entry) in schedule.iter().enumerate() {
            info!(
                entry = index,
                steps = entry.steps,
                target_population = entry.target_population,
                target_flag = entry.target_flag,
                population = self.live.len(),
                "starting schedule entry"
            );
            if entry.target_flag != self.flag {
                self.flag = entry.target_flag;
                self.regenerate_topology()?;
            }
            self.emit_snapshot(index);

            let plan = RetirementPlan::new(self.live.len(), entry);
            if let Some(plan) = &plan {
                debug!(interval = plan.interval(), "retirement interval");
            }
            for step in 0..entry.steps {
                let fitness = self.evolve_step()?;
                if let Some(plan) = &plan {
                    if plan.retires_at(step, self.live.len()) {
                        self.retire_least_fit(&fitness)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// One full iteration: train, evaluate, select parents, transport
    /// hyperparameters to their graph children, then log.
    ///
    /// Returns the normalized fitness of the live population, in vertex order.
    pub fn evolve_step(&mut self) -> Result<Vec<f64>, EvolutionError> {
        let train_batch = self.train_data.next_batch()?;
        self.step_models(&train_batch)?;

        let eval_batch = self.eval_data.next_batch()?;
        let losses = self.evaluate_models(&eval_batch)?;
        let raw = raw_fitnesses(&losses);
        check_weights(&raw)?;
        self.tracking.record_fitness(&raw);
        let fitness = normalize(&raw);

        let parents = self.sampler.select_parents(&fitness, &mut self.rng)?;
        for &parent in parents.iter() {
            let Some(child) = self.topology.sample_child(parent, &mut self.rng) else {
                warn!(parent, "parent has no outgoing edges, skipping");
                continue;
            };
            let parent_value = self.members[self.live[parent]].model.hyperparameter();
            let child_model = &mut self.members[self.live[child]].model;
            let updated = self
                .transport
                .transport(parent_value, child_model.hyperparameter())?;
            child_model.set_hyperparameter(updated);
        }

        for &id in self.live.iter() {
            self.members[id].model.log_hyperparameter();
        }
        let logged = self.logged_hyperparameters();
        self.tracking.record_hyperparameters(&logged);

        debug!(
            step = self.tracking.steps(),
            mean_fitness = self.tracking.mean_fitness.last().copied(),
            mean_hyperparameter = self.tracking.mean_hyperparameter.last().copied(),
            parents = ?parents,
            "evolution step done"
        );
        Ok(fitness)
    }

    fn step_models(&mut self, batch: &M::Batch) -> Result<(), EvolutionError> {
        let members = &mut self.members;
        match &self.pool {
            Some(pool) => pool.install(|| {
                members
                    .par_iter_mut()
                    .filter(|member| member.live)
                    .try_for_each(|member| member.model.step(batch))
            }),
            None => members
                .iter_mut()
                .filter(|member| member.live)
                .try_for_each(|member| member.model.step(batch)),
        }?;
        Ok(())
    }

    fn evaluate_models(&self, batch: &M::Batch) -> Result<Vec<f64>, EvolutionError> {
        let members = &self.members;
        let live = &self.live;
        let evaluate = |id: &usize| members[*id].model.evaluate(batch);
        let losses = match &self.pool {
            Some(pool) => pool.install(|| {
                live.par_iter()
                    .map(evaluate)
                    .collect::<Result<Vec<f64>, ModelError>>()
            }),
            None => live
                .iter()
                .map(evaluate)
                .collect::<Result<Vec<f64>, ModelError>>(),
        }?;
        Ok(losses)
    }

    /// Retires the live model with the lowest fitness (first one on ties).
    ///
    /// `fitness` must be in the current vertex order. Returns the arena id
    /// of the retired model; the topology is rebuilt for the smaller
    /// population before returning.
    pub fn retire_least_fit(&mut self, fitness: &[f64]) -> Result<Option<usize>, EvolutionError> {
        if fitness.len() != self.live.len() {
            warn!(
                fitness = fitness.len(),
                population = self.live.len(),
                "fitness does not match the live population, not retiring"
            );
            return Ok(None);
        }
        let Some(vertex) = fitness.iter().position_min_by(|a, b| a.total_cmp(b)) else {
            return Ok(None);
        };
        let id = self.live.remove(vertex);
        self.members[id].live = false;
        self.retired.push(id);
        info!(
            model = id,
            fitness = fitness[vertex],
            population = self.live.len(),
            "retired least fit model"
        );
        self.regenerate_topology()?;
        Ok(Some(id))
    }

    fn regenerate_topology(&mut self) -> Result<(), EvolutionError> {
        self.topology = generate(self.live.len(), self.topology.family(), Some(self.flag))?;
        self.tracking.record_topology(self.topology.len());
        debug!(
            n = self.topology.len(),
            flag = self.flag,
            "topology regenerated"
        );
        Ok(())
    }

    fn emit_snapshot(&mut self, entry_index: usize) {
        let snapshot = StructureSnapshot {
            entry_index,
            family: self.topology.family(),
            flag: self.flag,
            model_ids: self.live.clone(),
            hyperparameters: self.logged_hyperparameters(),
            children: self.topology.children().to_vec(),
        };
        if let Some(observer) = self.observer.as_mut() {
            observer.observe(&snapshot);
        }
        self.snapshots.push(snapshot);
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            run_id: Uuid::new_v4().to_string(),
            config: self.config.clone(),
            tracking: self.tracking.clone(),
            models: self
                .members
                .iter()
                .enumerate()
                .map(|(id, member)| ModelTrace {
                    id,
                    retired: !member.live,
                    hyperparameter_log: member.model.hyperparameter_log().to_vec(),
                })
                .collect(),
            retired: self.retired.clone(),
            live_population: self.live.len(),
            snapshots: self.snapshots.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::FLOAT_COMPARISON_EPSILON;
    use crate::sampling::ReplaySource;
    use std::sync::{Arc, Mutex};

    // Model whose evaluation loss never changes.
    struct FixedLossModel {
        loss: f64,
        learning_rate: f64,
        log: Vec<f64>,
        steps_taken: usize,
    }

    impl FixedLossModel {
        fn new(loss: f64, learning_rate: f64) -> Self {
            FixedLossModel {
                loss,
                learning_rate,
                log: vec![learning_rate],
                steps_taken: 0,
            }
        }
    }

    impl TrainableModel for FixedLossModel {
        type Batch = ();

        fn step(&mut self, _batch: &()) -> Result<(), ModelError> {
            self.steps_taken += 1;
            Ok(())
        }

        fn evaluate(&self, _batch: &()) -> Result<f64, ModelError> {
            Ok(self.loss)
        }

        fn hyperparameter(&self) -> f64 {
            self.learning_rate
        }

        fn set_hyperparameter(&mut self, value: f64) {
            self.learning_rate = value;
        }

        fn hyperparameter_log(&self) -> &[f64] {
            &self.log
        }

        fn log_hyperparameter(&mut self) {
            self.log.push(self.learning_rate);
        }
    }

    struct SharedObserver(Arc<Mutex<Vec<StructureSnapshot>>>);

    impl StructureObserver for SharedObserver {
        fn observe(&mut self, snapshot: &StructureSnapshot) {
            self.0.lock().unwrap().push(snapshot.clone());
        }
    }

    type Controller = PopulationController<FixedLossModel, ReplaySource<()>>;

    fn controller(
        family: TopologyFamily,
        losses: &[f64],
        learning_rates: &[f64],
        configure: impl FnOnce(&mut EvolutionConfig),
    ) -> Controller {
        let mut config = EvolutionConfig::new(losses.len(), family);
        config.seed = Some(17);
        config.max_concurrency = 1;
        configure(&mut config);
        let models = losses
            .iter()
            .zip(learning_rates.iter())
            .map(|(&loss, &lr)| FixedLossModel::new(loss, lr))
            .collect();
        PopulationController::new(
            config,
            models,
            ReplaySource::cycled(vec![()]),
            ReplaySource::cycled(vec![()]),
        )
        .unwrap()
    }

    #[test]
    fn test_moran_step_with_uniform_learning_rates_is_a_no_op() {
        let losses = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut population = controller(TopologyFamily::Moran, &losses, &[0.01; 6], |_| {});

        let fitness = population.evolve_step().unwrap();
        assert_eq!(fitness.len(), 6);
        assert!(fitness.windows(2).all(|pair| pair[0] > pair[1]));
        assert!((fitness[0] - 1.0 / 6.0).abs() < FLOAT_COMPARISON_EPSILON);

        let mut rng = StdRng::seed_from_u64(0);
        let parents = FitnessSampler.select_parents(&fitness, &mut rng).unwrap();
        assert_eq!(parents.len(), 3);

        for &id in population.live_ids() {
            let model = population.model(id).unwrap();
            assert_eq!(model.hyperparameter_log(), &[0.01, 0.01]);
            assert_eq!(model.steps_taken, 1);
        }
        let expected_mean = losses.iter().map(|l| 1.0 / l).sum::<f64>() / 6.0;
        assert!((population.tracking().mean_fitness[0] - expected_mean).abs() < FLOAT_COMPARISON_EPSILON);
        assert!((population.tracking().mean_hyperparameter[0] - 0.01).abs() < FLOAT_COMPARISON_EPSILON);
    }

    #[test]
    fn test_scheduled_shrink_retires_least_fit_at_boundaries() {
        let losses = [3.0, 7.0, 1.0, 9.0, 2.0, 8.0, 4.0, 6.0, 5.0, 10.0];
        let mut population = controller(TopologyFamily::Moran, &losses, &[0.01; 10], |_| {});

        population
            .train(None, Some(vec![ScheduleEntry::new(10, 8, 5)]))
            .unwrap();

        assert_eq!(population.population_size(), 8);
        assert_eq!(population.retired_ids(), &[9, 3]);
        assert!(!population.is_live(9) && !population.is_live(3));
        assert_eq!(population.topology().len(), 8);
        assert_eq!(population.tracking().topology_sizes, vec![10, 9, 8]);

        // model 9 left after step 4, model 3 after step 9
        assert_eq!(population.model(9).unwrap().hyperparameter_log().len(), 6);
        assert_eq!(population.model(9).unwrap().steps_taken, 5);
        assert_eq!(population.model(3).unwrap().hyperparameter_log().len(), 11);
        assert_eq!(population.model(0).unwrap().hyperparameter_log().len(), 11);

        let report = population.report();
        assert_eq!(report.retired, vec![9, 3]);
        assert_eq!(report.models.iter().filter(|m| m.retired).count(), 2);
        assert_eq!(report.live_population, 8);
        assert_eq!(report.tracking.mean_fitness.len(), 10);
    }

    #[test]
    fn test_retirement_is_a_no_op_at_target() {
        let losses = [1.0, 2.0, 3.0, 4.0];
        let mut population = controller(TopologyFamily::Moran, &losses, &[0.01; 4], |_| {});
        population
            .train(None, Some(vec![ScheduleEntry::new(4, 4, 5), ScheduleEntry::new(3, 6, 5)]))
            .unwrap();
        assert_eq!(population.population_size(), 4);
        assert!(population.retired_ids().is_empty());
        assert_eq!(population.tracking().topology_sizes, vec![4]);
    }

    #[test]
    fn test_ties_retire_first_occurrence() {
        let mut population = controller(TopologyFamily::Moran, &[1.0; 4], &[0.01; 4], |_| {});
        assert_eq!(population.retire_least_fit(&[0.5, 0.1, 0.1, 0.3]).unwrap(), Some(1));
        assert_eq!(population.live_ids(), &[0, 2, 3]);
        // stale fitness vectors are refused
        assert_eq!(population.retire_least_fit(&[0.5, 0.1]).unwrap(), None);
        assert_eq!(population.live_ids(), &[0, 2, 3]);
    }

    #[test]
    fn test_direct_retirement_rebuilds_topology_before_next_step() {
        let losses = [1.0, 2.0, 3.0, 4.0];
        let mut population = controller(TopologyFamily::Moran, &losses, &[0.01, 0.02, 0.03, 0.04], |_| {});
        assert_eq!(population.retire_least_fit(&[0.5, 0.4, 0.3, 0.1]).unwrap(), Some(3));
        assert_eq!(population.population_size(), 3);
        assert_eq!(population.topology().len(), population.population_size());
        assert_eq!(population.tracking().topology_sizes, vec![4, 3]);

        population.train_steps(50).unwrap();
        assert_eq!(population.tracking().steps(), 50);
        assert!(population.topology().children().iter().flatten().all(|&child| child < 3));
        // the retired model stopped logging at retirement
        assert_eq!(population.model(3).unwrap().hyperparameter_log().len(), 1);
        assert_eq!(population.model(0).unwrap().hyperparameter_log().len(), 51);
    }

    #[test]
    fn test_flag_change_regenerates_and_snapshots() {
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let losses = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let mut population = controller(TopologyFamily::Funnel, &losses, &[0.01; 7], |_| {})
            .with_observer(Box::new(SharedObserver(snapshots.clone())));

        population
            .train(None, Some(vec![ScheduleEntry::new(2, 7, 2), ScheduleEntry::new(2, 7, 2)]))
            .unwrap();

        assert_eq!(population.flag(), 2);
        assert_eq!(population.topology().flag(), 2);
        assert_eq!(population.tracking().topology_sizes, vec![7, 7]);
        // layer 1 = {1, 2}, layer 2 = {3..=6}
        assert_eq!(population.topology().children()[3], vec![1, 2]);

        let seen = snapshots.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].entry_index, 0);
        assert_eq!(seen[0].flag, 2);
        assert_eq!(seen[0].children, population.topology().children().to_vec());
        assert_eq!(*seen, population.snapshots().to_vec());
    }

    #[test]
    fn test_transport_moves_learning_rates_towards_fit_parents() {
        // the fittest model carries the highest learning rate
        let losses = [0.1, 50.0, 50.0, 50.0, 50.0, 50.0];
        let rates = [0.5, 0.01, 0.01, 0.01, 0.01, 0.01];
        let mut population = controller(TopologyFamily::Moran, &losses, &rates, |_| {});
        population.train(Some(30), None).unwrap();

        let values = population.hyperparameters();
        assert!(values.iter().all(|&v| v > 0.0 && v < 1.0));
        assert!(values[1..].iter().any(|&v| v > 0.01));
        let tracking = population.tracking();
        assert_eq!(tracking.mean_hyperparameter.len(), 30);
        assert!(tracking.mean_hyperparameter[29] > tracking.mean_hyperparameter[0]);
    }

    #[test]
    fn test_parallel_and_serial_runs_agree() {
        let losses = [0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0];
        let rates = [0.02, 0.04, 0.06, 0.08, 0.1, 0.12, 0.14, 0.16];
        let mut serial = controller(TopologyFamily::Superfan, &losses, &rates, |c| c.flag = Some(2));
        let mut parallel = controller(TopologyFamily::Superfan, &losses, &rates, |c| {
            c.flag = Some(2);
            c.max_concurrency = 4;
        });
        serial.train(Some(12), None).unwrap();
        parallel.train(Some(12), None).unwrap();
        assert_eq!(serial.hyperparameters(), parallel.hyperparameters());
        assert_eq!(serial.tracking(), parallel.tracking());
    }

    #[test]
    fn test_modes_are_mutually_exclusive() {
        let mut population = controller(TopologyFamily::Moran, &[1.0, 2.0], &[0.01; 2], |_| {});
        assert!(matches!(
            population.train(Some(3), Some(vec![ScheduleEntry::new(3, 2, 5)])),
            Err(EvolutionError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            population.train(None, None),
            Err(EvolutionError::InvalidConfiguration(_))
        ));
        // nothing ran
        assert_eq!(population.tracking().steps(), 0);
    }

    #[test]
    fn test_config_plan_validation() {
        let mut config = EvolutionConfig::new(4, TopologyFamily::Funnel);
        assert!(config.plan().is_err());
        config.steps = Some(5);
        assert_eq!(config.plan().unwrap(), TrainingPlan::Steps(5));
        config.schedule = Some(vec![ScheduleEntry::new(5, 2, 3)]);
        assert!(matches!(config.plan(), Err(EvolutionError::InvalidConfiguration(_))));
        config.steps = None;
        config.schedule = Some(vec![ScheduleEntry::new(5, 0, 3)]);
        assert!(config.plan().is_err());
        config.schedule = Some(vec![ScheduleEntry::new(5, 2, 0)]);
        assert!(config.plan().is_err());
        config.schedule = Some(vec![ScheduleEntry::new(5, 2, 3)]);
        config.initial_hyperparameter = 1.0;
        assert!(config.plan().is_err());
    }

    #[test]
    fn test_config_from_json_applies_defaults() {
        let config = EvolutionConfig::from_json(
            r#"{"population_size": 10, "topology": "Superfan", "steps": 4}"#,
        )
        .unwrap();
        assert_eq!(config.flag, None);
        assert!((config.step_coefficient - 0.3).abs() < FLOAT_COMPARISON_EPSILON);
        assert!((config.initial_hyperparameter - 0.01).abs() < FLOAT_COMPARISON_EPSILON);
        assert!(config.max_concurrency >= 1);
        assert!(EvolutionConfig::from_json(r#"{"population_size": 10, "topology": "Ring"}"#).is_err());
    }

    #[test]
    fn test_zero_loss_is_degenerate() {
        let mut population = controller(TopologyFamily::Moran, &[0.0, 1.0, 2.0], &[0.01; 3], |_| {});
        assert!(matches!(
            population.evolve_step(),
            Err(EvolutionError::Fitness(FitnessError::DegeneratePopulation(_)))
        ));
        assert!(population.tracking().mean_fitness.is_empty());
    }

    #[test]
    fn test_construction_rejects_bad_populations() {
        let config = EvolutionConfig::new(2, TopologyFamily::Moran);
        let result = PopulationController::new(
            config.clone(),
            vec![FixedLossModel::new(1.0, 0.01)],
            ReplaySource::cycled(vec![()]),
            ReplaySource::cycled(vec![()]),
        );
        assert!(matches!(result, Err(EvolutionError::BadPopulationParameter(_))));

        let result = PopulationController::new(
            config,
            vec![FixedLossModel::new(1.0, 0.01), FixedLossModel::new(1.0, 1.0)],
            ReplaySource::cycled(vec![()]),
            ReplaySource::cycled(vec![()]),
        );
        assert!(matches!(result, Err(EvolutionError::BadPopulationParameter(_))));
    }

    #[test]
    fn test_exhausted_data_aborts_run() {
        let config = EvolutionConfig::new(2, TopologyFamily::Moran);
        let mut population = PopulationController::new(
            config,
            vec![FixedLossModel::new(1.0, 0.01), FixedLossModel::new(2.0, 0.02)],
            ReplaySource::new(vec![(), ()]),
            ReplaySource::cycled(vec![()]),
        )
        .unwrap();
        assert!(matches!(
            population.train_steps(3),
            Err(EvolutionError::Data(DataError::Exhausted))
        ));
        assert_eq!(population.tracking().steps(), 2);
    }
}
