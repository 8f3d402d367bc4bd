// Modules
pub mod consts;
pub mod docs;
pub mod evolution;
pub mod experiment;
pub mod handlers;
pub mod model;
pub mod sampling;
pub mod visualization;
pub mod web_app;

pub use evolution::fitness::{FitnessError, FitnessSampler};
pub use evolution::population::{
    EvolutionConfig, EvolutionError, GlobalTracking, PopulationController, RunReport,
    ScheduleEntry, TrainingPlan,
};
pub use evolution::topology::{generate, Topology, TopologyError, TopologyFamily};
pub use evolution::transport::{transport, LogitTransport, TransportError};
pub use model::{ModelError, TrainableModel};
pub use sampling::{BatchSource, DataError};
