use crate::evolution::population::{EvolutionConfig, GlobalTracking, ModelTrace, RunReport, ScheduleEntry};
use crate::evolution::topology::TopologyFamily;
use crate::experiment::ExperimentRequest;
use crate::handlers::ErrorResponse;
use crate::sampling::SyntheticTaskConfig;
use crate::visualization::StructureSnapshot;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::handle_evolve
    ),
    components(
        schemas(
            ExperimentRequest,
            EvolutionConfig,
            ScheduleEntry,
            SyntheticTaskConfig,
            TopologyFamily,
            RunReport,
            GlobalTracking,
            ModelTrace,
            StructureSnapshot,
            ErrorResponse
        )
    ),
    tags(
        (name = "Evolution", description = "Endpoints for evolving hyperparameters over a population graph")
    )
)]
pub struct ApiDoc;
