use crate::docs::ApiDoc;
use crate::evolution::population::{EvolutionError, RunReport};
use crate::experiment::{run_synthetic, ExperimentRequest};
use axum::{extract::Json, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::{OpenApi, ToSchema};

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error: impl ToString) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn status_for(error: &EvolutionError) -> StatusCode {
    match error {
        EvolutionError::InvalidConfiguration(_)
        | EvolutionError::BadPopulationParameter(_)
        | EvolutionError::Topology(_) => StatusCode::BAD_REQUEST,
        EvolutionError::Fitness(_) | EvolutionError::Transport(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Runs an evolution over the synthetic regression task and returns its report.
#[utoipa::path(
    post,
    path = "/evolve",
    request_body = ExperimentRequest,
    responses(
        (status = 200, description = "Run finished", body = RunReport),
        (status = 400, description = "Invalid configuration", body = ErrorResponse),
        (status = 422, description = "Population degenerated during the run", body = ErrorResponse),
        (status = 500, description = "Run aborted", body = ErrorResponse)
    ),
    tag = "Evolution"
)]
pub async fn handle_evolve(
    Json(payload): Json<ExperimentRequest>,
) -> Result<Json<RunReport>, HandlerError> {
    // the run is CPU bound, keep it off the async workers
    let result = tokio::task::spawn_blocking(move || run_synthetic(payload))
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e))?;

    result.map(Json).map_err(|e| {
        warn!(error = %e, "evolution request failed");
        error_response(status_for(&e), e)
    })
}

pub async fn handle_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
