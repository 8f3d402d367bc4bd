use crate::handlers::{handle_evolve, handle_openapi};
use axum::{
    routing::{get, post},
    Router,
};
use http::header::HeaderName;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, request_id::MakeRequestUuid,
    request_id::SetRequestIdLayer, trace::TraceLayer,
};

pub fn build_app() -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/evolve", post(handle_evolve))
        .route("/api-docs/openapi.json", get(handle_openapi))
        .layer(
            tower::ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
}
