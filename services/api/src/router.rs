//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the call-screen WebSocket, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        AgentResponse, CallAnalysisResponse, CallCostResponse, CallRecordResponse,
        ErrorResponse, ProductCostResponse,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_agents,
        handlers::get_call,
    ),
    components(
        schemas(
            AgentResponse,
            CallRecordResponse,
            CallAnalysisResponse,
            CallCostResponse,
            ProductCostResponse,
            ErrorResponse
        )
    ),
    tags(
        (
            name = "Callboard API",
            description = "Agents and call records for the live call dashboard"
        )
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/agents", get(handlers::list_agents))
        .route("/calls/{id}", get(handlers::get_call))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_lists_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/agents"));
        assert!(doc.paths.paths.contains_key("/calls/{id}"));

        let schemas = doc.components.expect("components").schemas;
        assert!(schemas.contains_key("CallRecordResponse"));
        assert!(schemas.contains_key("ErrorResponse"));
    }
}
