use crate::api::AppConfig;
use axum::{
    extract::Extension,
    response::{IntoResponse, Json},
};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    get,
    path= "/",
    responses (
        (status = 200, description = "Map of available routes"),
    ),
    tag = "info",
)]
/// List the routes exposed by the service.
#[instrument]
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "signup": "/signup",
        "login": "/login",
        "google_auth": "/google-auth",
        "health": "/health",
        "server_public_key": "/server_public_key",
    }))
}

#[utoipa::path(
    get,
    path= "/server_public_key",
    responses (
        (status = 200, description = "Static server public key"),
    ),
    tag = "info",
)]
#[instrument(skip(config))]
pub async fn server_public_key(Extension(config): Extension<Arc<AppConfig>>) -> impl IntoResponse {
    Json(json!({ "public_key": config.server_public_key }))
}
