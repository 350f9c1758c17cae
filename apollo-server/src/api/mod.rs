//! HTTP API served to config clients.
//!
//! # Endpoints
//!
//! - `GET /notifications/v2`                               – long poll for namespace changes
//! - `GET /configfiles/{app_id}/{cluster}/{namespace}`      – config as a properties file
//! - `GET /configfiles/json/{app_id}/{cluster}/{namespace}` – config as a JSON object

use axum::{
    Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::state::AppState;

mod config_files;
pub mod extractors;
mod notifications;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications/v2", get(notifications::poll_notifications))
        .route(
            "/configfiles/json/{app_id}/{cluster}/{namespace}",
            get(config_files::get_json_file),
        )
        .route(
            "/configfiles/{app_id}/{cluster}/{namespace}",
            get(config_files::get_properties_file),
        )
}

/// Errors returned by the config client API.
#[derive(Debug)]
enum ApiError {
    /// The request could not be understood.
    BadRequest(String),
    /// There is no release to serve.
    NotFound,
    /// Computing the response failed upstream; the client may retry.
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "config not found").into_response(),
            ApiError::Unavailable(message) => {
                tracing::error!(error = %message, "Config API upstream failure");
                (StatusCode::SERVICE_UNAVAILABLE, "config temporarily unavailable").into_response()
            }
        }
    }
}

/// Blank query values count as absent.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
