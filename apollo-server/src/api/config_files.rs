use apollo_core::processors::ConfigFileRequest;
use apollo_sdk::objects::ConfigFileFormat;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::{ApiError, non_blank};
use crate::api::extractors::ClientIp;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ConfigFileQuery {
    data_center: Option<String>,
    ip: Option<String>,
}

/// `GET /configfiles/{app_id}/{cluster}/{namespace}`
pub(super) async fn get_properties_file(
    state: State<AppState>,
    client_ip: ClientIp,
    path: Path<(String, String, String)>,
    query: Query<ConfigFileQuery>,
) -> Result<Response, ApiError> {
    get_config_file(ConfigFileFormat::Properties, state, client_ip, path, query).await
}

/// `GET /configfiles/json/{app_id}/{cluster}/{namespace}`
pub(super) async fn get_json_file(
    state: State<AppState>,
    client_ip: ClientIp,
    path: Path<(String, String, String)>,
    query: Query<ConfigFileQuery>,
) -> Result<Response, ApiError> {
    get_config_file(ConfigFileFormat::Json, state, client_ip, path, query).await
}

async fn get_config_file(
    format: ConfigFileFormat,
    State(state): State<AppState>,
    ClientIp(peer_ip): ClientIp,
    Path((app_id, cluster, namespace)): Path<(String, String, String)>,
    Query(query): Query<ConfigFileQuery>,
) -> Result<Response, ApiError> {
    let request = ConfigFileRequest {
        format,
        app_id,
        cluster,
        namespace,
        data_center: non_blank(query.data_center),
        client_ip: non_blank(query.ip).or(peer_ip),
    };

    let text = state
        .config_files
        .get(&request)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?
        .ok_or(ApiError::NotFound)?;

    Ok(([(header::CONTENT_TYPE, format.content_type())], text.to_string()).into_response())
}
