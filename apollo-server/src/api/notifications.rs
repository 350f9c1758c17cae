use apollo_core::processors::{PollError, PollOutcome, PollRequest};
use apollo_sdk::objects::NotificationRequest;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::{ApiError, non_blank};
use crate::api::extractors::ClientIp;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct NotificationsQuery {
    app_id: String,
    cluster: String,
    /// JSON array of `{namespaceName, notificationId}`.
    notifications: String,
    data_center: Option<String>,
    ip: Option<String>,
}

/// `GET /notifications/v2`: hold the request until a watched namespace
/// changes (200 with the changes) or the long-poll timeout passes (304).
pub(super) async fn poll_notifications(
    State(state): State<AppState>,
    ClientIp(peer_ip): ClientIp,
    Query(query): Query<NotificationsQuery>,
) -> Result<Response, ApiError> {
    let notifications: Vec<NotificationRequest> = serde_json::from_str(&query.notifications)
        .map_err(|e| ApiError::BadRequest(format!("invalid notifications: {e}")))?;

    let request = PollRequest {
        app_id: query.app_id,
        cluster: query.cluster,
        data_center: non_blank(query.data_center),
        client_ip: non_blank(query.ip).or(peer_ip),
        notifications,
    };

    match state.notifications.poll(request).await {
        Ok(PollOutcome::Changed(changes)) => Ok(Json(changes).into_response()),
        Ok(PollOutcome::NotModified) => Ok(StatusCode::NOT_MODIFIED.into_response()),
        Err(PollError::InvalidNotifications(reason)) => Err(ApiError::BadRequest(format!(
            "invalid notifications: {reason}"
        ))),
    }
}
