use std::convert::Infallible;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::{
    api::{
        auth::{AdminUser, CurrentUser},
        dto::{Ack, Count},
        errors::AppError,
        extract::{Json, Path},
        AppState,
    },
    backup::BackupInfo,
    envelope::ApiResponse,
    error::FarmError,
    farm::dashboard::DashboardSummary,
    realtime::{merge::LiveSnapshot, FeedEvent},
};

/// `{"status":"ok"}` while the process is up.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[utoipa::path(
    get,
    path = "/api/dashboard",
    responses(
        (status = 200, description = "Sensor and actuator overview", body = ApiResponse<DashboardSummary>),
        (status = 401, description = "Not signed in", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "system"
)]
pub async fn dashboard(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<ApiResponse<DashboardSummary>>, AppError> {
    let summary = state.api.local().dashboard_summary().await?;
    Ok(Json(ApiResponse::ok(summary)))
}

/// Latest pushed value per sensor and actuator, keyed `type_location`.
#[utoipa::path(
    get,
    path = "/api/live",
    responses((status = 200, description = "Live device state", body = ApiResponse<LiveSnapshot>)),
    security(("bearer" = [])),
    tag = "system"
)]
pub async fn live_state(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Json<ApiResponse<LiveSnapshot>> {
    Json(ApiResponse::ok(state.live.snapshot().await))
}

/// Server-sent events: every accepted push message and raised alert. The
/// token may be passed as `?token=` since browsers cannot set headers on
/// `EventSource`. The stream ends when the session is revoked.
#[utoipa::path(
    get,
    path = "/api/events",
    params(("token" = Option<String>, Query, description = "Bearer token, if not sent as a header")),
    responses(
        (status = 200, description = "text/event-stream of feed events", content_type = "text/event-stream"),
        (status = 401, description = "Not signed in", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "system"
)]
pub async fn events(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let revoked = state
        .sessions
        .revocation(&user.session.nonce)
        .await
        .ok_or_else(|| FarmError::Unauthorized("Session has ended".into()))?;
    let rx = state.api.local().events().subscribe();
    debug!(user_id = user.user.id, "Event stream opened");
    Ok(Sse::new(feed_stream(rx, revoked)).keep_alive(KeepAlive::default()))
}

pub(crate) fn feed_stream(
    mut rx: broadcast::Receiver<FeedEvent>,
    mut revoked: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        loop {
            let msg = tokio::select! {
                biased;
                changed = revoked.changed() => {
                    if changed.is_err() || *revoked.borrow() {
                        debug!("Session revoked, closing event stream");
                        break;
                    }
                    continue;
                }
                msg = rx.recv() => msg,
            };
            match msg {
                Ok(ev) => match Event::default().event(ev.topic.clone()).json_data(&ev) {
                    Ok(event) => yield Ok(event),
                    Err(e) => warn!(error = %e, "Dropping unencodable feed event"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/backups",
    responses(
        (status = 200, description = "Backups, newest first", body = ApiResponse<Vec<BackupInfo>>),
        (status = 403, description = "Admin access required", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "system"
)]
pub async fn list_backups(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<ApiResponse<Vec<BackupInfo>>>, AppError> {
    Ok(Json(ApiResponse::ok(state.backups.list().await?)))
}

#[utoipa::path(
    post,
    path = "/api/backups",
    responses(
        (status = 201, description = "Backup written", body = ApiResponse<BackupInfo>),
        (status = 403, description = "Admin access required", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "system"
)]
pub async fn create_backup(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<(StatusCode, Json<ApiResponse<BackupInfo>>), AppError> {
    let info = state.backups.create().await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(info, "Backup created successfully")),
    ))
}

#[utoipa::path(
    post,
    path = "/api/backups/{id}/restore",
    params(("id" = String, Path, description = "Backup ID")),
    responses(
        (status = 200, description = "Collections restored", body = ApiResponse<Count>),
        (status = 404, description = "No such backup", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "system"
)]
pub async fn restore_backup(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Count>>, AppError> {
    let count = state.backups.restore(&id).await?;
    Ok(Json(ApiResponse::ok_with_message(
        Count { count },
        "Backup restored successfully",
    )))
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        api::test_support::{signed_in, state, test_server},
        db::models::Role,
        realtime::EventHub,
    };

    #[tokio::test]
    async fn health_needs_no_token() {
        let server = test_server(state());
        let body: Value = server.get("/health").await.json();
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let server = test_server(state());
        let body: Value = server.get("/api-docs/openapi.json").await.json();
        assert_eq!(body["info"]["title"], "Smart Farm Service API");
        assert!(body["paths"]["/api/actuators/{id}/control"]["post"].is_object());
        assert!(body["components"]["securitySchemes"]["bearer"].is_object());
    }

    #[tokio::test]
    async fn feed_stream_ends_on_revocation() {
        let hub = EventHub::new();
        let (tx, revoked) = watch::channel(false);
        let stream = feed_stream(hub.subscribe(), revoked);
        tokio::pin!(stream);

        hub.publish("farm/sensors/temperature/greenhouse_1", json!({"value": 21.5}));
        assert!(stream.next().await.is_some());

        tx.send(true).unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn events_require_a_session() {
        let server = test_server(state());
        server.get("/api/events").await.assert_status_unauthorized();
    }

    #[tokio::test]
    async fn dashboard_counts_demo_devices() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        let body: Value = server.get("/api/dashboard").authorization_bearer(&token).await.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["sensors"]["total"], 4);
    }

    #[tokio::test]
    async fn backups_are_admin_only_and_restorable() {
        let state = state();
        let (_, user_token) = signed_in(&state, "bob", Role::User).await;
        let (_, admin_token) = signed_in(&state, "root", Role::Admin).await;
        let server = test_server(state);

        server
            .post("/api/backups")
            .authorization_bearer(&user_token)
            .await
            .assert_status_forbidden();

        let resp = server.post("/api/backups").authorization_bearer(&admin_token).await;
        resp.assert_status(StatusCode::CREATED);
        let body: Value = resp.json();
        let id = body["data"]["id"].as_str().unwrap().to_owned();

        server
            .delete("/api/sensors/4")
            .authorization_bearer(&admin_token)
            .await
            .assert_status_ok();

        server
            .post(&format!("/api/backups/{id}/restore"))
            .authorization_bearer(&admin_token)
            .await
            .assert_status_ok();
        server
            .get("/api/sensors/4")
            .authorization_bearer(&admin_token)
            .await
            .assert_status_ok();

        let body: Value = server.get("/api/backups").authorization_bearer(&admin_token).await.json();
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        server
            .post("/api/backups/19700101T000000.000Z/restore")
            .authorization_bearer(&admin_token)
            .await
            .assert_status_not_found();
    }
}
