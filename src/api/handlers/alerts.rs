use axum::{extract::State, http::StatusCode};

use crate::{
    api::{
        auth::CurrentUser,
        dto::{Ack, Count, PageParams},
        errors::AppError,
        extract::{Json, Path, Query},
        AppState,
    },
    db::models::{Alert, AlertPreferences, AlertThreshold},
    envelope::{ApiResponse, Page},
    farm::{
        input::{NewThreshold, ThresholdUpdate},
        AlertFilter,
    },
};

const DEFAULT_PAGE_SIZE: usize = 20;

/// Newest first, filtered, one page at a time.
#[utoipa::path(
    get,
    path = "/api/alerts",
    params(AlertFilter, PageParams),
    responses(
        (status = 200, description = "One page of alerts", body = ApiResponse<Page<Alert>>),
        (status = 401, description = "Not signed in", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(filter): Query<AlertFilter>,
    Query(page): Query<PageParams>,
) -> Result<Json<ApiResponse<Page<Alert>>>, AppError> {
    let alerts = state
        .api
        .list_alerts(
            filter,
            page.page.unwrap_or(1),
            page.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(ApiResponse::ok(alerts)))
}

#[utoipa::path(
    get,
    path = "/api/alerts/unread-count",
    responses((status = 200, description = "Unread alerts", body = ApiResponse<Count>)),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn unread_count(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<ApiResponse<Count>>, AppError> {
    let count = state.api.local().unread_alert_count().await?;
    Ok(Json(ApiResponse::ok(Count { count })))
}

#[utoipa::path(
    put,
    path = "/api/alerts/{id}/read",
    params(("id" = u64, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert marked read", body = ApiResponse<Alert>),
        (status = 404, description = "No such alert", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn mark_read(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<Alert>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.mark_alert_read(id).await?)))
}

#[utoipa::path(
    put,
    path = "/api/alerts/read-all",
    responses((status = 200, description = "Alerts newly marked read", body = ApiResponse<Count>)),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn mark_all_read(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<ApiResponse<Count>>, AppError> {
    let count = state.api.mark_all_alerts_read().await?;
    Ok(Json(ApiResponse::ok(Count { count })))
}

#[utoipa::path(
    put,
    path = "/api/alerts/{id}/acknowledge",
    params(("id" = u64, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert acknowledged", body = ApiResponse<Alert>),
        (status = 404, description = "No such alert", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn acknowledge(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<Alert>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.acknowledge_alert(id).await?)))
}

#[utoipa::path(
    delete,
    path = "/api/alerts/{id}",
    params(("id" = u64, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert deleted", body = Ack),
        (status = 404, description = "No such alert", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn delete_alert(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.api.delete_alert(id).await?;
    Ok(Json(ApiResponse::message("Alert deleted successfully")))
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/alert-thresholds",
    responses((status = 200, description = "All thresholds", body = ApiResponse<Vec<AlertThreshold>>)),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn list_thresholds(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<ApiResponse<Vec<AlertThreshold>>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.list_thresholds().await?)))
}

#[utoipa::path(
    post,
    path = "/api/alert-thresholds",
    request_body = NewThreshold,
    responses(
        (status = 201, description = "Threshold created", body = ApiResponse<AlertThreshold>),
        (status = 400, description = "Invalid threshold", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn create_threshold(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(input): Json<NewThreshold>,
) -> Result<(StatusCode, Json<ApiResponse<AlertThreshold>>), AppError> {
    let threshold = state.api.create_threshold(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(threshold))))
}

#[utoipa::path(
    put,
    path = "/api/alert-thresholds/{id}",
    params(("id" = u64, Path, description = "Threshold ID")),
    request_body = ThresholdUpdate,
    responses(
        (status = 200, description = "Threshold updated", body = ApiResponse<AlertThreshold>),
        (status = 404, description = "No such threshold", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn update_threshold(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
    Json(update): Json<ThresholdUpdate>,
) -> Result<Json<ApiResponse<AlertThreshold>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.update_threshold(id, update).await?)))
}

#[utoipa::path(
    delete,
    path = "/api/alert-thresholds/{id}",
    params(("id" = u64, Path, description = "Threshold ID")),
    responses(
        (status = 200, description = "Threshold deleted", body = Ack),
        (status = 404, description = "No such threshold", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn delete_threshold(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.api.delete_threshold(id).await?;
    Ok(Json(ApiResponse::message("Threshold deleted successfully")))
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/alert-preferences",
    responses((status = 200, description = "Notification preferences", body = ApiResponse<AlertPreferences>)),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn get_preferences(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<ApiResponse<AlertPreferences>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.alert_preferences().await?)))
}

#[utoipa::path(
    put,
    path = "/api/alert-preferences",
    request_body = AlertPreferences,
    responses((status = 200, description = "Preferences saved", body = ApiResponse<AlertPreferences>)),
    security(("bearer" = [])),
    tag = "alerts"
)]
pub async fn update_preferences(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(prefs): Json<AlertPreferences>,
) -> Result<Json<ApiResponse<AlertPreferences>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.update_alert_preferences(prefs).await?)))
}
