use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode};
use serde_json::Value;

use crate::{
    api::{
        auth::CurrentUser,
        dto::{Ack, LimitParams},
        errors::AppError,
        extract::{Json, Path, Query},
        AppState,
    },
    db::models::{Actuator, ActuatorLog, AutoRule, SensorType},
    envelope::ApiResponse,
    farm::{
        actuators::ControlRecord,
        input::{ActuatorUpdate, ControlCommand, NewActuator},
        ActuatorFilter,
    },
};

#[utoipa::path(
    get,
    path = "/api/actuators",
    params(ActuatorFilter),
    responses(
        (status = 200, description = "Matching actuators", body = ApiResponse<Vec<Actuator>>),
        (status = 401, description = "Not signed in", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "actuators"
)]
pub async fn list_actuators(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(filter): Query<ActuatorFilter>,
) -> Result<Json<ApiResponse<Vec<Actuator>>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.list_actuators(filter).await?)))
}

#[utoipa::path(
    get,
    path = "/api/actuators/{id}",
    params(("id" = u64, Path, description = "Actuator ID")),
    responses(
        (status = 200, description = "Actuator", body = ApiResponse<Actuator>),
        (status = 404, description = "No such actuator", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "actuators"
)]
pub async fn get_actuator(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<Actuator>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.get_actuator(id).await?)))
}

#[utoipa::path(
    post,
    path = "/api/actuators",
    request_body = NewActuator,
    responses(
        (status = 201, description = "Actuator created", body = ApiResponse<Actuator>),
        (status = 400, description = "Missing or invalid field", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "actuators"
)]
pub async fn create_actuator(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(input): Json<NewActuator>,
) -> Result<(StatusCode, Json<ApiResponse<Actuator>>), AppError> {
    let actuator = state.api.create_actuator(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(actuator, "Actuator created successfully")),
    ))
}

#[utoipa::path(
    put,
    path = "/api/actuators/{id}",
    params(("id" = u64, Path, description = "Actuator ID")),
    request_body = ActuatorUpdate,
    responses(
        (status = 200, description = "Actuator updated", body = ApiResponse<Actuator>),
        (status = 404, description = "No such actuator", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "actuators"
)]
pub async fn update_actuator(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
    Json(update): Json<ActuatorUpdate>,
) -> Result<Json<ApiResponse<Actuator>>, AppError> {
    let actuator = state.api.update_actuator(id, update).await?;
    Ok(Json(ApiResponse::ok_with_message(
        actuator,
        "Actuator updated successfully",
    )))
}

#[utoipa::path(
    delete,
    path = "/api/actuators/{id}",
    params(("id" = u64, Path, description = "Actuator ID")),
    responses(
        (status = 200, description = "Actuator deleted", body = Ack),
        (status = 404, description = "No such actuator", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "actuators"
)]
pub async fn delete_actuator(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.api.delete_actuator(id).await?;
    Ok(Json(ApiResponse::message("Actuator deleted successfully")))
}

/// Switch an actuator. The new status is stored even when the device
/// command cannot be delivered; see `log.delivered`.
#[utoipa::path(
    post,
    path = "/api/actuators/{id}/control",
    params(("id" = u64, Path, description = "Actuator ID")),
    request_body = ControlCommand,
    responses(
        (status = 200, description = "Actuator switched", body = ApiResponse<ControlRecord>),
        (status = 400, description = "Action not allowed for this actuator type", body = Ack),
        (status = 404, description = "No such actuator", body = Ack),
        (status = 409, description = "Actuator is not active", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "actuators"
)]
pub async fn control_actuator(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<u64>,
    Json(command): Json<ControlCommand>,
) -> Result<Json<ApiResponse<ControlRecord>>, AppError> {
    let record = state
        .api
        .control_actuator(id, command, &current.user.username)
        .await?;
    let message = format!("{} set to {}", record.actuator.name, record.actuator.status);
    Ok(Json(ApiResponse::ok_with_message(record, message)))
}

/// Replace the automation rules, keyed by the sensor type they watch.
#[utoipa::path(
    put,
    path = "/api/actuators/{id}/auto-rules",
    params(("id" = u64, Path, description = "Actuator ID")),
    request_body = BTreeMap<SensorType, AutoRule>,
    responses(
        (status = 200, description = "Rules replaced", body = ApiResponse<Actuator>),
        (status = 400, description = "Rule action not allowed", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "actuators"
)]
pub async fn update_auto_rules(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
    Json(rules): Json<BTreeMap<SensorType, AutoRule>>,
) -> Result<Json<ApiResponse<Actuator>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.update_auto_rules(id, rules).await?)))
}

/// Merge into the parameter map. A `null` value removes the key.
#[utoipa::path(
    patch,
    path = "/api/actuators/{id}/parameters",
    params(("id" = u64, Path, description = "Actuator ID")),
    request_body = BTreeMap<String, serde_json::Value>,
    responses(
        (status = 200, description = "Parameters merged", body = ApiResponse<Actuator>),
        (status = 404, description = "No such actuator", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "actuators"
)]
pub async fn merge_parameters(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
    Json(params): Json<BTreeMap<String, Value>>,
) -> Result<Json<ApiResponse<Actuator>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.merge_parameters(id, params).await?)))
}

/// Control history, newest first.
#[utoipa::path(
    get,
    path = "/api/actuators/{id}/logs",
    params(("id" = u64, Path, description = "Actuator ID"), LimitParams),
    responses(
        (status = 200, description = "Log entries", body = ApiResponse<Vec<ActuatorLog>>),
        (status = 404, description = "No such actuator", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "actuators"
)]
pub async fn actuator_logs(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
    Query(params): Query<LimitParams>,
) -> Result<Json<ApiResponse<Vec<ActuatorLog>>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.actuator_logs(id, params.limit).await?)))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::{
        api::test_support::{signed_in, state, test_server},
        db::models::Role,
    };

    #[tokio::test]
    async fn control_is_visible_on_next_read() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        let resp = server
            .post("/api/actuators/1/control")
            .authorization_bearer(&token)
            .json(&json!({"action": "On"}))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["data"]["actuator"]["status"], "on");
        assert_eq!(body["data"]["log"]["user"], "alice");
        assert_eq!(body["data"]["log"]["previous_state"], "off");

        let body: Value = server
            .get("/api/actuators/1")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(body["data"]["status"], "on");

        let body: Value = server
            .get("/api/actuators/1/logs")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(body["data"][0]["action"], "on");
    }

    #[tokio::test]
    async fn invalid_action_is_rejected() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        let resp = server
            .post("/api/actuators/1/control")
            .authorization_bearer(&token)
            .json(&json!({"action": "open"}))
            .await;
        resp.assert_status_bad_request();

        let resp = server
            .post("/api/actuators/4/control")
            .authorization_bearer(&token)
            .json(&json!({"action": "on"}))
            .await;
        resp.assert_status(axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn filter_by_mode_keeps_order() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        let body: Value = server
            .get("/api/actuators")
            .add_query_param("mode", "auto")
            .authorization_bearer(&token)
            .await
            .json();
        let ids: Vec<u64> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn parameters_merge_and_null_removes() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        server
            .patch("/api/actuators/2/parameters")
            .authorization_bearer(&token)
            .json(&json!({"speed": 3}))
            .await
            .assert_status_ok();
        let body: Value = server
            .patch("/api/actuators/2/parameters")
            .authorization_bearer(&token)
            .json(&json!({"speed": null}))
            .await
            .json();
        assert!(body["data"]["parameters"].get("speed").is_none());
    }
}
