use axum::{extract::State, http::StatusCode};

use crate::{
    api::{
        auth::CurrentUser,
        dto::{Ack, LimitParams, StatsParams},
        errors::AppError,
        extract::{Json, Path, Query},
        AppState,
    },
    db::models::{ReadingRecord, Sensor},
    envelope::ApiResponse,
    farm::{
        input::{NewReading, NewSensor, SensorUpdate},
        readings::SensorStats,
        SensorFilter,
    },
};

/// List sensors, optionally filtered by type, location and status.
/// Order is storage order.
#[utoipa::path(
    get,
    path = "/api/sensors",
    params(SensorFilter),
    responses(
        (status = 200, description = "Matching sensors", body = ApiResponse<Vec<Sensor>>),
        (status = 401, description = "Not signed in", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "sensors"
)]
pub async fn list_sensors(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(filter): Query<SensorFilter>,
) -> Result<Json<ApiResponse<Vec<Sensor>>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.list_sensors(filter).await?)))
}

#[utoipa::path(
    get,
    path = "/api/sensors/{id}",
    params(("id" = u64, Path, description = "Sensor ID")),
    responses(
        (status = 200, description = "Sensor", body = ApiResponse<Sensor>),
        (status = 404, description = "No such sensor", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "sensors"
)]
pub async fn get_sensor(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<Sensor>>, AppError> {
    Ok(Json(ApiResponse::ok(state.api.get_sensor(id).await?)))
}

#[utoipa::path(
    post,
    path = "/api/sensors",
    request_body = NewSensor,
    responses(
        (status = 201, description = "Sensor created", body = ApiResponse<Sensor>),
        (status = 400, description = "Missing or invalid field", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "sensors"
)]
pub async fn create_sensor(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(input): Json<NewSensor>,
) -> Result<(StatusCode, Json<ApiResponse<Sensor>>), AppError> {
    let sensor = state.api.create_sensor(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(sensor, "Sensor created successfully")),
    ))
}

#[utoipa::path(
    put,
    path = "/api/sensors/{id}",
    params(("id" = u64, Path, description = "Sensor ID")),
    request_body = SensorUpdate,
    responses(
        (status = 200, description = "Sensor updated", body = ApiResponse<Sensor>),
        (status = 404, description = "No such sensor", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "sensors"
)]
pub async fn update_sensor(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
    Json(update): Json<SensorUpdate>,
) -> Result<Json<ApiResponse<Sensor>>, AppError> {
    let sensor = state.api.update_sensor(id, update).await?;
    Ok(Json(ApiResponse::ok_with_message(sensor, "Sensor updated successfully")))
}

#[utoipa::path(
    delete,
    path = "/api/sensors/{id}",
    params(("id" = u64, Path, description = "Sensor ID")),
    responses(
        (status = 200, description = "Sensor deleted", body = Ack),
        (status = 404, description = "No such sensor", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "sensors"
)]
pub async fn delete_sensor(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.api.delete_sensor(id).await?;
    Ok(Json(ApiResponse::message("Sensor deleted successfully")))
}

/// Reading history of one sensor, newest first.
#[utoipa::path(
    get,
    path = "/api/sensors/{id}/readings",
    params(("id" = u64, Path, description = "Sensor ID"), LimitParams),
    responses(
        (status = 200, description = "Readings", body = ApiResponse<Vec<ReadingRecord>>),
        (status = 404, description = "No such sensor", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "sensors"
)]
pub async fn list_readings(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
    Query(params): Query<LimitParams>,
) -> Result<Json<ApiResponse<Vec<ReadingRecord>>>, AppError> {
    let readings = state.api.sensor_readings(id, params.limit).await?;
    Ok(Json(ApiResponse::ok(readings)))
}

/// Record a reading. It becomes the sensor's last reading unless an
/// equal-or-newer one is already stored.
#[utoipa::path(
    post,
    path = "/api/sensors/{id}/readings",
    params(("id" = u64, Path, description = "Sensor ID")),
    request_body = NewReading,
    responses(
        (status = 201, description = "Reading stored", body = ApiResponse<ReadingRecord>),
        (status = 404, description = "No such sensor", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "sensors"
)]
pub async fn add_reading(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<u64>,
    Json(input): Json<NewReading>,
) -> Result<(StatusCode, Json<ApiResponse<ReadingRecord>>), AppError> {
    let record = state.api.add_reading(id, input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(record))))
}

/// Min, max and average per sensor type over the last day, week or month.
#[utoipa::path(
    get,
    path = "/api/sensors/stats",
    params(StatsParams),
    responses(
        (status = 200, description = "Statistics", body = ApiResponse<SensorStats>),
        (status = 400, description = "Invalid period", body = Ack),
        (status = 404, description = "No sensors of that type", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "sensors"
)]
pub async fn sensor_stats(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(params): Query<StatsParams>,
) -> Result<Json<ApiResponse<SensorStats>>, AppError> {
    let period = params.period.as_deref().unwrap_or("day");
    let stats = state.api.local().sensor_stats(period, params.sensor_type).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use crate::{
        api::test_support::{signed_in, state, test_server},
        db::models::Role,
    };

    fn ids(body: &Value) -> Vec<u64> {
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_u64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn filter_returns_matching_subset_in_order() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        let body: Value = server
            .get("/api/sensors")
            .add_query_param("location", "greenhouse 1")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(ids(&body), vec![1, 2, 4]);

        let body: Value = server
            .get("/api/sensors")
            .add_query_param("status", "inactive")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(ids(&body), vec![4]);
    }

    #[tokio::test]
    async fn malformed_requests_get_the_failure_envelope() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        let resp = server
            .post("/api/sensors")
            .authorization_bearer(&token)
            .json(&json!({"name": "Odd", "type": "plasma", "location": "Field 1"}))
            .await;
        resp.assert_status_bad_request();
        let body: Value = resp.json();
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("plasma"));

        let resp = server.get("/api/sensors/abc").authorization_bearer(&token).await;
        resp.assert_status_bad_request();
        let body: Value = resp.json();
        assert_eq!(body["success"], false);

        let resp = server
            .get("/api/sensors")
            .add_query_param("type", "plasma")
            .authorization_bearer(&token)
            .await;
        resp.assert_status_bad_request();
        assert_eq!(resp.json::<Value>()["success"], false);

        let body: Value = server.get("/api/sensors").authorization_bearer(&token).await.json();
        assert_eq!(ids(&body), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn delete_removes_exactly_that_sensor() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        server
            .delete("/api/sensors/2")
            .authorization_bearer(&token)
            .await
            .assert_status_ok();

        let body: Value = server.get("/api/sensors").authorization_bearer(&token).await.json();
        assert_eq!(ids(&body), vec![1, 3, 4]);

        let resp = server.delete("/api/sensors/2").authorization_bearer(&token).await;
        resp.assert_status_not_found();
        let body: Value = resp.json();
        assert_eq!(body["message"], "Sensor with ID 2 not found");
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        let resp = server
            .post("/api/sensors")
            .authorization_bearer(&token)
            .json(&json!({"name": "CO2 meter", "type": "co2", "location": "Greenhouse 3"}))
            .await;
        resp.assert_status(axum::http::StatusCode::CREATED);
        let body: Value = resp.json();
        assert_eq!(body["data"]["id"], 5);

        let body: Value = server
            .get("/api/sensors/5")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(body["data"]["type"], "co2");
    }

    #[tokio::test]
    async fn older_reading_does_not_replace_last_reading() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        let now = Utc::now();
        server
            .post("/api/sensors/1/readings")
            .authorization_bearer(&token)
            .json(&json!({"value": 27.0, "timestamp": now}))
            .await
            .assert_status(axum::http::StatusCode::CREATED);
        server
            .post("/api/sensors/1/readings")
            .authorization_bearer(&token)
            .json(&json!({"value": 3.0, "timestamp": now - Duration::hours(2)}))
            .await
            .assert_status(axum::http::StatusCode::CREATED);

        let body: Value = server.get("/api/sensors/1").authorization_bearer(&token).await.json();
        assert_eq!(body["data"]["last_reading"]["value"], 27.0);

        let body: Value = server
            .get("/api/sensors/1/readings")
            .add_query_param("limit", 1)
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(body["data"][0]["value"], 27.0);
    }

    #[tokio::test]
    async fn stats_reject_unknown_period() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        let resp = server
            .get("/api/sensors/stats")
            .add_query_param("period", "year")
            .authorization_bearer(&token)
            .await;
        resp.assert_status_bad_request();

        server
            .get("/api/sensors/stats")
            .authorization_bearer(&token)
            .await
            .assert_status_ok();
    }
}
