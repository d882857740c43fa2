pub mod auth;
pub mod dto;
pub mod errors;
pub mod extract;
pub mod handlers;

use axum::{
    routing::{get, patch, post, put},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::{auth::SessionManager, backup::BackupManager, realtime::LiveState, remote::FarmApi};
use handlers::{actuators, alerts, auth as auth_routes, sensors, system, users, ApiDoc};

/// Everything a handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub api: FarmApi,
    pub sessions: SessionManager,
    pub backups: BackupManager,
    pub live: LiveState,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        // auth & users
        .route("/api/auth/register", post(auth_routes::register))
        .route("/api/auth/login", post(auth_routes::login))
        .route("/api/auth/logout", post(auth_routes::logout))
        .route(
            "/api/auth/me",
            get(auth_routes::profile).put(auth_routes::update_profile),
        )
        .route("/api/auth/password", put(auth_routes::change_password))
        .route("/api/users", get(users::list_users))
        .route(
            "/api/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        // sensors
        .route(
            "/api/sensors",
            get(sensors::list_sensors).post(sensors::create_sensor),
        )
        .route("/api/sensors/stats", get(sensors::sensor_stats))
        .route(
            "/api/sensors/{id}",
            get(sensors::get_sensor)
                .put(sensors::update_sensor)
                .delete(sensors::delete_sensor),
        )
        .route(
            "/api/sensors/{id}/readings",
            get(sensors::list_readings).post(sensors::add_reading),
        )
        // actuators
        .route(
            "/api/actuators",
            get(actuators::list_actuators).post(actuators::create_actuator),
        )
        .route(
            "/api/actuators/{id}",
            get(actuators::get_actuator)
                .put(actuators::update_actuator)
                .delete(actuators::delete_actuator),
        )
        .route("/api/actuators/{id}/control", post(actuators::control_actuator))
        .route("/api/actuators/{id}/auto-rules", put(actuators::update_auto_rules))
        .route("/api/actuators/{id}/parameters", patch(actuators::merge_parameters))
        .route("/api/actuators/{id}/logs", get(actuators::actuator_logs))
        // alerts
        .route("/api/alerts", get(alerts::list_alerts))
        .route("/api/alerts/unread-count", get(alerts::unread_count))
        .route("/api/alerts/read-all", put(alerts::mark_all_read))
        .route("/api/alerts/{id}", axum::routing::delete(alerts::delete_alert))
        .route("/api/alerts/{id}/read", put(alerts::mark_read))
        .route("/api/alerts/{id}/acknowledge", put(alerts::acknowledge))
        .route(
            "/api/alert-thresholds",
            get(alerts::list_thresholds).post(alerts::create_threshold),
        )
        .route(
            "/api/alert-thresholds/{id}",
            put(alerts::update_threshold).delete(alerts::delete_threshold),
        )
        .route(
            "/api/alert-preferences",
            get(alerts::get_preferences).put(alerts::update_preferences),
        )
        // system
        .route("/api/dashboard", get(system::dashboard))
        .route("/api/live", get(system::live_state))
        .route("/api/events", get(system::events))
        .route(
            "/api/backups",
            get(system::list_backups).post(system::create_backup),
        )
        .route("/api/backups/{id}/restore", post(system::restore_backup))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(system::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum_test::TestServer;
    use chrono::Utc;

    use super::{router, AppState};
    use crate::{
        auth::SessionManager,
        backup::BackupManager,
        control::{ControlService, NullSink},
        db::models::{Role, User},
        farm::{next_id, test_support::demo_store},
        realtime::LiveState,
        remote::FarmApi,
    };

    pub fn state() -> AppState {
        let store = demo_store();
        let live = LiveState::new();
        let control = ControlService::new(store.clone(), live.clone(), Arc::new(NullSink), 10);
        let backup_dir = std::env::temp_dir().join(format!("farm-backups-{}", uuid::Uuid::new_v4()));
        AppState {
            api: FarmApi::new(None, store.clone(), control),
            sessions: SessionManager::new("test-secret", 3600),
            backups: BackupManager::new(backup_dir, store),
            live,
        }
    }

    pub fn test_server(state: AppState) -> TestServer {
        TestServer::new(router(state)).unwrap()
    }

    /// Stores a user directly (skipping password hashing) and returns a
    /// bearer token for it.
    pub async fn signed_in(state: &AppState, username: &str, role: Role) -> (User, String) {
        let username = username.to_owned();
        let user = state
            .api
            .local()
            .mutate(move |users: &mut Vec<User>| {
                let now = Utc::now();
                let user = User {
                    id: next_id(users.iter().map(|u| u.id)),
                    email: format!("{username}@farm.io"),
                    username,
                    password_hash: "unusable".into(),
                    role,
                    is_active: true,
                    last_login: None,
                    created_at: now,
                    updated_at: now,
                };
                users.push(user.clone());
                Ok(user)
            })
            .await
            .unwrap();
        let (token, _) = state.sessions.issue(user.id).await.unwrap();
        (user, token)
    }
}
