use axum::{extract::State, http::StatusCode};
use chrono::{TimeZone, Utc};

use crate::{
    api::{
        auth::CurrentUser,
        dto::{Ack, LoginResponse, UserDto},
        errors::AppError,
        extract::Json,
        AppState,
    },
    envelope::ApiResponse,
    error::FarmError,
    farm::input::{LoginInput, PasswordChange, ProfileUpdate, RegisterInput},
};

/// Create an account. The first account becomes an admin.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterInput,
    responses(
        (status = 201, description = "User registered", body = ApiResponse<UserDto>),
        (status = 400, description = "Missing or invalid field", body = Ack),
        (status = 409, description = "Username or email already in use", body = Ack),
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterInput>,
) -> Result<(StatusCode, Json<ApiResponse<UserDto>>), AppError> {
    let user = state.api.local().register(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(
            user.into(),
            "User registered successfully",
        )),
    ))
}

/// Exchange email and password for a bearer token.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginInput,
    responses(
        (status = 200, description = "Signed in", body = ApiResponse<LoginResponse>),
        (status = 401, description = "Invalid email or password", body = Ack),
        (status = 403, description = "Account deactivated", body = Ack),
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> Result<Json<ApiResponse<LoginResponse>>, AppError> {
    let user = state.api.local().authenticate(input).await?;
    let (token, session) = state.sessions.issue(user.id).await?;
    let expires_at = Utc
        .timestamp_opt(session.expires_at, 0)
        .single()
        .ok_or_else(|| FarmError::Internal("session expiry out of range".into()))?;

    Ok(Json(ApiResponse::ok(LoginResponse {
        user: user.into(),
        token,
        expires_at,
    })))
}

/// End the current session. Its event streams close.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Signed out", body = Ack),
        (status = 401, description = "Not signed in", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Json<ApiResponse<()>> {
    state.sessions.revoke(&current.session.nonce).await;
    Json(ApiResponse::message("Logged out successfully"))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = ApiResponse<UserDto>),
        (status = 401, description = "Not signed in", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn profile(current: CurrentUser) -> Json<ApiResponse<UserDto>> {
    Json(ApiResponse::ok(current.user.into()))
}

#[utoipa::path(
    put,
    path = "/api/auth/me",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Profile updated", body = ApiResponse<UserDto>),
        (status = 409, description = "Username or email already in use", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn update_profile(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ApiResponse<UserDto>>, AppError> {
    let user = state.api.local().update_profile(current.user.id, update).await?;
    Ok(Json(ApiResponse::ok(user.into())))
}

#[utoipa::path(
    put,
    path = "/api/auth/password",
    request_body = PasswordChange,
    responses(
        (status = 200, description = "Password changed", body = Ack),
        (status = 400, description = "Wrong current password or weak new one", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn change_password(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(change): Json<PasswordChange>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.api.local().change_password(current.user.id, change).await?;
    Ok(Json(ApiResponse::message("Password changed successfully")))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::{
        api::test_support::{signed_in, state, test_server},
        db::models::Role,
    };

    #[tokio::test]
    async fn register_login_and_fetch_profile() {
        let server = test_server(state());

        let resp = server
            .post("/api/auth/register")
            .json(&json!({"username": "alice", "email": "alice@farm.io", "password": "secret1"}))
            .await;
        resp.assert_status(axum::http::StatusCode::CREATED);
        let body: Value = resp.json();
        assert_eq!(body["data"]["role"], "admin");
        assert!(body["data"].get("password_hash").is_none());

        let resp = server
            .post("/api/auth/login")
            .json(&json!({"email": "alice@farm.io", "password": "secret1"}))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        let token = body["data"]["token"].as_str().unwrap().to_owned();

        let resp = server
            .get("/api/auth/me")
            .authorization_bearer(&token)
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["data"]["username"], "alice");
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected_and_users_unchanged() {
        let state = state();
        let (admin, token) = signed_in(&state, "alice", Role::Admin).await;
        let server = test_server(state);

        let resp = server
            .post("/api/auth/register")
            .json(&json!({"username": "alice", "email": "new@farm.io", "password": "secret1"}))
            .await;
        resp.assert_status(axum::http::StatusCode::CONFLICT);
        let body: Value = resp.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Username alice is already taken");

        let resp = server
            .post("/api/auth/register")
            .json(&json!({"username": "bob", "email": admin.email, "password": "secret1"}))
            .await;
        let body: Value = resp.json();
        assert_eq!(body["message"], "Email alice@farm.io is already registered");

        let resp = server.get("/api/users").authorization_bearer(&token).await;
        let body: Value = resp.json();
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn logout_revokes_token() {
        let state = state();
        let (_, token) = signed_in(&state, "alice", Role::User).await;
        let server = test_server(state);

        server
            .post("/api/auth/logout")
            .authorization_bearer(&token)
            .await
            .assert_status_ok();

        let resp = server.get("/api/auth/me").authorization_bearer(&token).await;
        resp.assert_status_unauthorized();
        let body: Value = resp.json();
        assert_eq!(body["message"], "Session has ended");
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let server = test_server(state());
        let resp = server.get("/api/auth/me").await;
        resp.assert_status_unauthorized();
        let body: Value = resp.json();
        assert_eq!(body["message"], "Authentication required");
    }
}
