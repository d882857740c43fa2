use axum::extract::State;

use crate::{
    api::{
        auth::AdminUser,
        dto::{Ack, UserDto},
        errors::AppError,
        extract::{Json, Path},
        AppState,
    },
    envelope::ApiResponse,
    farm::input::AdminUserUpdate,
};

#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "All users", body = ApiResponse<Vec<UserDto>>),
        (status = 403, description = "Admin access required", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<ApiResponse<Vec<UserDto>>>, AppError> {
    let users = state.api.local().list_users().await?;
    Ok(Json(ApiResponse::ok(users.into_iter().map(Into::into).collect())))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = u64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User", body = ApiResponse<UserDto>),
        (status = 404, description = "No such user", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<UserDto>>, AppError> {
    let user = state.api.local().get_user(id).await?;
    Ok(Json(ApiResponse::ok(user.into())))
}

/// Change a user's name, email, role or active flag. Deactivating a user
/// ends their sessions.
#[utoipa::path(
    put,
    path = "/api/users/{id}",
    params(("id" = u64, Path, description = "User ID")),
    request_body = AdminUserUpdate,
    responses(
        (status = 200, description = "User updated", body = ApiResponse<UserDto>),
        (status = 404, description = "No such user", body = Ack),
        (status = 409, description = "Username or email already in use", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn update_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<u64>,
    Json(update): Json<AdminUserUpdate>,
) -> Result<Json<ApiResponse<UserDto>>, AppError> {
    let user = state.api.local().admin_update_user(id, update).await?;
    if !user.is_active {
        state.sessions.revoke_user(id).await;
    }
    Ok(Json(ApiResponse::ok(user.into())))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = u64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted", body = Ack),
        (status = 400, description = "Cannot delete yourself", body = Ack),
        (status = 404, description = "No such user", body = Ack),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.api.local().delete_user(admin.user.id, id).await?;
    state.sessions.revoke_user(id).await;
    Ok(Json(ApiResponse::message("User deleted successfully")))
}
