//! Request extractors for authenticated routes.

use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;

use super::{errors::AppError, AppState};
use crate::{
    auth::Session,
    db::models::{Role, User},
    error::FarmError,
};

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Bearer header first; `?token=` is accepted for EventSource clients that
/// cannot set headers.
fn extract_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_owned());
    from_header.or_else(|| {
        Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.token)
    })
}

/// The signed-in, active user behind the request.
pub struct CurrentUser {
    pub user: User,
    pub session: Session,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts)
            .ok_or_else(|| FarmError::Unauthorized("Authentication required".into()))?;
        let session = state.sessions.validate(&token).await?;
        let user = state
            .api
            .local()
            .get_user(session.user_id)
            .await
            .map_err(|_| FarmError::Unauthorized("Session has ended".into()))?;
        if !user.is_active {
            return Err(FarmError::Forbidden("User account is deactivated".into()).into());
        }
        Ok(Self { user, session })
    }
}

/// A [`CurrentUser`] with the admin role.
pub struct AdminUser(pub CurrentUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let current = CurrentUser::from_request_parts(parts, state).await?;
        if current.user.role != Role::Admin {
            return Err(FarmError::Forbidden("Admin access required".into()).into());
        }
        Ok(Self(current))
    }
}
