use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::{envelope::ApiResponse, error::FarmError};

/// Renders a [`FarmError`] as the failure envelope with a matching status.
#[derive(Debug)]
pub struct AppError(pub FarmError);

impl AppError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            FarmError::NotFound(_) => StatusCode::NOT_FOUND,
            FarmError::Validation(_) => StatusCode::BAD_REQUEST,
            FarmError::Conflict(_) => StatusCode::CONFLICT,
            FarmError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            FarmError::Forbidden(_) => StatusCode::FORBIDDEN,
            FarmError::Upstream(_) => StatusCode::BAD_GATEWAY,
            FarmError::Store(_) | FarmError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        }
        let body = Json(ApiResponse::failure(self.0.to_string()));
        (status, body).into_response()
    }
}

// Malformed requests are validation failures, whatever status axum picks.
impl From<JsonRejection> for FarmError {
    fn from(r: JsonRejection) -> Self {
        FarmError::Validation(r.body_text())
    }
}

impl From<PathRejection> for FarmError {
    fn from(r: PathRejection) -> Self {
        FarmError::Validation(r.body_text())
    }
}

impl From<QueryRejection> for FarmError {
    fn from(r: QueryRejection) -> Self {
        FarmError::Validation(r.body_text())
    }
}

impl<E: Into<FarmError>> From<E> for AppError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        let cases = [
            (FarmError::not_found("Sensor", 1), StatusCode::NOT_FOUND),
            (FarmError::validation("bad"), StatusCode::BAD_REQUEST),
            (FarmError::Conflict("dup".into()), StatusCode::CONFLICT),
            (FarmError::Unauthorized("who".into()), StatusCode::UNAUTHORIZED),
            (FarmError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (FarmError::Upstream("down".into()), StatusCode::BAD_GATEWAY),
            (FarmError::Internal("oops".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError(err).status(), status);
        }
    }
}
