use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio::time::error::Elapsed;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Access denied")]
    AccessDenied,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid or expired redeemToken")]
    InvalidToken,

    #[error("{0}")]
    NotEligible(String),

    #[error("Share link has expired")]
    ShareExpired,

    #[error("Password required")]
    PasswordRequired,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Too many requests")]
    RateLimited,

    #[error("{0}")]
    Validation(String),

    #[error("Internal server error")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::AccessDenied => (StatusCode::FORBIDDEN, "ACCESS_DENIED"),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
            AppError::NotEligible(_) => (StatusCode::BAD_REQUEST, "NOT_ELIGIBLE"),
            AppError::ShareExpired => (StatusCode::NOT_FOUND, "SHARE_EXPIRED"),
            AppError::PasswordRequired => (StatusCode::UNAUTHORIZED, "PASSWORD_REQUIRED"),
            AppError::InvalidPassword => (StatusCode::UNAUTHORIZED, "INVALID_PASSWORD"),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(cause) = &self {
            tracing::error!("{}", cause);
        }
        let (status, code) = self.status_and_code();
        let body = Json(ErrorBody {
            error: code,
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<Elapsed> for AppError {
    fn from(err: Elapsed) -> Self {
        AppError::Internal(format!("Store operation timed out: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_statuses() {
        assert_eq!(AppError::NotFound.status_and_code().0, StatusCode::NOT_FOUND);
        assert_eq!(AppError::AccessDenied.status_and_code().0, StatusCode::FORBIDDEN);
        assert_eq!(AppError::InvalidToken.status_and_code().0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::NotEligible("Coupon redemption limit reached".into()).status_and_code().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::ShareExpired.status_and_code(), (StatusCode::NOT_FOUND, "SHARE_EXPIRED"));
        assert_eq!(
            AppError::PasswordRequired.status_and_code(),
            (StatusCode::UNAUTHORIZED, "PASSWORD_REQUIRED")
        );
        assert_eq!(
            AppError::InvalidPassword.status_and_code(),
            (StatusCode::UNAUTHORIZED, "INVALID_PASSWORD")
        );
        assert_eq!(AppError::RateLimited.status_and_code().0, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn not_eligible_carries_the_reason() {
        let err = AppError::NotEligible("Customer redemption limit reached".into());
        assert_eq!(err.to_string(), "Customer redemption limit reached");
    }

    #[test]
    fn internal_message_stays_generic() {
        let err = AppError::Internal("connection reset".into());
        assert_eq!(err.to_string(), "Internal server error");
    }
}
