use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Admin session required")]
    Forbidden,

    #[error("Email already in use: {0}")]
    DuplicateEmail(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Passwords don't match")]
    PasswordMismatch,

    #[error("A bet on event {0} has already been placed")]
    DuplicateBet(u64),

    #[error("Minimum bet amount is {min:.2}")]
    BelowMinimum { min: f64 },

    #[error("Amount {amount:.2} is outside the allowed range {min:.2}-{max:.2}")]
    OutOfRange { amount: f64, min: f64, max: f64 },

    #[error("Insufficient funds: balance {balance:.2}, requested {requested:.2}")]
    InsufficientFunds { balance: f64, requested: f64 },

    #[error("A receipt image is required for deposits")]
    MissingReceipt,

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("Selection {0:?} is not an outcome of this event")]
    InvalidSelection(String),

    #[error("Betting option {0} is not active")]
    OptionInactive(u64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} has already been settled")]
    AlreadySettled(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotAuthenticated | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateEmail(_) | AppError::DuplicateBet(_) | AppError::AlreadySettled(_) => {
                StatusCode::CONFLICT
            }
            AppError::PasswordMismatch
            | AppError::BelowMinimum { .. }
            | AppError::OutOfRange { .. }
            | AppError::InsufficientFunds { .. }
            | AppError::MissingReceipt
            | AppError::InvalidPhone(_)
            | AppError::InvalidSelection(_)
            | AppError::OptionInactive(_)
            | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Json(_)
            | AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Config(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_facing_errors_are_client_errors() {
        assert_eq!(AppError::DuplicateBet(1).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::MissingReceipt.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::NotAuthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::NotFound("bet x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Config("bad".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn insufficient_funds_message_shows_amounts() {
        let e = AppError::InsufficientFunds { balance: 2000.0, requested: 5000.0 };
        assert_eq!(e.to_string(), "Insufficient funds: balance 2000.00, requested 5000.00");
    }
}
