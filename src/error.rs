use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::{
    categories::CategoryStoreError, ordering::OrderingError, overlay::DragError,
    payment::PaymentError, posts::ValidationError, remote_config::ConfigValidationError,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigValidationError),

    #[error(transparent)]
    Ordering(#[from] OrderingError),

    #[error(transparent)]
    Drag(#[from] DragError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Not signed in as an administrator")]
    Unauthorized,

    #[error("Payment gateway error: {0}")]
    Upstream(String),

    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<CategoryStoreError> for AppError {
    fn from(e: CategoryStoreError) -> Self {
        match e {
            CategoryStoreError::Ordering(e) => AppError::Ordering(e),
            CategoryStoreError::Storage(e) => AppError::Internal(e),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(e.into())
    }
}

impl From<PaymentError> for AppError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::InvalidAmount
            | PaymentError::MissingField(_)
            | PaymentError::InvalidPaymentId(_) => {
                AppError::BadRequest(e.to_string())
            }
            PaymentError::Transport(_) | PaymentError::Rejected { .. } => {
                AppError::Upstream(e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_)
            | AppError::Config(_)
            | AppError::Drag(_)
            | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Ordering(OrderingError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Ordering(OrderingError::EmptyName) => StatusCode::BAD_REQUEST,
            AppError::Ordering(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!(status = status.as_u16(), "Request rejected: {}", self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
