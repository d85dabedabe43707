use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::checkout::CheckoutError;
use crate::response::{ApiResponse, Meta};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Checkout(err) => match err {
                CheckoutError::EmptyCart => StatusCode::BAD_REQUEST,
                CheckoutError::ProductNotFound(_) => StatusCode::NOT_FOUND,
                CheckoutError::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
                CheckoutError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::OrmError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                error: self.to_string(),
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_errors_map_to_caller_visible_statuses() {
        let cases = [
            (CheckoutError::EmptyCart, StatusCode::BAD_REQUEST),
            (CheckoutError::ProductNotFound(999), StatusCode::NOT_FOUND),
            (
                CheckoutError::InsufficientStock {
                    product_id: 1,
                    available: 5,
                    requested: 100,
                },
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn insufficient_stock_message_carries_detail() {
        let err = AppError::from(CheckoutError::InsufficientStock {
            product_id: 7,
            available: 5,
            requested: 100,
        });
        let msg = err.to_string();
        assert!(msg.contains('7') && msg.contains('5') && msg.contains("100"), "{msg}");
    }
}
