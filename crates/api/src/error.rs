//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, OrderError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request that never reached a service.
    BadRequest(String),
    /// Error returned by a service.
    Domain(DomainError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Domain(err) => domain_status(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Domain(err) => {
                if status.is_server_error() {
                    tracing::error!(error = %err, %status, "request failed");
                }
                err.to_string()
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::InsufficientStock { .. } | DomainError::InvalidStatusTransition { .. } => {
            StatusCode::CONFLICT
        }
        DomainError::Infrastructure(_) => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Domain(DomainError::Validation(err))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{OrderStatus, ProductId};
    use ledger::LedgerError;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (DomainError::Validation(OrderError::NoItems), StatusCode::BAD_REQUEST),
            (
                DomainError::NotFound {
                    entity: "order",
                    id: "x".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                DomainError::InsufficientStock {
                    product_id: ProductId::new(),
                    requested: 5,
                    available: 2,
                },
                StatusCode::CONFLICT,
            ),
            (
                DomainError::InvalidStatusTransition {
                    from: OrderStatus::Delivered,
                    to: OrderStatus::Pending,
                },
                StatusCode::CONFLICT,
            ),
            (
                DomainError::Infrastructure(LedgerError::Unavailable("down".to_string())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                DomainError::Timeout(Duration::from_secs(5)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
        assert_eq!(
            ApiError::BadRequest("bad".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
