use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use compliance_common::classifier::ClassificationError;
use compliance_common::error::{EmptyInputError, StorageError};

use crate::rate_limit::BudgetError;
use crate::validation::FieldError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    EmptyInput(#[from] EmptyInputError),

    #[error(transparent)]
    RateLimited(#[from] BudgetError),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::EmptyInput(_) => StatusCode::NOT_FOUND,
            AppError::Storage(StorageError::GuidelineInUse(_)) => StatusCode::CONFLICT,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Config(_) | AppError::Classification(_) | AppError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldError>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }

        let message = self.to_string();
        let details = match self {
            AppError::Validation(details) => Some(details),
            _ => None,
        };
        (
            status,
            Json(ErrBody {
                error: message,
                details,
            }),
        )
            .into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::validation("body", rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::validation("id", rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn validation_errors_carry_field_details() {
        let response = AppError::Validation(vec![
            FieldError::new("action", "Action is required"),
            FieldError::new("guideline", "Guideline must be at least 10 characters"),
        ])
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["details"][0]["field"], "action");
        assert_eq!(body["details"][1]["message"], "Guideline must be at least 10 characters");
    }

    #[tokio::test]
    async fn other_errors_have_no_details() {
        let response = AppError::from(EmptyInputError).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "no guidelines found to classify against");
        assert!(body.get("details").is_none());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            AppError::from(StorageError::GuidelineInUse(4)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(StorageError::Worker("gone".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::from(ClassificationError::EmptyResult).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::from(BudgetError::Exhausted {
                per_second: 1,
                retry_after_ms: 900
            })
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
