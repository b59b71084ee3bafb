use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{auth::AuthError, database::StoreError, identity::IdentityError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload(String),

    #[error("Not authenticated")]
    Unauthenticated(#[from] AuthError),

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account already exists")]
    Conflict,

    #[error("Store unavailable")]
    Store(#[from] StoreError),

    #[error("Identity provider unavailable")]
    Identity(IdentityError),

    #[error("Internal error")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::MalformedPayload(reason) => {
                warn!("Rejected payload: {reason}");
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthenticated(reason) => {
                warn!("Rejected token: {reason}");
                StatusCode::UNAUTHORIZED
            }
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::Store(e) => {
                error!("Store failure: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Identity(e) => {
                error!("Identity provider failure: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::InternalError(e) => {
                error!("Internal failure: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
