use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coderadar_core::CodeRadarError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    CodeRadar(#[from] CodeRadarError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::CodeRadar(err) => match err {
                CodeRadarError::Validation(_) | CodeRadarError::InvalidTransition(_) => {
                    StatusCode::BAD_REQUEST
                }
                CodeRadarError::NotFound(_) => StatusCode::NOT_FOUND,
                CodeRadarError::Conflict(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
