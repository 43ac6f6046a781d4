use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use relay_common::spillover::StorageError;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureResponseCode {
    Success,
    Error,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CaptureResponse {
    pub status: CaptureResponseCode,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),
    #[error("request body is not a JSON object")]
    NotAnObject,
    #[error("event submitted without a profile")]
    MissingProfile,
    #[error("could not persist the event: {0}")]
    StorageError(#[from] StorageError),
}

impl IntoResponse for CaptureError {
    fn into_response(self) -> Response {
        let status = match self {
            CaptureError::RequestParsingError(_)
            | CaptureError::NotAnObject
            | CaptureError::MissingProfile => StatusCode::BAD_REQUEST,

            CaptureError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(CaptureResponse {
                status: CaptureResponseCode::Error,
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
