use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced by a stream session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The source could not be opened or stopped yielding frames
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    #[error("detection failed: {0}")]
    Inference(String),

    #[error("frame encoding failed: {0}")]
    Encoding(String),

    /// Malformed or unsupported client command
    #[error("invalid command: {0}")]
    Protocol(String),

    /// The consumer is gone
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl SessionError {
    pub fn acquisition(msg: impl Into<String>) -> Self {
        Self::Acquisition(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl From<SinkError> for SessionError {
    fn from(err: SinkError) -> Self {
        SessionError::Delivery(err.to_string())
    }
}

impl From<SourceError> for SessionError {
    fn from(err: SourceError) -> Self {
        SessionError::Acquisition(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("consumer disconnected")]
    Closed,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {source_name}: {reason}")]
    Open { source_name: String, reason: String },

    #[error("failed to read frame: {0}")]
    Read(String),

    #[error("source ended")]
    EndOfStream,
}

impl SourceError {
    pub fn open(source_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Open {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn read(reason: impl std::fmt::Display) -> Self {
        Self::Read(reason.to_string())
    }
}

/// HTTP error responses
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_maps_to_delivery() {
        let err: SessionError = SinkError::Closed.into();
        assert!(matches!(err, SessionError::Delivery(_)));
        assert_eq!(err.to_string(), "delivery failed: consumer disconnected");
    }

    #[test]
    fn test_source_error_maps_to_acquisition() {
        let err: SessionError = SourceError::open("webcam 1 (v4l2)", "no such device").into();
        assert_eq!(
            err.to_string(),
            "acquisition failed: failed to open webcam 1 (v4l2): no such device"
        );
    }

    #[test]
    fn test_api_error_status() {
        let response = ApiError::bad_request("empty body").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::from(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
