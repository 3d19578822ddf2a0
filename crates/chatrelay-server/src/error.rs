use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use chatrelay_shared::{ConversationId, SerializationError, UpstreamError};

/// The upstream session failed to establish or ended before it was ready.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Upstream connection failed: {0}")]
    Failed(String),

    #[error("Upstream session closed")]
    Closed,
}

/// A directory or event-window fetch failed.
///
/// Cloneable: a coalesced fetch hands the same error to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Upstream fetch failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Fetch was abandoned before completing")]
    Abandoned,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Encoding failed: {0}")]
    Serialization(#[from] SerializationError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Fetch(_) | ServerError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = ServerError::ConversationNotFound(ConversationId::from("c9"));
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let fetch = ServerError::from(FetchError::from(UpstreamError::Closed));
        assert_eq!(
            fetch.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let encode = ServerError::from(SerializationError::MissingField("event_id"));
        assert_eq!(
            encode.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
