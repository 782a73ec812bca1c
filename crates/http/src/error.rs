//! Client error types

use gitdm_core::CoreError;
use thiserror::Error;

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or request error
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server returned an error status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The session could not be kept alive
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Token storage failed
    #[error("Token storage error: {0}")]
    Storage(#[from] CoreError),
}

impl ClientError {
    /// Create error from HTTP status code
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            _ => Self::ServerError {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// True if the server rejected our credentials
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_)
                | Self::Session(SessionError::RefreshRejected { status: 401, .. })
        )
    }

    /// True if the error ended the session
    pub fn is_session_ended(&self) -> bool {
        matches!(
            self,
            Self::Session(
                SessionError::MissingRefreshToken
                    | SessionError::RefreshRejected { .. }
                    | SessionError::Superseded
            )
        )
    }
}

/// Failure of a token refresh.
///
/// Every task waiting on the same refresh receives a copy, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No refresh token is stored
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// The refresh endpoint rejected the refresh token
    #[error("Token refresh rejected ({status}): {message}")]
    RefreshRejected { status: u16, message: String },

    /// The refresh call never got an answer
    #[error("Token refresh failed: {0}")]
    Transport(String),

    /// Reading or writing tokens failed
    #[error("Token storage error: {0}")]
    Storage(String),

    /// A token cannot be sent in an HTTP header
    #[error("Token is not a valid header value")]
    InvalidToken,

    /// The session was ended or replaced while the refresh was in flight
    #[error("Session changed during token refresh")]
    Superseded,
}

impl From<ClientError> for SessionError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Session(inner) => inner,
            ClientError::Storage(inner) => Self::Storage(inner.to_string()),
            ClientError::AuthenticationFailed(message) => Self::RefreshRejected {
                status: 401,
                message,
            },
            ClientError::BadRequest(message) => Self::RefreshRejected {
                status: 400,
                message,
            },
            ClientError::Forbidden(message) => Self::RefreshRejected {
                status: 403,
                message,
            },
            ClientError::NotFound(message) => Self::RefreshRejected {
                status: 404,
                message,
            },
            ClientError::ServerError { status, message } => {
                Self::RefreshRejected { status, message }
            }
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<CoreError> for SessionError {
    fn from(err: CoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn statuses_map_to_variants() {
        assert!(matches!(
            ClientError::from_status(StatusCode::UNAUTHORIZED, "no".into()),
            ClientError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::NOT_FOUND, "gone".into()),
            ClientError::NotFound(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::BAD_GATEWAY, "upstream".into()),
            ClientError::ServerError { status: 502, .. }
        ));
    }

    #[test]
    fn rejected_refresh_keeps_status() {
        let err = SessionError::from(ClientError::from_status(
            StatusCode::UNAUTHORIZED,
            "token_not_valid".into(),
        ));
        assert_eq!(
            err,
            SessionError::RefreshRejected {
                status: 401,
                message: "token_not_valid".into()
            }
        );
        assert!(ClientError::Session(err).is_unauthorized());
    }

    #[test]
    fn missing_refresh_token_ends_the_session() {
        let err = ClientError::from(SessionError::MissingRefreshToken);
        assert!(err.is_session_ended());
        assert_eq!(err.to_string(), "No refresh token available");
    }

    #[test]
    fn superseded_refresh_ends_the_session() {
        let err = ClientError::from(SessionError::Superseded);
        assert!(err.is_session_ended());
        assert!(!err.is_unauthorized());
    }
}
