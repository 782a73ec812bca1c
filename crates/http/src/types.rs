//! Request and response bodies of the authentication endpoints

use serde::{Deserialize, Serialize};

/// Body of `POST /token/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenObtainRequest {
    pub email: String,
    pub password: String,
}

/// Answer of `POST /token/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Body of `POST /token/refresh/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshRequest {
    pub refresh: String,
}

/// Answer of `POST /token/refresh/`.
///
/// A `refresh` field, if the server sends one, is not read: the stored
/// refresh token is kept for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access: String,
}
