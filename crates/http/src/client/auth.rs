//! Authentication endpoint client

use crate::error::ClientError;
use crate::types::{AccessToken, TokenObtainRequest, TokenPair, TokenRefreshRequest};
use async_trait::async_trait;
use gitdm_core::storage::MaybeSend;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Issues and renews tokens
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait TokenEndpoint: MaybeSend {
    /// Exchange credentials for an access/refresh pair
    async fn obtain_pair(&self, email: &str, password: &str) -> Result<TokenPair, ClientError>;

    /// Exchange a refresh token for a new access token
    async fn refresh_access(&self, refresh: &str) -> Result<AccessToken, ClientError>;
}

/// `POST {base}/token/` and `POST {base}/token/refresh/`.
///
/// Uses the bare transport: these calls never carry a bearer token and are
/// never retried.
#[derive(Clone)]
pub struct HttpTokenEndpoint {
    client: Client,
    base_url: String,
}

impl HttpTokenEndpoint {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            Err(ClientError::from_status(status, message))
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn obtain_pair(&self, email: &str, password: &str) -> Result<TokenPair, ClientError> {
        debug!(email, "Requesting token pair");
        let body = TokenObtainRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.post("/token/", &body).await
    }

    async fn refresh_access(&self, refresh: &str) -> Result<AccessToken, ClientError> {
        let body = TokenRefreshRequest {
            refresh: refresh.to_string(),
        };
        self.post("/token/refresh/", &body).await
    }
}
