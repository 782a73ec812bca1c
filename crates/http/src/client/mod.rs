//! GITDM API client

pub mod auth;
pub mod middleware;
pub mod resources;

use crate::error::ClientError;
use crate::session::SessionGuard;
use auth::{HttpTokenEndpoint, TokenEndpoint};
use gitdm_core::{QueryCache, TokenStore};
use middleware::{BearerAuth, Middleware, Next, RefreshOnUnauthorized, RequestLogging};
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

/// GITDM API client.
///
/// Cheap to clone; clones share the session and the response cache.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Arc<SessionGuard>,
    middleware: Arc<[Arc<dyn Middleware>]>,
}

impl ApiClient {
    /// Create a client with the default pipeline and an in-memory token store
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The session shared by every clone of this client
    pub fn session(&self) -> &Arc<SessionGuard> {
        &self.session
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        self.session.cache()
    }

    /// Absolute URL of an API path, with the trailing slash the API expects
    pub fn endpoint(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            format!("{}/", self.base_url)
        } else {
            format!("{}/{}/", self.base_url, path)
        }
    }

    /// Start a request; authentication is added by the pipeline
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.endpoint(path))
    }

    /// Send a request through the pipeline
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let request = request.build()?;
        Next::new(&self.http, &self.middleware).run(request).await
    }

    /// Send a request and decode its JSON body
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = checked(self.send(request).await?).await?;
        Ok(response.json().await?)
    }

    /// Send a request whose answer has no body worth reading
    pub async fn execute_empty(&self, request: RequestBuilder) -> Result<(), ClientError> {
        checked(self.send(request).await?).await?;
        Ok(())
    }
}

async fn checked(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let message = response.text().await.unwrap_or_else(|_| status.to_string());
        Err(ClientError::from_status(status, message))
    }
}

/// Builder for [`ApiClient`]
#[derive(Default)]
pub struct ApiClientBuilder {
    base_url: Option<String>,
    #[cfg(not(target_arch = "wasm32"))]
    timeout: Option<Duration>,
    user_agent: Option<String>,
    store: Option<Arc<dyn TokenStore>>,
    token_endpoint: Option<Arc<dyn TokenEndpoint>>,
    cache: Option<Arc<QueryCache>>,
    exempt_paths: Vec<String>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl ApiClientBuilder {
    /// Set the API root, e.g. `http://localhost:8000/api`
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    #[cfg(not(target_arch = "wasm32"))]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Where tokens are persisted
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the HTTP token endpoint
    pub fn token_endpoint(mut self, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        self.token_endpoint = Some(endpoint);
        self
    }

    /// Share a response cache with other clients
    pub fn cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Add a path the refresh-on-401 logic must leave alone
    pub fn exempt_path(mut self, path: impl Into<String>) -> Self {
        self.exempt_paths.push(path.into());
        self
    }

    /// Append a middleware after the built-in ones
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Build the client
    pub fn build(self) -> Result<ApiClient, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| ClientError::Configuration(format!("invalid base_url {base_url}: {e}")))?;

        let mut client_builder = ClientBuilder::new();

        #[cfg(not(target_arch = "wasm32"))]
        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        if let Some(user_agent) = self.user_agent {
            client_builder = client_builder.user_agent(user_agent);
        } else {
            client_builder = client_builder.user_agent("gitdm-client/0.1.0");
        }

        let http = client_builder.build()?;

        let store = self.store.unwrap_or_else(default_store);
        let endpoint = self
            .token_endpoint
            .unwrap_or_else(|| Arc::new(HttpTokenEndpoint::new(http.clone(), base_url.clone())));
        let cache = self.cache.unwrap_or_default();
        let session = Arc::new(SessionGuard::new(store, endpoint, cache));

        let refresh = RefreshOnUnauthorized::with_exempt_paths(
            Arc::clone(&session),
            middleware::DEFAULT_EXEMPT_PATHS
                .iter()
                .map(|path| path.to_string())
                .chain(self.exempt_paths),
        );

        let mut pipeline: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(RequestLogging),
            Arc::new(refresh),
            Arc::new(BearerAuth::new(Arc::clone(&session))),
        ];
        pipeline.extend(self.middleware);

        Ok(ApiClient {
            http,
            base_url,
            session,
            middleware: pipeline.into(),
        })
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn default_store() -> Arc<dyn TokenStore> {
    Arc::new(gitdm_core::LocalStore::in_memory())
}

#[cfg(target_arch = "wasm32")]
fn default_store() -> Arc<dyn TokenStore> {
    Arc::new(gitdm_core::BrowserStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_required() {
        let result = ApiClient::builder().build();
        assert!(matches!(result, Err(ClientError::Configuration(_))));
    }

    #[test]
    fn relative_base_url_is_rejected() {
        let result = ApiClient::new("api/v1");
        assert!(matches!(result, Err(ClientError::Configuration(_))));
    }

    #[test]
    fn endpoints_carry_one_trailing_slash() {
        let client = ApiClient::new("http://localhost:8000/api/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(
            client.endpoint("patients"),
            "http://localhost:8000/api/patients/"
        );
        assert_eq!(
            client.endpoint("/patients/7/timeline/"),
            "http://localhost:8000/api/patients/7/timeline/"
        );
        assert_eq!(client.endpoint(""), "http://localhost:8000/api/");
    }

    #[test]
    fn clones_share_the_session() {
        let client = ApiClient::new("http://localhost:8000/api").unwrap();
        let clone = client.clone();
        assert!(Arc::ptr_eq(client.session(), clone.session()));
        assert!(Arc::ptr_eq(client.cache(), clone.cache()));
    }
}
