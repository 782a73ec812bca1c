//! GITDM HTTP client
//!
//! [`SessionGuard`] owns the access/refresh token pair. [`ApiClient`] sends
//! every request through a middleware pipeline that attaches the current
//! token, refreshes the session once on a 401 and resubmits the request.
//!
//! ```no_run
//! # async fn run() -> Result<(), gitdm_http::ClientError> {
//! use gitdm_core::Resource;
//! use gitdm_http::ApiClient;
//!
//! let client = ApiClient::new("http://localhost:8000/api")?;
//! client.session().initialize().await;
//! client.session().login("doctor@example.com", "secret").await?;
//! let patients = client.list(Resource::Patients, None).await?;
//! # let _ = patients;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod session;
pub mod types;

pub use client::auth::{HttpTokenEndpoint, TokenEndpoint};
pub use client::middleware::{
    BearerAuth, DEFAULT_EXEMPT_PATHS, Middleware, Next, RefreshOnUnauthorized, RequestLogging,
};
pub use client::{ApiClient, ApiClientBuilder};
pub use error::{ClientError, SessionError};
pub use session::{PendingRefresh, SessionGuard};
pub use types::{AccessToken, TokenObtainRequest, TokenPair, TokenRefreshRequest};

// Re-export commonly used types
pub use reqwest::{Method, StatusCode};
