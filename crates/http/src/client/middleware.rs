//! Request pipeline
//!
//! Every request of an [`ApiClient`](super::ApiClient) passes through an
//! ordered list of middleware before it reaches the transport. The default
//! pipeline, outermost first:
//!
//! 1. [`RequestLogging`]: one tracing span per request, status recorded on completion
//! 2. [`RefreshOnUnauthorized`]: on 401, refresh once and resubmit once
//! 3. [`BearerAuth`]: attach the session's current `Authorization` header
//!
//! Extra middleware added through the builder runs after these, closest to
//! the transport.

use crate::error::ClientError;
use crate::session::SessionGuard;
use async_trait::async_trait;
use gitdm_core::MaybeSend;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{Instrument, debug, info_span};

/// Paths the refresh-on-401 logic never touches
pub const DEFAULT_EXEMPT_PATHS: &[&str] = &["token/refresh"];

/// One stage of the request pipeline
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Middleware: MaybeSend {
    /// Handle a request, usually by passing it on with `next.run(request)`
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response, ClientError>;
}

/// The rest of the pipeline
#[derive(Clone, Copy)]
pub struct Next<'a> {
    client: &'a Client,
    middleware: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(client: &'a Client, middleware: &'a [Arc<dyn Middleware>]) -> Self {
        Self { client, middleware }
    }

    /// Pass the request to the next middleware, or send it
    pub async fn run(self, request: Request) -> Result<Response, ClientError> {
        match self.middleware.split_first() {
            Some((current, rest)) => {
                current
                    .handle(request, Next::new(self.client, rest))
                    .await
            }
            None => Ok(self.client.execute(request).await?),
        }
    }
}

/// Wraps each request in an `http_request` span
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogging;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl Middleware for RequestLogging {
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response, ClientError> {
        let span = info_span!(
            "http_request",
            http.method = %request.method(),
            http.path = %request.url().path(),
            http.status_code = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
        );

        async move {
            #[cfg(not(target_arch = "wasm32"))]
            let started = std::time::Instant::now();

            debug!("Sending request");
            let result = next.run(request).await;

            let span = tracing::Span::current();
            #[cfg(not(target_arch = "wasm32"))]
            span.record("elapsed_ms", started.elapsed().as_millis() as u64);
            match &result {
                Ok(response) => {
                    span.record("http.status_code", response.status().as_u16());
                    debug!("Request completed");
                }
                Err(e) => debug!(error = %e, "Request failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Refreshes the session after a 401 and resubmits the request once
pub struct RefreshOnUnauthorized {
    session: Arc<SessionGuard>,
    exempt: Vec<String>,
}

impl RefreshOnUnauthorized {
    pub fn new(session: Arc<SessionGuard>) -> Self {
        Self::with_exempt_paths(session, DEFAULT_EXEMPT_PATHS.iter().copied())
    }

    /// Exempt requests whose path ends with any of `paths`.
    ///
    /// Matching is case-insensitive, ignores surrounding slashes and only
    /// compares whole segments.
    pub fn with_exempt_paths<I, S>(session: Arc<SessionGuard>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let exempt = paths
            .into_iter()
            .map(|path| normalize_path(path.as_ref()))
            .filter(|path| !path.is_empty())
            .collect();
        Self { session, exempt }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.exempt.iter().any(|exempt| ends_with_segments(&path, exempt))
    }
}

fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_ascii_lowercase()
}

fn ends_with_segments(path: &str, suffix: &str) -> bool {
    path.strip_suffix(suffix)
        .is_some_and(|rest| rest.is_empty() || rest.ends_with('/'))
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl Middleware for RefreshOnUnauthorized {
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response, ClientError> {
        if self.is_exempt(request.url().path()) {
            return next.run(request).await;
        }

        // Taken before the bearer stage, so the retry picks up the new header
        let retry = request.try_clone();
        let response = next.run(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(retry) = retry else {
            debug!("Request body cannot be replayed, not retrying");
            return Ok(response);
        };

        debug!(path = %retry.url().path(), "Unauthorized, refreshing session");
        self.session.ensure_single_refresh().await?;
        next.run(retry).await
    }
}

/// Sets `Authorization` from the session, or removes it when logged out
pub struct BearerAuth {
    session: Arc<SessionGuard>,
}

impl BearerAuth {
    pub fn new(session: Arc<SessionGuard>) -> Self {
        Self { session }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl Middleware for BearerAuth {
    async fn handle(&self, mut request: Request, next: Next<'_>) -> Result<Response, ClientError> {
        match self.session.authorization_header() {
            Some(value) => {
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            None => {
                request.headers_mut().remove(AUTHORIZATION);
            }
        }
        next.run(request).await
    }
}
