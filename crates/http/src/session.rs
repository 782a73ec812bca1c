//! Session guard: token lifecycle, single-flight refresh and cross-tab logout
//!
//! The guard is the only owner of the access/refresh token pair. Requests
//! read the current `Authorization` header from it, and a 401 from the API
//! funnels into [`SessionGuard::ensure_single_refresh`], which makes sure only
//! one refresh call is ever in flight. Whatever ends the session (logout, a
//! rejected refresh, another tab logging out) goes through
//! [`SessionGuard::logout`], so status, storage, header and cache never
//! disagree.

use crate::client::auth::TokenEndpoint;
use crate::error::{ClientError, SessionError};
use crate::types::TokenPair;
use arc_swap::ArcSwapOption;
use futures::FutureExt;
use futures::future::Shared;
use gitdm_core::{
    ACCESS_TOKEN_KEY, AuthStatus, CoreError, QueryCache, REFRESH_TOKEN_KEY, StorageEvent,
    StorageEvents, TokenStore,
};
use reqwest::header::HeaderValue;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[cfg(not(target_arch = "wasm32"))]
type RefreshFuture = futures::future::BoxFuture<'static, Result<(), SessionError>>;
#[cfg(target_arch = "wasm32")]
type RefreshFuture = futures::future::LocalBoxFuture<'static, Result<(), SessionError>>;

/// Awaitable handle on the refresh in flight, shared by every waiter
pub type PendingRefresh = Shared<RefreshFuture>;

/// Owner of the session tokens
pub struct SessionGuard {
    store: Arc<dyn TokenStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    cache: Arc<QueryCache>,
    authorization: ArcSwapOption<HeaderValue>,
    status: watch::Sender<AuthStatus>,
    pending: Mutex<Option<PendingRefresh>>,
    /// Bumped by login and logout. A refresh only commits its token if the
    /// generation it started in is still current.
    generation: Mutex<u64>,
}

fn bearer(token: &str) -> Result<HeaderValue, SessionError> {
    let mut value =
        HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| SessionError::InvalidToken)?;
    value.set_sensitive(true);
    Ok(value)
}

impl SessionGuard {
    /// Create a guard in the `Loading` state; call [`initialize`](Self::initialize) next
    pub fn new(
        store: Arc<dyn TokenStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        cache: Arc<QueryCache>,
    ) -> Self {
        let (status, _) = watch::channel(AuthStatus::Loading);
        Self {
            store,
            endpoint,
            cache,
            authorization: ArcSwapOption::empty(),
            status,
            pending: Mutex::new(None),
            generation: Mutex::new(0),
        }
    }

    /// Determine the initial auth state from persisted tokens.
    ///
    /// Never fails: an unusable stored session ends in [`logout`](Self::logout).
    pub async fn initialize(self: &Arc<Self>) {
        let access = match self.store.get(ACCESS_TOKEN_KEY) {
            Ok(access) => access,
            Err(e) => {
                warn!(error = %e, "Failed to read stored access token");
                self.logout();
                return;
            }
        };
        let Some(access) = access else {
            debug!("No stored session");
            self.status.send_replace(AuthStatus::Anonymous);
            return;
        };

        match bearer(&access) {
            Ok(header) => self.authorization.store(Some(Arc::new(header))),
            Err(e) => warn!(error = %e, "Ignoring unusable stored access token"),
        }

        match self.ensure_single_refresh().await {
            Ok(()) => {
                self.status.send_replace(AuthStatus::Authenticated);
                info!("Restored stored session");
            }
            Err(SessionError::Superseded) => {
                debug!("Session changed while it was being restored");
            }
            Err(e) => {
                info!(error = %e, "Stored session is no longer valid");
                self.logout();
            }
        }
    }

    /// Exchange credentials for a token pair.
    ///
    /// On failure nothing is written and the previous state stays in place.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ClientError> {
        let pair = self.endpoint.obtain_pair(email, password).await?;
        let header = bearer(&pair.access)?;
        self.commit_login(&pair, header)?;
        info!("Logged in");
        Ok(())
    }

    fn commit_login(&self, pair: &TokenPair, header: HeaderValue) -> Result<(), CoreError> {
        let mut generation = self.lock_generation();
        self.persist_pair(pair)?;
        *generation += 1;
        self.authorization.store(Some(Arc::new(header)));
        self.status.send_replace(AuthStatus::Authenticated);
        Ok(())
    }

    fn persist_pair(&self, pair: &TokenPair) -> Result<(), CoreError> {
        let previous_access = self.store.get(ACCESS_TOKEN_KEY)?;
        self.store.set(ACCESS_TOKEN_KEY, &pair.access)?;
        if let Err(e) = self.store.set(REFRESH_TOKEN_KEY, &pair.refresh) {
            let restored = match previous_access {
                Some(access) => self.store.set(ACCESS_TOKEN_KEY, &access),
                None => self.store.remove(ACCESS_TOKEN_KEY),
            };
            if let Err(restore_error) = restored {
                warn!(error = %restore_error, "Failed to restore previous access token");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Trade the stored refresh token for a new access token.
    ///
    /// Any failure logs the session out before it is returned. Prefer
    /// [`ensure_single_refresh`](Self::ensure_single_refresh) when other
    /// requests may be refreshing at the same time.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        match self.try_refresh().await {
            Ok(()) => Ok(()),
            Err(e @ SessionError::Superseded) => {
                info!("Session changed during token refresh, discarding the new token");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.logout();
                Err(e)
            }
        }
    }

    async fn try_refresh(&self) -> Result<(), SessionError> {
        let generation = *self.lock_generation();
        let refresh = self
            .store
            .get(REFRESH_TOKEN_KEY)?
            .ok_or(SessionError::MissingRefreshToken)?;

        debug!("Refreshing access token");
        let token = self.endpoint.refresh_access(&refresh).await?;
        let header = bearer(&token.access)?;
        self.commit_refresh(generation, &token.access, header)?;
        info!("Access token refreshed");
        Ok(())
    }

    fn commit_refresh(
        &self,
        started_in: u64,
        access: &str,
        header: HeaderValue,
    ) -> Result<(), SessionError> {
        let generation = self.lock_generation();
        if *generation != started_in {
            return Err(SessionError::Superseded);
        }
        self.store.set(ACCESS_TOKEN_KEY, access)?;
        self.authorization.store(Some(Arc::new(header)));
        Ok(())
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the refresh in flight, or start one.
    ///
    /// At most one refresh call is outstanding at any time; every caller
    /// that joins it sees the same outcome. The handle is dropped once the
    /// refresh settles, whether it succeeded or not.
    pub fn ensure_single_refresh(self: &Arc<Self>) -> PendingRefresh {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(in_flight) = pending.as_ref() {
            debug!("Joining in-flight token refresh");
            return in_flight.clone();
        }

        let guard = Arc::clone(self);
        let refresh = async move {
            let result = guard.refresh().await;
            guard
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            result
        };

        #[cfg(not(target_arch = "wasm32"))]
        let handle = refresh.boxed().shared();
        #[cfg(target_arch = "wasm32")]
        let handle = refresh.boxed_local().shared();

        *pending = Some(handle.clone());
        handle
    }

    /// End the session: forget both tokens, the header and every cached response.
    ///
    /// Safe to call any number of times. A refresh still in flight is
    /// discarded when it returns.
    pub fn logout(&self) {
        let mut generation = self.lock_generation();
        *generation += 1;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(key, error = %e, "Failed to clear stored token");
            }
        }
        self.authorization.store(None);
        self.cache.clear();
        let previous = self.status.send_replace(AuthStatus::Anonymous);
        drop(generation);
        if previous == AuthStatus::Authenticated {
            info!("Logged out");
        }
    }

    /// React to a change made by another tab.
    ///
    /// Returns true if the change ended this session.
    pub fn handle_storage_event(&self, event: &StorageEvent) -> bool {
        if !event.removes(REFRESH_TOKEN_KEY) {
            return false;
        }
        info!("Refresh token removed by another tab, logging out");
        self.logout();
        true
    }

    /// Changes made to the token store by other tabs
    pub fn storage_events(&self) -> StorageEvents {
        self.store.events()
    }

    /// Apply storage changes until the store goes away
    pub async fn watch_storage(&self, mut events: StorageEvents) {
        while let Some(event) = events.recv().await {
            self.handle_storage_event(&event);
        }
        debug!("Token store closed, storage sync stopped");
    }

    /// Keep this guard in sync with other tabs on a background task.
    ///
    /// The task holds only a weak reference and ends with the guard.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn spawn_storage_sync(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(storage_sync(Arc::downgrade(self), self.storage_events()))
    }

    /// Keep this guard in sync with other tabs on the browser event loop
    #[cfg(target_arch = "wasm32")]
    pub fn spawn_storage_sync(self: &Arc<Self>) {
        wasm_bindgen_futures::spawn_local(storage_sync(
            Arc::downgrade(self),
            self.storage_events(),
        ));
    }

    pub fn status(&self) -> AuthStatus {
        *self.status.borrow()
    }

    pub fn is_authenticated(&self) -> bool {
        self.status().is_authenticated()
    }

    /// Follow status changes, e.g. to redirect to the login view
    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status.subscribe()
    }

    /// Header attached to outgoing requests, if logged in
    pub fn authorization_header(&self) -> Option<HeaderValue> {
        self.authorization.load_full().map(|value| (*value).clone())
    }

    /// Response cache cleared on logout
    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }
}

async fn storage_sync(guard: Weak<SessionGuard>, mut events: StorageEvents) {
    while let Some(event) = events.recv().await {
        let Some(guard) = guard.upgrade() else {
            break;
        };
        guard.handle_storage_event(&event);
    }
    debug!("Storage sync stopped");
}
