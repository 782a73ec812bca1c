//! Persistent key-value storage for session tokens
//!
//! Tokens live in a per-origin store that several tabs (or processes) can
//! share. Every mutation is announced to the *other* tabs of the same origin
//! as a [`StorageEvent`], which is how a logout in one tab reaches the rest.

#[cfg(target_arch = "wasm32")]
mod browser;
mod local;

#[cfg(target_arch = "wasm32")]
pub use browser::BrowserStore;
pub use local::LocalStore;

use crate::error::CoreResult;
use tokio::sync::broadcast;
use tracing::warn;

/// Storage key holding the current access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Number of undelivered events a slow subscriber may fall behind by
pub(crate) const EVENT_CAPACITY: usize = 64;

/// Change notification delivered to other tabs of the same origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Changed key, `None` when the whole store was cleared
    pub key: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl StorageEvent {
    /// True when this event leaves `key` without a value
    pub fn removes(&self, key: &str) -> bool {
        match &self.key {
            Some(changed) => changed == key && self.new_value.is_none(),
            None => true,
        }
    }
}

/// Bounds required of storage backends shared between tasks.
///
/// Browser handles are tied to the JS event loop and cannot be `Send`.
#[cfg(not(target_arch = "wasm32"))]
pub trait MaybeSend: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync + ?Sized> MaybeSend for T {}

/// Bounds required of storage backends shared between tasks.
#[cfg(target_arch = "wasm32")]
pub trait MaybeSend {}
#[cfg(target_arch = "wasm32")]
impl<T: ?Sized> MaybeSend for T {}

/// Durable string store for the access/refresh token pair
pub trait TokenStore: MaybeSend {
    /// Read a value
    fn get(&self, key: &str) -> CoreResult<Option<String>>;

    /// Write a value, notifying other tabs if it changed
    fn set(&self, key: &str, value: &str) -> CoreResult<()>;

    /// Remove a value, notifying other tabs if it existed
    fn remove(&self, key: &str) -> CoreResult<()>;

    /// Subscribe to changes made by other tabs
    fn events(&self) -> StorageEvents;
}

/// Event as it travels through the origin's broadcast channel
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub(crate) source: u64,
    pub(crate) event: StorageEvent,
}

/// Stream of storage changes made by other tabs
pub struct StorageEvents {
    tab: u64,
    receiver: broadcast::Receiver<Envelope>,
}

impl StorageEvents {
    pub(crate) fn new(tab: u64, receiver: broadcast::Receiver<Envelope>) -> Self {
        Self { tab, receiver }
    }

    /// Wait for the next change from another tab.
    ///
    /// Returns `None` once every handle to the origin has been dropped.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.source == self.tab => continue,
                Ok(envelope) => return Some(envelope.event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Storage event subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next already-delivered change without waiting
    pub fn try_recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) if envelope.source == self.tab => continue,
                Ok(envelope) => return Some(envelope.event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Storage event subscriber lagged behind");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(key: Option<&str>, new_value: Option<&str>) -> StorageEvent {
        StorageEvent {
            key: key.map(str::to_string),
            old_value: Some("old".to_string()),
            new_value: new_value.map(str::to_string),
        }
    }

    #[test]
    fn removal_of_the_watched_key() {
        assert!(event(Some(REFRESH_TOKEN_KEY), None).removes(REFRESH_TOKEN_KEY));
        assert!(!event(Some(REFRESH_TOKEN_KEY), Some("new")).removes(REFRESH_TOKEN_KEY));
        assert!(!event(Some(ACCESS_TOKEN_KEY), None).removes(REFRESH_TOKEN_KEY));
    }

    #[test]
    fn clearing_the_store_removes_every_key() {
        assert!(event(None, None).removes(REFRESH_TOKEN_KEY));
        assert!(event(None, None).removes(ACCESS_TOKEN_KEY));
    }
}
