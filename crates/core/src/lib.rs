//! GITDM core types and utilities

pub mod auth;
pub mod error;
pub mod query;
pub mod request_state;
pub mod resource;
pub mod storage;

pub use auth::{AuthStatus, RouteDecision, guard_route};
pub use error::{CoreError, CoreResult};
pub use query::{QueryCache, QueryKey, stable_stringify};
pub use request_state::RequestState;
pub use resource::{Resource, UnknownResource};
pub use storage::{
    ACCESS_TOKEN_KEY, LocalStore, MaybeSend, REFRESH_TOKEN_KEY, StorageEvent, StorageEvents,
    TokenStore,
};
#[cfg(target_arch = "wasm32")]
pub use storage::BrowserStore;
