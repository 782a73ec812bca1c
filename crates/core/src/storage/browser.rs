//! `window.localStorage` backend for the browser build

use super::{EVENT_CAPACITY, Envelope, StorageEvent, StorageEvents, TokenStore};
use crate::error::{CoreError, CoreResult};
use gloo::events::EventListener;
use gloo::storage::{LocalStorage, Storage};
use tokio::sync::broadcast;
use wasm_bindgen::JsCast;

/// Events raised by the browser always come from another tab
const OTHER_TABS: u64 = 0;
const THIS_TAB: u64 = 1;

/// Token store over `localStorage`, fed by the DOM `storage` event
pub struct BrowserStore {
    events: broadcast::Sender<Envelope>,
    _listener: EventListener,
}

impl BrowserStore {
    /// Attach to the current window's local storage
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let sender = events.clone();
        let listener = EventListener::new(&gloo::utils::window(), "storage", move |event| {
            let Some(event) = event.dyn_ref::<web_sys::StorageEvent>() else {
                return;
            };
            let _ = sender.send(Envelope {
                source: OTHER_TABS,
                event: StorageEvent {
                    key: event.key(),
                    old_value: event.old_value(),
                    new_value: event.new_value(),
                },
            });
        });

        Self {
            events,
            _listener: listener,
        }
    }
}

impl Default for BrowserStore {
    fn default() -> Self {
        Self::new()
    }
}

fn js_error(operation: &str, err: wasm_bindgen::JsValue) -> CoreError {
    CoreError::io_error(format!("localStorage {operation} failed: {err:?}"))
}

impl TokenStore for BrowserStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        LocalStorage::raw()
            .get_item(key)
            .map_err(|e| js_error("read", e))
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        LocalStorage::raw()
            .set_item(key, value)
            .map_err(|e| js_error("write", e))
    }

    fn remove(&self, key: &str) -> CoreResult<()> {
        LocalStorage::raw()
            .remove_item(key)
            .map_err(|e| js_error("remove", e))
    }

    fn events(&self) -> StorageEvents {
        StorageEvents::new(THIS_TAB, self.events.subscribe())
    }
}
