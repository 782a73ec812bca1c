//! Hierarchical query keys and the shared response cache
//!
//! Keys are rooted at `gitdm` and grouped per resource, so a whole resource
//! (or everything) can be invalidated by prefix:
//!
//! ```text
//! gitdm / patients / list / {"active":true}
//! gitdm / patients / detail / 42
//! gitdm / patients / detail / 42 / timeline
//! ```

use crate::resource::Resource;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

const ROOT: &str = "gitdm";

/// Cache key made of ordered segments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    /// Prefix of every key
    pub fn root() -> Self {
        Self(vec![ROOT.to_string()])
    }

    /// Everything cached for one resource
    pub fn resource_all(resource: Resource) -> Self {
        Self::root().child(resource.cache_segment())
    }

    /// All list queries of a resource
    pub fn lists(resource: Resource) -> Self {
        Self::resource_all(resource).child("list")
    }

    /// A list query with optional filters
    pub fn list(resource: Resource, filters: Option<&Map<String, Value>>) -> Self {
        let key = Self::lists(resource);
        match filters {
            Some(filters) => key.child(stable_stringify(&Value::Object(filters.clone()))),
            None => key,
        }
    }

    /// All detail queries of a resource
    pub fn details(resource: Resource) -> Self {
        Self::resource_all(resource).child("detail")
    }

    /// A single object
    pub fn detail(resource: Resource, id: &str) -> Self {
        Self::details(resource).child(id)
    }

    /// Key one level below this one
    pub fn child(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True if `prefix` is this key or one of its ancestors
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Serialize JSON with object keys in sorted order.
///
/// Equal filter maps yield equal strings whatever order they were built in.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_sorted(value, &mut out);
    out
}

fn write_sorted(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_sorted(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Response cache shared by every view of the session.
///
/// Logout clears it so no data from a previous user survives. Responses
/// that were requested before a clear or an invalidation are stored with
/// [`insert_if_current`](Self::insert_if_current), which refuses them.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<QueryKey, Value>>,
    /// Bumped, under the write lock, whenever entries are dropped
    epoch: AtomicU64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &QueryKey) -> Option<Value> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: QueryKey, value: Value) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    /// Current epoch; take it before fetching a value to cache
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Insert unless the cache was cleared or invalidated since `epoch`.
    ///
    /// Returns false if the value was dropped.
    pub fn insert_if_current(&self, key: QueryKey, value: Value, epoch: u64) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!(key = %key, "Dropping response fetched before invalidation");
            return false;
        }
        entries.insert(key, value);
        true
    }

    /// Drop every entry under `prefix`, returning how many were removed
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(prefix = %prefix, removed, "Invalidated cached queries");
        }
        removed
    }

    /// Drop lists and details of one resource
    pub fn invalidate_resource(&self, resource: Resource) -> usize {
        self.invalidate(&QueryKey::resource_all(resource))
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filters(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn keys_follow_the_resource_hierarchy() {
        assert_eq!(
            QueryKey::detail(Resource::LabResults, "7").segments(),
            ["gitdm", "lab-results", "detail", "7"]
        );
        assert_eq!(
            QueryKey::lists(Resource::MedicationOrders).to_string(),
            "gitdm/medication-orders/list"
        );
    }

    #[test]
    fn filter_order_does_not_change_the_key() {
        let a = filters(json!({"status": "active", "age": {"min": 30, "max": 60}}));
        let mut b = Map::new();
        b.insert("age".into(), json!({"max": 60, "min": 30}));
        b.insert("status".into(), json!("active"));

        assert_eq!(
            QueryKey::list(Resource::Patients, Some(&a)),
            QueryKey::list(Resource::Patients, Some(&b))
        );
        assert_eq!(
            stable_stringify(&Value::Object(a)),
            r#"{"age":{"max":60,"min":30},"status":"active"}"#
        );
    }

    #[test]
    fn unfiltered_list_is_the_lists_key() {
        assert_eq!(
            QueryKey::list(Resource::Encounters, None),
            QueryKey::lists(Resource::Encounters)
        );
    }

    #[test]
    fn invalidation_is_by_prefix() {
        let cache = QueryCache::new();
        let active = filters(json!({"active": true}));
        cache.insert(QueryKey::list(Resource::Patients, None), json!([]));
        cache.insert(QueryKey::list(Resource::Patients, Some(&active)), json!([]));
        cache.insert(QueryKey::detail(Resource::Patients, "1"), json!({"id": 1}));
        cache.insert(QueryKey::detail(Resource::Encounters, "1"), json!({"id": 1}));

        assert_eq!(cache.invalidate(&QueryKey::lists(Resource::Patients)), 2);
        assert!(cache.get(&QueryKey::detail(Resource::Patients, "1")).is_some());

        assert_eq!(cache.invalidate_resource(Resource::Patients), 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn responses_fetched_before_a_clear_are_not_stored() {
        let cache = QueryCache::new();
        let key = QueryKey::list(Resource::Patients, None);

        let epoch = cache.epoch();
        assert!(cache.insert_if_current(key.clone(), json!([1]), epoch));

        let stale = cache.epoch();
        cache.clear();
        assert!(!cache.insert_if_current(key.clone(), json!([2]), stale));
        assert!(cache.is_empty());

        let stale = cache.epoch();
        cache.invalidate_resource(Resource::Encounters);
        assert!(!cache.insert_if_current(key.clone(), json!([3]), stale));

        assert!(cache.insert_if_current(key.clone(), json!([4]), cache.epoch()));
        assert_eq!(cache.get(&key), Some(json!([4])));
    }

    #[test]
    fn detail_key_does_not_shadow_longer_ids() {
        let key = QueryKey::detail(Resource::Patients, "1");
        let other = QueryKey::detail(Resource::Patients, "10");
        assert!(!other.starts_with(&key));
        assert!(other.starts_with(&QueryKey::root()));
    }
}
