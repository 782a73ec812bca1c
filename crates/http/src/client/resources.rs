//! Resource API client methods

use super::ApiClient;
use crate::error::ClientError;
use gitdm_core::{QueryKey, Resource};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

/// Query-string pairs for a filter map; strings are sent without quotes
fn query_pairs(filters: &Map<String, Value>) -> Vec<(String, String)> {
    filters
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

fn detail_path(resource: Resource, id: &str) -> String {
    format!("{}/{}", resource.path(), id)
}

impl ApiClient {
    /// `GET /` listing the available endpoints
    pub async fn api_root(&self) -> Result<Value, ClientError> {
        let req = self.request(Method::GET, "");
        self.execute(req).await
    }

    async fn cached(
        &self,
        key: QueryKey,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, ClientError> {
        if let Some(value) = self.cache().get(&key) {
            debug!(key = %key, "Serving from cache");
            return Ok(value);
        }
        let epoch = self.cache().epoch();
        let value: Value = self.execute(request).await?;
        self.cache().insert_if_current(key, value.clone(), epoch);
        Ok(value)
    }

    /// List a resource, optionally filtered.
    ///
    /// Served from the response cache when the same query was made before.
    pub async fn list(
        &self,
        resource: Resource,
        filters: Option<&Map<String, Value>>,
    ) -> Result<Value, ClientError> {
        let mut req = self.request(Method::GET, resource.path());
        if let Some(filters) = filters {
            req = req.query(&query_pairs(filters));
        }
        self.cached(QueryKey::list(resource, filters), req).await
    }

    /// [`list`](Self::list), decoded into a concrete type
    pub async fn list_as<T: DeserializeOwned>(
        &self,
        resource: Resource,
        filters: Option<&Map<String, Value>>,
    ) -> Result<T, ClientError> {
        let value = self.list(resource, filters).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetch one object, from the cache when possible
    pub async fn retrieve(&self, resource: Resource, id: &str) -> Result<Value, ClientError> {
        let req = self.request(Method::GET, &detail_path(resource, id));
        self.cached(QueryKey::detail(resource, id), req).await
    }

    /// `POST /{resource}/`
    pub async fn create(&self, resource: Resource, body: &Value) -> Result<Value, ClientError> {
        let req = self.request(Method::POST, resource.path()).json(body);
        let created = self.execute(req).await?;
        self.cache().invalidate_resource(resource);
        Ok(created)
    }

    /// `PUT /{resource}/{id}/`
    pub async fn update(
        &self,
        resource: Resource,
        id: &str,
        body: &Value,
    ) -> Result<Value, ClientError> {
        let req = self
            .request(Method::PUT, &detail_path(resource, id))
            .json(body);
        let updated = self.execute(req).await?;
        self.cache().invalidate_resource(resource);
        Ok(updated)
    }

    /// `PATCH /{resource}/{id}/`
    pub async fn partial_update(
        &self,
        resource: Resource,
        id: &str,
        body: &Value,
    ) -> Result<Value, ClientError> {
        let req = self
            .request(Method::PATCH, &detail_path(resource, id))
            .json(body);
        let updated = self.execute(req).await?;
        self.cache().invalidate_resource(resource);
        Ok(updated)
    }

    /// `DELETE /{resource}/{id}/`
    pub async fn delete(&self, resource: Resource, id: &str) -> Result<(), ClientError> {
        let req = self.request(Method::DELETE, &detail_path(resource, id));
        self.execute_empty(req).await?;
        self.cache().invalidate_resource(resource);
        Ok(())
    }

    /// Encounters, labs and medications of one patient in date order
    pub async fn patient_timeline(&self, patient_id: &str) -> Result<Value, ClientError> {
        let path = format!("{}/timeline", detail_path(Resource::Patients, patient_id));
        let req = self.request(Method::GET, &path);
        let key = QueryKey::detail(Resource::Patients, patient_id).child("timeline");
        self.cached(key, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_become_plain_query_values() {
        let filters = match json!({"gender": "F", "active": true, "age": 42, "site": null}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let mut pairs = query_pairs(&filters);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("active".to_string(), "true".to_string()),
                ("age".to_string(), "42".to_string()),
                ("gender".to_string(), "F".to_string()),
            ]
        );
    }

    #[test]
    fn detail_paths_use_the_api_segment() {
        assert_eq!(detail_path(Resource::LabResults, "9"), "labs/9");
        assert_eq!(detail_path(Resource::AiSummaries, "1"), "ai-summaries/1");
    }
}
