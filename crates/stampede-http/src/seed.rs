//! Seed-data source: lists of candidate records fetched before or during a run

use crate::client::{HttpClient, RequestSpec};
use crate::error::HttpResult;
use crate::extract::ExtractionChain;
use serde::de::DeserializeOwned;
use stampede_core::MetricSink;
use std::time::Duration;
use tracing::{info, warn};

/// Where a list may sit in a seed response, in lookup order.
pub const LIST_LOCATIONS: [&str; 5] = ["", "/data", "/members", "/result", "/resultData"];

/// HTTP endpoint serving seed records. Failures never abort the caller:
/// they log a warning and yield an empty list.
#[derive(Debug, Clone)]
pub struct SeedSource {
    client: HttpClient,
    timeout: Duration,
}

impl SeedSource {
    /// Seed source at `base_url`, reusing `client`'s connection pool.
    pub fn new(client: &HttpClient, base_url: &str, timeout: Duration) -> HttpResult<Self> {
        Ok(Self {
            client: client.with_base_url(base_url)?,
            timeout,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch a list of `T`. Records that do not deserialize are dropped.
    pub async fn fetch_list<T>(&self, sink: &dyn MetricSink, request: RequestSpec) -> Vec<T>
    where
        T: DeserializeOwned + 'static,
    {
        let request = if request.has_timeout() {
            request
        } else {
            request.timeout(self.timeout)
        };
        let name = request.request_name().to_string();

        let response = self.client.send(sink, request).await;
        if !response.is_success() {
            warn!(
                name = %name,
                status = response.status,
                error = response.error.as_deref().unwrap_or(""),
                "Seed request failed"
            );
            return Vec::new();
        }
        if !response.has_body() {
            warn!(name = %name, "Seed response was empty");
            return Vec::new();
        }

        match list_chain::<T>().extract_body(&response.body) {
            Some(items) => {
                info!(name = %name, count = items.len(), "Seed data loaded");
                items
            }
            None => {
                warn!(name = %name, "Seed response held no list");
                Vec::new()
            }
        }
    }
}

fn list_chain<T: DeserializeOwned + 'static>() -> ExtractionChain<Vec<T>> {
    LIST_LOCATIONS
        .iter()
        .fold(ExtractionChain::new(), |chain, location| chain.array_at(*location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_locations_in_order() {
        let chain = list_chain::<u32>();
        assert_eq!(chain.len(), LIST_LOCATIONS.len());

        assert_eq!(chain.extract(&json!([1])), Some(vec![1]));
        assert_eq!(chain.extract(&json!({"members": [2], "result": [3]})), Some(vec![2]));
        assert_eq!(chain.extract(&json!({"resultData": [4]})), Some(vec![4]));
        assert_eq!(chain.extract(&json!({"payload": [5]})), None);
    }
}
