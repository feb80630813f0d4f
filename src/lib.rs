pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod legend;
pub mod models;
pub mod provider;
pub mod resource;
pub mod transcode;

use std::collections::HashMap;

use client::HttpResponse;
use config::DatasourceSettings;
use error::DatasourceError;
use executor::{Executor, QueryDataResponse};
use models::query::QueryDataRequest;
use provider::Provider;

/// One configured datasource connection: the handle the routing layer keeps
/// per connection and calls into with query batches and resource requests.
pub struct Datasource {
    executor: Executor<Provider>,
}

impl std::fmt::Debug for Datasource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datasource").finish_non_exhaustive()
    }
}

impl Datasource {
    /// Resolve a connection's base URL and JSON settings into a ready
    /// datasource. Fails with a config error on malformed settings.
    pub fn new(url: &str, json_data: &serde_json::Value) -> Result<Self, DatasourceError> {
        let settings = DatasourceSettings::new(url, json_data)?;
        let provider = Provider::new(settings.clone());
        Ok(Datasource {
            executor: Executor::new(settings, provider),
        })
    }

    /// Execute a batch of queries; the response is keyed by RefID.
    pub async fn query_data(
        &self,
        request: QueryDataRequest,
    ) -> Result<QueryDataResponse, DatasourceError> {
        self.executor.execute(request).await
    }

    /// Forward an allow-listed read-only discovery call.
    pub async fn call_resource(
        &self,
        path: &str,
        method: &str,
        headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, DatasourceError> {
        self.executor.call_resource(path, method, headers).await
    }
}
