use std::collections::HashMap;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::cache::ClientProvider;
use crate::client::{Client, ReqwestDoer};
use crate::config::DatasourceSettings;
use crate::error::DatasourceError;

/// Builds credential-scoped HTTP clients for one datasource connection.
/// Passthrough headers become default headers so every request dispatched
/// through a cached client carries the credentials it was keyed on.
pub struct Provider {
    settings: DatasourceSettings,
}

impl Provider {
    pub fn new(settings: DatasourceSettings) -> Self {
        Provider { settings }
    }

    fn build_http_client(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<reqwest::Client, DatasourceError> {
        let mut header_map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                DatasourceError::ClientConstruction(format!("invalid header name {name:?}: {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                DatasourceError::ClientConstruction(format!("invalid value for header {name}: {e}"))
            })?;
            header_map.insert(name, value);
        }

        reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(self.settings.query_timeout)
            .build()
            .map_err(|e| DatasourceError::ClientConstruction(e.to_string()))
    }
}

impl ClientProvider for Provider {
    fn query_client(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<Arc<Client>, DatasourceError> {
        let http = self.build_http_client(headers)?;
        Ok(Arc::new(Client::new(
            Arc::new(ReqwestDoer::new(http)),
            self.settings.http_method,
            self.settings.url.clone(),
        )))
    }

    fn http_client(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<reqwest::Client, DatasourceError> {
        self.build_http_client(headers)
    }
}
