use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::error::DatasourceError;
use crate::models::query::parse_duration;

/// Default minimum step when neither the query nor the datasource settings
/// provide one.
pub const DEFAULT_MIN_STEP: Duration = Duration::from_secs(15);

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_EXEMPLAR_SAMPLE_LIMIT: usize = 100;

/// HTTP method used for query dispatch against the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Raw JSON settings object as stored with the datasource connection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonSettings {
    #[serde(default)]
    http_method: Option<String>,
    #[serde(default)]
    time_interval: Option<String>,
    #[serde(default)]
    query_timeout: Option<String>,
    #[serde(default)]
    exemplar_sample_limit: Option<usize>,
}

/// Validated per-connection configuration, resolved once and held behind the
/// `Datasource` handle.
#[derive(Debug, Clone)]
pub struct DatasourceSettings {
    pub url: Url,
    pub http_method: HttpMethod,
    /// Minimum step between points, also used as the scrape interval for
    /// `$__rate_interval` expansion.
    pub min_step: Duration,
    pub query_timeout: Duration,
    /// Upper bound on exemplars kept per series after downsampling.
    pub exemplar_sample_limit: usize,
}

impl DatasourceSettings {
    pub fn new(url: &str, json_data: &serde_json::Value) -> Result<Self, DatasourceError> {
        let url = Url::parse(url)
            .map_err(|e| DatasourceError::Config(format!("invalid url {url:?}: {e}")))?;

        let json: JsonSettings = serde_json::from_value(json_data.clone())
            .map_err(|e| DatasourceError::Config(format!("error reading settings: {e}")))?;

        let http_method = match json.http_method.as_deref() {
            None | Some("") => HttpMethod::Get,
            Some(m) if m.eq_ignore_ascii_case("get") => HttpMethod::Get,
            Some(m) if m.eq_ignore_ascii_case("post") => HttpMethod::Post,
            Some(m) => {
                return Err(DatasourceError::Config(format!("invalid httpMethod: {m}")));
            }
        };

        let min_step = match json.time_interval.as_deref() {
            None | Some("") => DEFAULT_MIN_STEP,
            Some(s) => parse_duration(s)
                .map_err(|e| DatasourceError::Config(format!("invalid timeInterval: {e}")))?,
        };

        let query_timeout = match json.query_timeout.as_deref() {
            None | Some("") => DEFAULT_QUERY_TIMEOUT,
            Some(s) => parse_duration(s)
                .map_err(|e| DatasourceError::Config(format!("invalid queryTimeout: {e}")))?,
        };

        Ok(Self {
            url,
            http_method,
            min_step,
            query_timeout,
            exemplar_sample_limit: json
                .exemplar_sample_limit
                .unwrap_or(DEFAULT_EXEMPLAR_SAMPLE_LIMIT),
        })
    }
}
