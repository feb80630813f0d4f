use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;

use crate::config::HttpMethod;
use crate::error::DatasourceError;
use crate::models::query::{Query, QueryKind};

/// Outbound request, fully determined by a query descriptor and the
/// connection settings. With GET the parameters live in the URL query
/// string; with POST they are form-encoded into `form` and the URL carries
/// none.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: Url,
    pub form: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport seam: the one place network I/O happens.
#[async_trait]
pub trait Doer: Send + Sync {
    async fn send(&self, spec: RequestSpec) -> Result<HttpResponse, DatasourceError>;
}

/// API client bound to one base URL and one set of credentials (carried by
/// the underlying doer). Safe for concurrent use across queries and batches.
pub struct Client {
    doer: Arc<dyn Doer>,
    method: HttpMethod,
    base_url: Url,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("method", &self.method)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(doer: Arc<dyn Doer>, method: HttpMethod, base_url: Url) -> Self {
        Client {
            doer,
            method,
            base_url,
        }
    }

    /// Build the outbound request for a query. Pure function of the
    /// descriptor, the base URL and the configured method.
    pub fn build(&self, q: &Query) -> Result<RequestSpec, DatasourceError> {
        match q.kind {
            QueryKind::Range => {
                let mut url = self.join_path("api/v1/query_range");
                url.query_pairs_mut()
                    .append_pair("query", &q.expr)
                    .append_pair("start", &format_time(q.start))
                    .append_pair("end", &format_time(q.end))
                    .append_pair("step", &format_step(q.step));
                Ok(self.finish(url))
            }
            QueryKind::Instant => {
                let mut url = self.join_path("api/v1/query");
                {
                    let mut pairs = url.query_pairs_mut();
                    pairs.append_pair("query", &q.expr);
                    if q.end.timestamp_millis() != 0 {
                        pairs.append_pair("time", &format_time(q.end));
                    }
                }
                Ok(self.finish(url))
            }
            QueryKind::Exemplar => {
                let mut url = self.join_path("api/v1/query_exemplars");
                url.query_pairs_mut()
                    .append_pair("query", &q.expr)
                    .append_pair("start", &format_time(q.start))
                    .append_pair("end", &format_time(q.end));
                Ok(self.finish(url))
            }
        }
    }

    pub async fn query(&self, q: &Query) -> Result<HttpResponse, DatasourceError> {
        let spec = self.build(q)?;
        self.doer.send(spec).await
    }

    fn join_path(&self, suffix: &str) -> Url {
        let mut url = self.base_url.clone();
        let path = format!("{}/{}", url.path().trim_end_matches('/'), suffix);
        url.set_path(&path);
        url
    }

    fn finish(&self, mut url: Url) -> RequestSpec {
        match self.method {
            HttpMethod::Get => RequestSpec {
                method: HttpMethod::Get,
                url,
                form: None,
            },
            HttpMethod::Post => {
                let form = url.query().unwrap_or_default().to_string();
                url.set_query(None);
                RequestSpec {
                    method: HttpMethod::Post,
                    url,
                    form: Some(form),
                }
            }
        }
    }
}

/// reqwest-backed transport. Cancellation propagates by dropping the future;
/// the per-request timeout is configured on the inner client.
pub struct ReqwestDoer {
    client: reqwest::Client,
}

impl ReqwestDoer {
    pub fn new(client: reqwest::Client) -> Self {
        ReqwestDoer { client }
    }
}

#[async_trait]
impl Doer for ReqwestDoer {
    async fn send(&self, spec: RequestSpec) -> Result<HttpResponse, DatasourceError> {
        let builder = match spec.method {
            HttpMethod::Get => self.client.get(spec.url),
            HttpMethod::Post => self
                .client
                .post(spec.url)
                .header(
                    reqwest::header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(spec.form.unwrap_or_default()),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| DatasourceError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DatasourceError::Transport(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

/// Unix time as fractional seconds with nanosecond precision, in the
/// shortest decimal representation that round-trips. Keeps request
/// signatures stable for caching and log correlation.
fn format_time(t: DateTime<Utc>) -> String {
    let secs = t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9;
    format!("{secs}")
}

fn format_step(step: std::time::Duration) -> String {
    format!("{}", step.as_secs_f64())
}
