use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn, Instrument};

use crate::cache::{ClientProvider, ProviderCache};
use crate::client::{Client, HttpResponse};
use crate::config::DatasourceSettings;
use crate::error::DatasourceError;
use crate::models::frame::Frame;
use crate::models::query::{format_duration, DataQuery, Query, QueryDataRequest, QueryKind};
use crate::models::response::Envelope;
use crate::resource;
use crate::transcode::transcode;

/// Result slot for one query: either its frames or the error that failed it.
#[derive(Debug, Default)]
pub struct DataResponse {
    pub frames: Vec<Frame>,
    pub error: Option<DatasourceError>,
}

impl DataResponse {
    fn frames(frames: Vec<Frame>) -> Self {
        DataResponse {
            frames,
            error: None,
        }
    }

    fn error(error: DatasourceError) -> Self {
        DataResponse {
            frames: Vec::new(),
            error: Some(error),
        }
    }
}

/// Per-batch response, keyed by RefID. Matches the inbound batch's RefIDs
/// exactly.
#[derive(Debug, Default)]
pub struct QueryDataResponse {
    pub responses: HashMap<String, DataResponse>,
}

/// Orchestrates one batch: client acquisition through the credential cache,
/// per-query dispatch under a tracing span, and response transcoding.
pub struct Executor<P> {
    settings: DatasourceSettings,
    cache: ProviderCache<P>,
}

impl<P: ClientProvider> Executor<P> {
    pub fn new(settings: DatasourceSettings, provider: P) -> Self {
        Executor {
            settings,
            cache: ProviderCache::new(provider),
        }
    }

    pub fn settings(&self) -> &DatasourceSettings {
        &self.settings
    }

    /// Execute a batch of queries. Query-level failures land in that RefID's
    /// slot only; an empty batch or a client acquisition failure aborts the
    /// whole call.
    pub async fn execute(
        &self,
        request: QueryDataRequest,
    ) -> Result<QueryDataResponse, DatasourceError> {
        if request.queries.is_empty() {
            return Err(DatasourceError::EmptyBatch);
        }

        let from_alert = request
            .headers
            .get("FromAlert")
            .is_some_and(|v| v == "true");
        let client = self.cache.query_client(&request.headers)?;

        let mut responses = HashMap::with_capacity(request.queries.len());
        for dq in &request.queries {
            let response = match self.run_query(&client, dq, from_alert).await {
                Ok(frames) => DataResponse::frames(frames),
                Err(e) => DataResponse::error(e),
            };
            responses.insert(dq.ref_id.clone(), response);
        }

        Ok(QueryDataResponse { responses })
    }

    async fn run_query(
        &self,
        client: &Arc<Client>,
        dq: &DataQuery,
        from_alert: bool,
    ) -> Result<Vec<Frame>, DatasourceError> {
        let query = Query::parse(dq, &self.settings, from_alert)?;

        let span = tracing::info_span!(
            "prometheus.query",
            expr = %query.expr,
            start_unixnano = query.start.timestamp_nanos_opt().unwrap_or_default(),
            stop_unixnano = query.end.timestamp_nanos_opt().unwrap_or_default(),
        );

        async {
            debug!(
                start = %query.start,
                end = %query.end,
                step = %format_duration(query.step),
                query = %query.expr,
                "sending query"
            );

            let response = match client.query(&query).await {
                Ok(r) if r.is_success() => r,
                Ok(r) => return self.lenient_failure(&query, upstream_error(&r)),
                Err(e) => return self.lenient_failure(&query, e),
            };

            let mut frames =
                transcode(&response.body, &query, self.settings.exemplar_sample_limit)?;

            // Surfaced to the caller's query inspector.
            let executed = format!(
                "Expr: {}\nStep: {}",
                query.expr,
                format_duration(query.step)
            );
            for frame in &mut frames {
                frame.meta.executed_query_string = Some(executed.clone());
            }

            Ok(frames)
        }
        .instrument(span)
        .await
    }

    /// Transport failures on exemplar queries degrade to a logged warning
    /// and an empty result so dashboards mixing regular and exemplar
    /// queries still render.
    fn lenient_failure(
        &self,
        query: &Query,
        error: DatasourceError,
    ) -> Result<Vec<Frame>, DatasourceError> {
        if query.kind == QueryKind::Exemplar {
            warn!(query = %query.expr, error = %error, "exemplar query failed");
            return Ok(Vec::new());
        }
        Err(error)
    }

    /// Forward a read-only discovery call through the cached raw HTTP
    /// client. Only allow-listed GET paths pass validation.
    pub async fn call_resource(
        &self,
        path: &str,
        method: &str,
        headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, DatasourceError> {
        resource::validate(path, method)?;

        let client = self.cache.http_client(headers)?;
        let url = format!(
            "{}/{}",
            self.settings.url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        let response = client
            .get(url)
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

/// Turn a non-success upstream response into a transport error, preferring
/// the API's own error envelope over the bare status code.
fn upstream_error(response: &HttpResponse) -> DatasourceError {
    if let Ok(envelope) = serde_json::from_str::<Envelope>(&response.body) {
        if envelope.status == "error" {
            let kind = envelope.error_type.unwrap_or_else(|| "error".to_string());
            let msg = envelope.error.unwrap_or_else(|| "unknown error".to_string());
            return DatasourceError::Transport(format!("{kind}: {msg}"));
        }
    }
    DatasourceError::Transport(format!(
        "unexpected response status {}",
        response.status
    ))
}
