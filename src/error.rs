use thiserror::Error;

/// Failure taxonomy for the datasource pipeline.
///
/// Only `Config`, `ClientConstruction` and `EmptyBatch` abort a whole call;
/// everything else is attached to the failing query's slot in the response.
#[derive(Debug, Error)]
pub enum DatasourceError {
    /// Malformed datasource settings (bad URL, bad JSON settings). Surfaced
    /// at setup time, not retried.
    #[error("invalid datasource configuration: {0}")]
    Config(String),

    /// Credential-scoped client construction failed. Never cached, so the
    /// next call with the same headers retries.
    #[error("failed to construct client: {0}")]
    ClientConstruction(String),

    /// Malformed query descriptor.
    #[error("invalid query: {0}")]
    QueryBuild(String),

    #[error("unsupported query kind for query: {0}")]
    UnsupportedQueryKind(String),

    /// Network failure or non-success status from the upstream API.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unrecognized result shape or malformed payload.
    #[error("failed to decode response: {0}")]
    Transcode(String),

    #[error("query request contains no queries")]
    EmptyBatch,

    #[error("invalid resource request: {0}")]
    InvalidResource(String),
}
