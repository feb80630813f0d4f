use crate::error::DatasourceError;

/// Read-only discovery paths that may be forwarded to the upstream API.
/// `api/v1/label/` covers the `api/v1/label/<name>/values` form.
const ALLOWED_PATH_PREFIXES: &[&str] = &[
    "api/v1/labels",
    "api/v1/label/",
    "api/v1/series",
    "api/v1/metadata",
];

/// A very basic is-this-request-valid check, applied before any dispatch.
pub fn validate(path: &str, method: &str) -> Result<(), DatasourceError> {
    if method != "GET" {
        return Err(DatasourceError::InvalidResource(format!(
            "invalid resource method: {method}"
        )));
    }

    let path = path.trim_start_matches('/');
    if !ALLOWED_PATH_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
    {
        return Err(DatasourceError::InvalidResource(format!(
            "invalid resource path: {path}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_discovery_paths() {
        for path in [
            "api/v1/labels",
            "api/v1/labels?start=1",
            "api/v1/label/job/values",
            "api/v1/series?match[]=up",
            "api/v1/metadata",
            "/api/v1/labels",
        ] {
            assert!(validate(path, "GET").is_ok(), "{path} should be allowed");
        }
    }

    #[test]
    fn rejects_everything_else() {
        for path in [
            "api/v1/query",
            "api/v1/admin/tsdb/delete_series",
            "api/v2/labels",
            "",
        ] {
            assert!(validate(path, "GET").is_err(), "{path} should be rejected");
        }
    }

    #[test]
    fn rejects_non_get_methods() {
        for method in ["POST", "PUT", "DELETE"] {
            assert!(validate("api/v1/labels", method).is_err());
        }
    }
}
