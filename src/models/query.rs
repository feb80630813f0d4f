use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::config::DatasourceSettings;
use crate::error::DatasourceError;

/// Upper bound on the number of points a single range query may request.
/// The step is widened until the range fits under this resolution.
const SAFE_RESOLUTION: f64 = 11000.0;

/// A batch of queries plus the passthrough headers carrying auth data.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryDataRequest {
    pub queries: Vec<DataQuery>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// One raw query as handed over by the routing layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuery {
    pub ref_id: String,
    pub time_range: TimeRange,
    /// Interval suggested by the caller, in milliseconds.
    #[serde(default)]
    pub interval_ms: i64,
    #[serde(flatten)]
    pub model: QueryModel,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Per-query configuration as sent on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryModel {
    #[serde(default)]
    pub expr: String,
    #[serde(default)]
    pub legend_format: String,
    /// Min step requested by the query itself, e.g. "30s". May be empty.
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub interval_factor: Option<f64>,
    #[serde(default)]
    pub range: bool,
    #[serde(default)]
    pub instant: bool,
    #[serde(default)]
    pub exemplar: bool,
    #[serde(default)]
    pub utc_offset_sec: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Instant,
    Range,
    Exemplar,
}

/// Validated, typed query descriptor. Kind determines which time fields are
/// meaningful: Instant uses `end` only, Range uses `start`/`end`/`step`,
/// Exemplar uses `start`/`end`.
#[derive(Debug, Clone)]
pub struct Query {
    pub ref_id: String,
    pub expr: String,
    pub kind: QueryKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
    pub legend_format: String,
    pub utc_offset_sec: i64,
    pub from_alert: bool,
}

impl Query {
    pub fn parse(
        dq: &DataQuery,
        settings: &DatasourceSettings,
        from_alert: bool,
    ) -> Result<Query, DatasourceError> {
        let model = &dq.model;
        if model.expr.trim().is_empty() {
            return Err(DatasourceError::QueryBuild(format!(
                "query {} has no expression",
                dq.ref_id
            )));
        }

        // A descriptor carries exactly one kind. Exemplar and instant flags
        // win over the range flag; a query with no kind at all is rejected.
        let kind = if model.exemplar {
            QueryKind::Exemplar
        } else if model.instant {
            QueryKind::Instant
        } else if model.range {
            QueryKind::Range
        } else {
            return Err(DatasourceError::UnsupportedQueryKind(model.expr.clone()));
        };

        let step = calculate_step(dq, settings, from_alert)?;

        let start = align_time(dq.time_range.from, step, model.utc_offset_sec);
        let end = align_time(dq.time_range.to, step, model.utc_offset_sec);

        let range = dq.time_range.to - dq.time_range.from;
        let expr = interpolate_variables(&model.expr, step, range, settings.min_step);

        Ok(Query {
            ref_id: dq.ref_id.clone(),
            expr,
            kind,
            start,
            end,
            step,
            legend_format: model.legend_format.clone(),
            utc_offset_sec: model.utc_offset_sec,
            from_alert,
        })
    }
}

/// Resolve the effective step for a query.
///
/// Precedence: the query's own `interval`, the caller-suggested `intervalMs`,
/// then the datasource min step. Alert queries with no interval of their own
/// always use the datasource min step. The result is clamped below by the
/// datasource min step, multiplied by `intervalFactor`, and widened so the
/// range never exceeds ~11000 points.
fn calculate_step(
    dq: &DataQuery,
    settings: &DatasourceSettings,
    from_alert: bool,
) -> Result<Duration, DatasourceError> {
    let model = &dq.model;

    let query_interval = if model.interval.is_empty() || model.interval.starts_with('$') {
        None
    } else {
        Some(parse_duration(&model.interval).map_err(|e| {
            DatasourceError::QueryBuild(format!("query {}: invalid interval: {e}", dq.ref_id))
        })?)
    };

    let base = match query_interval {
        Some(interval) => interval,
        None if from_alert => settings.min_step,
        None if dq.interval_ms > 0 => Duration::from_millis(dq.interval_ms as u64),
        None => settings.min_step,
    };

    let factor = model.interval_factor.unwrap_or(1.0).max(1.0);
    let mut step = base.max(settings.min_step).mul_f64(factor);

    let range_secs = (dq.time_range.to - dq.time_range.from)
        .num_milliseconds()
        .max(0) as f64
        / 1000.0;
    let safe_step = Duration::from_secs_f64(range_secs / SAFE_RESOLUTION);
    if safe_step > step {
        step = safe_step;
    }

    Ok(step)
}

/// Floor a timestamp to the step grid, honoring the query's UTC offset so
/// that day-aligned steps land on local midnights.
fn align_time(t: DateTime<Utc>, step: Duration, utc_offset_sec: i64) -> DateTime<Utc> {
    let step_ms = step.as_millis() as i64;
    if step_ms == 0 {
        return t;
    }
    let offset_ms = utc_offset_sec * 1000;
    let aligned = (t.timestamp_millis() + offset_ms).div_euclid(step_ms) * step_ms - offset_ms;
    Utc.timestamp_millis_opt(aligned).single().unwrap_or(t)
}

/// Expand the grafana-style template variables an expression may carry.
fn interpolate_variables(
    expr: &str,
    step: Duration,
    range: chrono::Duration,
    scrape_interval: Duration,
) -> String {
    let range_ms = range.num_milliseconds().max(0);
    let range_s = ((range_ms as f64) / 1000.0).round() as i64;
    let rate_interval = calculate_rate_interval(step, scrape_interval);

    expr.replace("$__interval_ms", &step.as_millis().to_string())
        .replace("$__interval", &format_duration(step))
        .replace("$__range_ms", &range_ms.to_string())
        .replace("$__range_s", &range_s.to_string())
        .replace("$__range", &format_duration(Duration::from_secs(range_s.max(0) as u64)))
        .replace("$__rate_interval", &format_duration(rate_interval))
}

/// Rate interval: at least four scrape intervals, and always one scrape
/// interval longer than the step so windows never fall between scrapes.
fn calculate_rate_interval(step: Duration, scrape_interval: Duration) -> Duration {
    (scrape_interval * 4).max(step + scrape_interval)
}

/// Parse a duration string like "5m", "1h30m", "30s", "100ms".
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let mut total_secs = 0.0;
    let mut num_str = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            num_str.push(c);
            continue;
        }
        let num: f64 = num_str
            .parse()
            .map_err(|_| format!("invalid duration number: {num_str}"))?;
        num_str.clear();
        total_secs += match c {
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                num / 1000.0
            }
            's' => num,
            'm' => num * 60.0,
            'h' => num * 3600.0,
            'd' => num * 86400.0,
            'w' => num * 604800.0,
            'y' => num * 31536000.0,
            _ => return Err(format!("unknown duration unit: {c}")),
        };
    }

    if !num_str.is_empty() {
        return Err(format!("missing unit in duration: {input}"));
    }
    if total_secs == 0.0 {
        return Err("empty duration".to_string());
    }
    Ok(Duration::from_secs_f64(total_secs))
}

/// Render a duration as a compact unit string, e.g. "15s", "1m30s", "2h".
pub fn format_duration(d: Duration) -> String {
    let nanos = d.subsec_nanos();
    let mut secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }

    let hours = secs / 3600;
    secs %= 3600;
    let mins = secs / 60;
    secs %= 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if mins > 0 {
        out.push_str(&format!("{mins}m"));
    }
    if secs > 0 || nanos > 0 || out.is_empty() {
        if nanos > 0 {
            out.push_str(&format!("{}s", secs as f64 + f64::from(nanos) / 1e9));
        } else {
            out.push_str(&format!("{secs}s"));
        }
    }
    out
}
