use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeZone, Utc};

use crate::error::DatasourceError;
use crate::legend::format_legend;
use crate::models::frame::{canonical_labels, Field, Frame};
use crate::models::query::{Query, QueryKind};
use crate::models::response::{
    Envelope, ExemplarSeries, InstantSample, RangeSeries, ResultData, SamplePair,
};

/// Convert one raw response body into output frames for the given query.
///
/// All timestamps are normalized to UTC. NaN samples are encoded as null,
/// never as the NaN bit pattern. Series naming follows the legend template
/// with the canonical label-set string (or, for scalars, the literal value)
/// as fallback.
pub fn transcode(
    body: &str,
    query: &Query,
    exemplar_limit: usize,
) -> Result<Vec<Frame>, DatasourceError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| DatasourceError::Transcode(format!("malformed response body: {e}")))?;

    if envelope.status != "success" {
        let kind = envelope.error_type.unwrap_or_else(|| "error".to_string());
        let msg = envelope.error.unwrap_or_else(|| "unknown error".to_string());
        return Err(DatasourceError::Transport(format!("{kind}: {msg}")));
    }

    if query.kind == QueryKind::Exemplar {
        let series: Vec<ExemplarSeries> = serde_json::from_value(envelope.data)
            .map_err(|e| DatasourceError::Transcode(format!("malformed exemplar result: {e}")))?;
        return Ok(vec![exemplar_frame(series, exemplar_limit)]);
    }

    let data: ResultData = serde_json::from_value(envelope.data)
        .map_err(|e| DatasourceError::Transcode(format!("unrecognized result shape: {e}")))?;

    Ok(match data {
        ResultData::Scalar(pair) => vec![scalar_frame(&pair, query)],
        ResultData::Vector(samples) => vector_frames(&samples, query),
        ResultData::Matrix(series) => matrix_frames(&series, query),
    })
}

fn scalar_frame(pair: &SamplePair, query: &Query) -> Frame {
    let name = if query.legend_format.trim().is_empty() {
        format_value(pair.1 .0)
    } else {
        format_legend(&query.legend_format, &BTreeMap::new())
    };

    Frame::with_fields(
        name,
        vec![
            Field::time("Time", vec![to_utc(pair.0)]),
            Field::number("Value", BTreeMap::new(), vec![encode_value(pair.1 .0)]),
        ],
    )
}

fn vector_frames(samples: &[InstantSample], query: &Query) -> Vec<Frame> {
    samples
        .iter()
        .map(|sample| {
            Frame::with_fields(
                format_legend(&query.legend_format, &sample.metric),
                vec![
                    Field::time("Time", vec![to_utc(sample.value.0)]),
                    Field::number(
                        "Value",
                        sample.metric.clone(),
                        vec![encode_value(sample.value.1 .0)],
                    ),
                ],
            )
        })
        .collect()
}

fn matrix_frames(series: &[RangeSeries], query: &Query) -> Vec<Frame> {
    series
        .iter()
        .map(|s| {
            // Only observed samples are emitted; gaps are not densified.
            let mut times = Vec::with_capacity(s.values.len());
            let mut values = Vec::with_capacity(s.values.len());
            for pair in &s.values {
                times.push(to_utc(pair.0));
                values.push(encode_value(pair.1 .0));
            }

            Frame::with_fields(
                format_legend(&query.legend_format, &s.metric),
                vec![
                    Field::time("Time", times),
                    Field::number("Value", s.metric.clone(), values),
                ],
            )
        })
        .collect()
}

#[derive(Debug, Clone)]
struct ExemplarEvent {
    time: DateTime<Utc>,
    value: f64,
    labels: BTreeMap<String, String>,
}

/// Build the single combined exemplar frame: Time and Value columns plus one
/// text column per label key seen across all exemplars.
fn exemplar_frame(series: Vec<ExemplarSeries>, limit: usize) -> Frame {
    let mut events: Vec<ExemplarEvent> = Vec::new();
    for s in series {
        let mut series_events: Vec<ExemplarEvent> = s
            .exemplars
            .iter()
            .map(|e| {
                let mut labels = s.series_labels.clone();
                labels.extend(e.labels.clone());
                ExemplarEvent {
                    time: to_utc(e.timestamp),
                    value: e.value.0,
                    labels,
                }
            })
            .collect();
        series_events = sample_exemplars(series_events, limit);
        events.extend(series_events);
    }
    events.sort_by(|a, b| a.time.cmp(&b.time));

    let label_keys: BTreeSet<&str> = events
        .iter()
        .flat_map(|e| e.labels.keys().map(String::as_str))
        .collect();

    let mut fields = vec![
        Field::time("Time", events.iter().map(|e| e.time).collect()),
        Field::number(
            "Value",
            BTreeMap::new(),
            events.iter().map(|e| encode_value(e.value)).collect(),
        ),
    ];
    for key in label_keys {
        let column = events
            .iter()
            .map(|e| e.labels.get(key).cloned().unwrap_or_default())
            .collect();
        fields.push(Field::text(key, column));
    }

    Frame::with_fields("exemplar", fields)
}

/// Reduce a series' exemplars to at most `limit` points. The maximum-value
/// exemplar and the most recent one are always retained; the remaining slots
/// are filled with evenly spaced picks over the time-ordered candidates.
fn sample_exemplars(mut events: Vec<ExemplarEvent>, limit: usize) -> Vec<ExemplarEvent> {
    if limit == 0 {
        return Vec::new();
    }
    events.sort_by(|a, b| a.time.cmp(&b.time));
    if events.len() <= limit {
        return events;
    }

    let max_idx = events
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.value.partial_cmp(&b.value).unwrap_or(Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let last_idx = events.len() - 1;

    if limit == 1 {
        return vec![events[max_idx].clone()];
    }

    let mut keep = BTreeSet::new();
    keep.insert(max_idx);
    keep.insert(last_idx);

    if limit > keep.len() {
        let extra = limit - keep.len();
        for i in 0..extra {
            let idx = i * last_idx / extra.max(1);
            keep.insert(idx);
            if keep.len() == limit {
                break;
            }
        }
        let mut idx = 0;
        while keep.len() < limit && idx < events.len() {
            keep.insert(idx);
            idx += 1;
        }
    }
    while keep.len() > limit {
        // Drop the earliest filler, never the extremes.
        let candidate = keep
            .iter()
            .copied()
            .find(|&i| i != max_idx && i != last_idx);
        match candidate {
            Some(i) => keep.remove(&i),
            None => break,
        };
    }

    let mut sampled = Vec::with_capacity(keep.len());
    for idx in keep {
        sampled.push(events[idx].clone());
    }
    sampled
}

/// Fractional Unix seconds, normalized to UTC with millisecond precision.
fn to_utc(secs: f64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt((secs * 1000.0).round() as i64)
        .single()
        .unwrap_or_default()
}

fn encode_value(v: f64) -> Option<f64> {
    if v.is_nan() { None } else { Some(v) }
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::frame::FieldValues;
    use std::time::Duration;

    fn query(kind: QueryKind, legend_format: &str) -> Query {
        Query {
            ref_id: "A".to_string(),
            expr: "up".to_string(),
            kind,
            start: Utc.timestamp_opt(0, 0).unwrap(),
            end: Utc.timestamp_opt(600, 0).unwrap(),
            step: Duration::from_secs(15),
            legend_format: legend_format.to_string(),
            utc_offset_sec: 0,
            from_alert: false,
        }
    }

    fn number_values(frame: &Frame) -> &[Option<f64>] {
        match &frame.fields[1].values {
            FieldValues::Number(v) => v,
            other => panic!("expected number field, got {other:?}"),
        }
    }

    fn time_values(frame: &Frame) -> &[DateTime<Utc>] {
        match &frame.fields[0].values {
            FieldValues::Time(v) => v,
            other => panic!("expected time field, got {other:?}"),
        }
    }

    #[test]
    fn scalar_without_template_is_named_by_value() {
        let body = r#"{"status":"success","data":{"resultType":"scalar","result":[123,"1"]}}"#;
        let frames = transcode(body, &query(QueryKind::Instant, ""), 100).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "1");
        assert_eq!(time_values(&frames[0]), &[Utc.timestamp_opt(123, 0).unwrap()]);
        assert_eq!(number_values(&frames[0]), &[Some(1.0)]);
        assert!(frames[0].is_aligned());
    }

    #[test]
    fn matrix_series_use_legend_template() {
        let body = r#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{
                    "metric": {"tag2": "tag2", "app": "Application"},
                    "values": [[1, "1"], [2, "2"]]
                }]
            }
        }"#;
        let frames = transcode(body, &query(QueryKind::Range, "legend {{app}}"), 100).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "legend Application");
        assert_eq!(
            canonical_labels(&frames[0].fields[1].labels),
            "app=Application, tag2=tag2"
        );
    }

    #[test]
    fn matrix_series_without_template_use_label_set_name() {
        let body = r#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{
                    "metric": {"tag2": "tag2", "app": "Application"},
                    "values": [[1, "1"]]
                }]
            }
        }"#;
        let frames = transcode(body, &query(QueryKind::Range, ""), 100).unwrap();
        assert_eq!(frames[0].name, "app=Application, tag2=tag2");
    }

    #[test]
    fn nan_samples_become_null() {
        let body = r#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{"metric": {}, "values": [[1, "1"], [2, "NaN"], [4, "3"]]}]
            }
        }"#;
        let frames = transcode(body, &query(QueryKind::Range, ""), 100).unwrap();

        // Gap at t=3 stays a gap; only observed samples are emitted.
        assert_eq!(number_values(&frames[0]), &[Some(1.0), None, Some(3.0)]);
        assert_eq!(
            time_values(&frames[0]),
            &[
                Utc.timestamp_opt(1, 0).unwrap(),
                Utc.timestamp_opt(2, 0).unwrap(),
                Utc.timestamp_opt(4, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn vector_produces_one_frame_per_series() {
        let body = r#"{
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [
                    {"metric": {"job": "a"}, "value": [1.5, "10"]},
                    {"metric": {"job": "b"}, "value": [1.5, "20"]}
                ]
            }
        }"#;
        let frames = transcode(body, &query(QueryKind::Instant, "{{job}}"), 100).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].name, "a");
        assert_eq!(frames[1].name, "b");
        assert_eq!(number_values(&frames[0]), &[Some(10.0)]);
        assert_eq!(time_values(&frames[0]), &[to_utc(1.5)]);
    }

    #[test]
    fn fractional_timestamps_are_normalized_to_utc_millis() {
        assert_eq!(
            to_utc(1600096945.479),
            Utc.timestamp_millis_opt(1600096945479).single().unwrap()
        );
    }

    #[test]
    fn exemplars_combine_into_a_single_frame() {
        let body = r#"{
            "status": "success",
            "data": [
                {
                    "seriesLabels": {"__name__": "duration"},
                    "exemplars": [
                        {"labels": {"traceID": "t1"}, "value": "0.5", "timestamp": 1},
                        {"labels": {"traceID": "t2"}, "value": "0.9", "timestamp": 2}
                    ]
                }
            ]
        }"#;
        let frames = transcode(body, &query(QueryKind::Exemplar, ""), 100).unwrap();

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.name, "exemplar");
        assert!(frame.is_aligned());
        assert_eq!(frame.fields.len(), 4); // Time, Value, __name__, traceID
        assert_eq!(frame.fields[2].name, "__name__");
        assert_eq!(frame.fields[3].name, "traceID");
        match &frame.fields[3].values {
            FieldValues::Text(v) => assert_eq!(v, &["t1", "t2"]),
            other => panic!("expected text field, got {other:?}"),
        }
    }

    #[test]
    fn exemplar_sampling_keeps_extreme_and_most_recent() {
        let events: Vec<ExemplarEvent> = [(1, 5.0), (2, 90.0), (3, 2.0), (4, 1.0)]
            .iter()
            .map(|&(ts, value)| ExemplarEvent {
                time: Utc.timestamp_opt(ts, 0).unwrap(),
                value,
                labels: BTreeMap::new(),
            })
            .collect();

        let sampled = sample_exemplars(events, 2);

        assert_eq!(sampled.len(), 2);
        assert_eq!(sampled[0].value, 90.0);
        assert_eq!(sampled[1].time, Utc.timestamp_opt(4, 0).unwrap());
    }

    #[test]
    fn exemplar_sampling_is_a_noop_under_the_limit() {
        let events: Vec<ExemplarEvent> = (0..3)
            .map(|i| ExemplarEvent {
                time: Utc.timestamp_opt(i, 0).unwrap(),
                value: i as f64,
                labels: BTreeMap::new(),
            })
            .collect();
        assert_eq!(sample_exemplars(events, 100).len(), 3);
    }

    #[test]
    fn error_envelope_surfaces_as_transport_error() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"bad query"}"#;
        let err = transcode(body, &query(QueryKind::Range, ""), 100).unwrap_err();
        match err {
            DatasourceError::Transport(msg) => assert_eq!(msg, "bad_data: bad query"),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_result_shape_fails_transcode() {
        let body = r#"{"status":"success","data":{"resultType":"streams","result":[]}}"#;
        let err = transcode(body, &query(QueryKind::Range, ""), 100).unwrap_err();
        assert!(matches!(err, DatasourceError::Transcode(_)));

        let err = transcode("not json", &query(QueryKind::Range, ""), 100).unwrap_err();
        assert!(matches!(err, DatasourceError::Transcode(_)));
    }
}
