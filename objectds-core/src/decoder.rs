//! Frame decoding.
//!
//! Turns one classified [`ProxiedResult`] into canonical [`Frame`]s. Raw
//! columnar fields pick a value decoder from their type tag:
//!
//! - `time.Time` / `*time.Time`: epoch milliseconds, split into whole seconds
//!   and a nanosecond remainder before building the instant
//! - `string` / `*string`: strings
//! - anything else: `f64`
//!
//! A leading `*` on the tag, or `nullable: true`, allows `null` values.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::QueryError;
use crate::model::{Field, FieldValues, Frame};
use crate::time_range::TimeRange;
use crate::wire::{FrameBlob, ProxiedResult, RawField, RawFrame, Scalar};

/// Type tag of temporal fields
pub const TIME_KIND: &str = "time.Time";

/// Type tag of string fields
pub const STRING_KIND: &str = "string";

/// Name of the frame produced for results without a payload
pub const SYNTHETIC_FRAME_NAME: &str = "synthetic";

/// Placeholder values of the synthetic frame
pub const SYNTHETIC_VALUES: [f64; 2] = [10.0, 20.0];

/// Value decoder chosen from a field's type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Time,
    String,
    Float64,
}

impl FrameKind {
    /// Resolve a type tag, returning the kind and whether the tag is nullable
    pub fn from_tag(tag: &str) -> (Self, bool) {
        let (base, nullable) = match tag.strip_prefix('*') {
            Some(base) => (base, true),
            None => (tag, false),
        };
        let kind = match base {
            TIME_KIND => Self::Time,
            STRING_KIND => Self::String,
            _ => Self::Float64,
        };
        (kind, nullable)
    }
}

/// Decode one result into frames. Frames come back without a `ref_id`.
pub fn decode(result: ProxiedResult, time_range: &TimeRange) -> Result<Vec<Frame>, QueryError> {
    match result {
        ProxiedResult::SerializedBlob(blobs) => {
            debug!(blobs = blobs.len(), "Decoding serialized frames");
            blobs.iter().map(decode_blob).collect()
        }
        ProxiedResult::RawColumnar(raw) => {
            debug!(name = %raw.name, fields = raw.fields.len(), "Decoding raw columnar frame");
            decode_raw_frame(&raw).map(|frame| vec![frame])
        }
        ProxiedResult::Empty => {
            debug!("Result has no payload, emitting synthetic frame");
            Ok(vec![synthetic_frame(time_range)])
        }
    }
}

/// Decode one pre-serialized frame
pub fn decode_blob(blob: &FrameBlob) -> Result<Frame, QueryError> {
    match blob {
        FrameBlob::Encoded(encoded) => {
            let bytes = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| QueryError::result(format!("frame blob is not base64: {}", e)))?;
            Frame::from_blob(&bytes)
        }
        FrameBlob::Inline(value) => {
            let frame: Frame = serde_json::from_value(value.clone())
                .map_err(|e| QueryError::result(format!("invalid inline frame: {}", e)))?;
            frame.validate()?;
            Ok(frame)
        }
    }
}

/// Decode a raw columnar frame, field by field in the order presented
pub fn decode_raw_frame(raw: &RawFrame) -> Result<Frame, QueryError> {
    let fields = raw.fields.iter().map(decode_field).collect::<Result<Vec<_>, _>>()?;
    let frame = Frame::new(raw.name.clone(), fields);
    frame.validate()?;
    Ok(frame)
}

/// Decode one raw field
pub fn decode_field(raw: &RawField) -> Result<Field, QueryError> {
    let tag = raw.type_info.frame.as_str();
    let (kind, tag_nullable) = FrameKind::from_tag(tag);
    let nullable = tag_nullable || raw.type_info.nullable;
    trace!(field = %raw.name, tag, ?kind, nullable, values = raw.values.len(), "Decoding field");

    let column = Column { field: &raw.name, tag, nullable };
    let values = match kind {
        FrameKind::Time => FieldValues::Time(column.decode(&raw.values, decode_time)?),
        FrameKind::String => FieldValues::String(column.decode(&raw.values, decode_string)?),
        FrameKind::Float64 => FieldValues::Float64(column.decode(&raw.values, decode_float)?),
    };

    Ok(Field::new(raw.name.clone(), values).with_labels(raw.labels()).nullable(nullable))
}

/// Build an instant from epoch milliseconds.
///
/// Seconds and the millisecond remainder are carried separately so large
/// values keep full precision.
pub fn millis_to_instant(millis: i64) -> Option<DateTime<Utc>> {
    let secs = millis.div_euclid(1000);
    let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
}

/// The fixed frame returned for results that carry no payload
pub fn synthetic_frame(time_range: &TimeRange) -> Frame {
    Frame::new(
        SYNTHETIC_FRAME_NAME,
        vec![
            Field::new("time", FieldValues::Time(vec![Some(time_range.from), Some(time_range.to)])),
            Field::new(
                "values",
                FieldValues::Float64(SYNTHETIC_VALUES.iter().copied().map(Some).collect()),
            ),
        ],
    )
}

/// Decoding context shared by every value of one field
struct Column<'a> {
    field: &'a str,
    tag: &'a str,
    nullable: bool,
}

impl Column<'_> {
    fn decode<T>(
        &self,
        values: &[Value],
        decode_one: fn(&Scalar) -> Option<T>,
    ) -> Result<Vec<Option<T>>, QueryError> {
        values
            .iter()
            .map(|value| {
                let reject = || QueryError::unsupported(self.field, self.tag, value.to_string());
                match Scalar::try_from(value).map_err(|_| reject())? {
                    Scalar::Null if self.nullable => Ok(None),
                    scalar => decode_one(&scalar).map(Some).ok_or_else(reject),
                }
            })
            .collect()
    }
}

fn decode_time(scalar: &Scalar) -> Option<DateTime<Utc>> {
    let Scalar::Number(n) = scalar else {
        return None;
    };
    let millis = match n.as_i64() {
        Some(millis) => millis,
        None => {
            let f = n.as_f64()?;
            if !f.is_finite() || f < i64::MIN as f64 || f > i64::MAX as f64 {
                return None;
            }
            f as i64
        }
    };
    millis_to_instant(millis)
}

fn decode_float(scalar: &Scalar) -> Option<f64> {
    match scalar {
        Scalar::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn decode_string(scalar: &Scalar) -> Option<String> {
    match scalar {
        Scalar::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw_field(name: &str, tag: &str, values: Value) -> RawField {
        serde_json::from_value(json!({
            "name": name,
            "typeinfo": { "frame": tag },
            "values": values,
        }))
        .unwrap()
    }

    fn range() -> TimeRange {
        TimeRange::new(Utc.timestamp_opt(100, 0).unwrap(), Utc.timestamp_opt(200, 0).unwrap())
    }

    #[test]
    fn test_time_field_splits_seconds_and_millis() {
        let field = decode_field(&raw_field("time", "time.Time", json!([1500]))).unwrap();
        let expected = DateTime::<Utc>::UNIX_EPOCH
            + chrono::Duration::seconds(1)
            + chrono::Duration::nanoseconds(500_000_000);
        assert_eq!(field.values, FieldValues::Time(vec![Some(expected)]));
    }

    #[test]
    fn test_time_field_keeps_millisecond_precision_for_large_values() {
        let field = decode_field(&raw_field("time", "time.Time", json!([1_700_000_000_123i64])))
            .unwrap();
        let expected = Utc.timestamp_opt(1_700_000_000, 123_000_000).unwrap();
        assert_eq!(field.values, FieldValues::Time(vec![Some(expected)]));
    }

    #[test]
    fn test_negative_millis_are_exact() {
        let instant = millis_to_instant(-1500).unwrap();
        assert_eq!(instant.timestamp_millis(), -1500);
    }

    #[test]
    fn test_float_field_is_unchanged() {
        let field = decode_field(&raw_field("value", "float64", json!([3.14]))).unwrap();
        assert_eq!(field.values, FieldValues::Float64(vec![Some(3.14)]));
    }

    #[test]
    fn test_unknown_tag_defaults_to_float() {
        let field = decode_field(&raw_field("value", "", json!([1, 2.5]))).unwrap();
        assert_eq!(field.values, FieldValues::Float64(vec![Some(1.0), Some(2.5)]));
    }

    #[test]
    fn test_string_field() {
        let field = decode_field(&raw_field("host", "string", json!(["a", "b"]))).unwrap();
        assert_eq!(
            field.values,
            FieldValues::String(vec![Some("a".to_string()), Some("b".to_string())])
        );
    }

    #[test]
    fn test_non_numeric_time_is_rejected() {
        let err = decode_field(&raw_field("time", "time.Time", json!([1000, "soon"]))).unwrap_err();
        assert_eq!(err, QueryError::unsupported("time", "time.Time", "\"soon\""));
    }

    #[test]
    fn test_bool_value_is_rejected() {
        let err = decode_field(&raw_field("value", "float64", json!([true]))).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedFieldType { .. }));
    }

    #[test]
    fn test_nulls_need_a_nullable_field() {
        let err = decode_field(&raw_field("value", "float64", json!([1, null]))).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedFieldType { .. }));

        let field = decode_field(&raw_field("value", "*float64", json!([1, null]))).unwrap();
        assert!(field.nullable);
        assert_eq!(field.values, FieldValues::Float64(vec![Some(1.0), None]));

        let mut raw = raw_field("time", "time.Time", json!([null]));
        raw.type_info.nullable = true;
        let field = decode_field(&raw).unwrap();
        assert_eq!(field.values, FieldValues::Time(vec![None]));
    }

    #[test]
    fn test_raw_frame_keeps_field_order_and_labels() {
        let raw = RawFrame {
            name: "cpu".to_string(),
            fields: vec![
                raw_field("time", "time.Time", json!([1000, 2000])),
                serde_json::from_value(json!({
                    "name": "usage",
                    "config": { "labels": { "host": "a" } },
                    "typeinfo": { "frame": "float64" },
                    "values": [0.5, 0.75],
                }))
                .unwrap(),
            ],
        };
        let frame = decode_raw_frame(&raw).unwrap();
        assert_eq!(frame.name, "cpu");
        assert_eq!(frame.fields[0].name, "time");
        assert_eq!(frame.fields[1].name, "usage");
        assert_eq!(frame.fields[1].labels.get("host").map(String::as_str), Some("a"));
        assert_eq!(frame.row_count(), 2);
    }

    #[test]
    fn test_raw_frame_rejects_misaligned_columns() {
        let raw = RawFrame {
            name: "cpu".to_string(),
            fields: vec![
                raw_field("time", "time.Time", json!([1000, 2000])),
                raw_field("usage", "float64", json!([0.5])),
            ],
        };
        assert!(matches!(decode_raw_frame(&raw), Err(QueryError::MalformedResult(_))));
    }

    #[test]
    fn test_blob_decoding() {
        let frame = Frame::new("cpu", vec![Field::new("v", FieldValues::Float64(vec![Some(1.0)]))]);
        let blob = frame.to_blob().unwrap();

        let encoded = FrameBlob::Encoded(STANDARD.encode(&blob));
        assert_eq!(decode_blob(&encoded).unwrap(), frame);

        let inline = FrameBlob::Inline(serde_json::from_slice(&blob).unwrap());
        assert_eq!(decode_blob(&inline).unwrap(), frame);

        let garbage = FrameBlob::Encoded("!!!".to_string());
        assert!(matches!(decode_blob(&garbage), Err(QueryError::MalformedResult(_))));
    }

    #[test]
    fn test_empty_result_yields_synthetic_frame() {
        let frames = decode(ProxiedResult::Empty, &range()).unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.name, SYNTHETIC_FRAME_NAME);
        assert_eq!(
            frame.fields[0].values,
            FieldValues::Time(vec![Some(range().from), Some(range().to)])
        );
        assert_eq!(frame.fields[1].values, FieldValues::Float64(vec![Some(10.0), Some(20.0)]));
    }

    #[test]
    fn test_one_bad_blob_fails_the_whole_result() {
        let good = STANDARD.encode(Frame::new("a", vec![]).to_blob().unwrap());
        let result = ProxiedResult::SerializedBlob(vec![
            FrameBlob::Encoded(good),
            FrameBlob::Encoded("e30".to_string()),
        ]);
        assert!(decode(result, &range()).is_err());
    }
}
