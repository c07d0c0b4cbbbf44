//! Self-describing value markers.
//!
//! Serialized session state travels through both tiers as JSON.  Two shapes
//! need help surviving the round trip: time instants (which would otherwise
//! collapse into bare strings) and ordered-key mappings (JSON objects do not
//! guarantee key order).  Both are wrapped in `$type`-tagged envelopes.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

const TYPE_KEY: &str = "$type";
const INSTANT_TAG: &str = "instant";
const OMAP_TAG: &str = "omap";

/// Wrap a time instant in its marker envelope.
pub fn encode_instant(at: DateTime<Utc>) -> Value {
    json!({ TYPE_KEY: INSTANT_TAG, "value": at.to_rfc3339() })
}

/// Read an instant back out of its envelope.
pub fn decode_instant(value: &Value) -> Option<DateTime<Utc>> {
    let obj = value.as_object()?;
    if obj.get(TYPE_KEY)?.as_str()? != INSTANT_TAG {
        return None;
    }
    let raw = obj.get("value")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Wrap an ordered-key mapping: entries are a list of `[key, value]` pairs
/// so insertion order survives serialization.
pub fn encode_ordered_map<I>(entries: I) -> Value
where
    I: IntoIterator<Item = (String, Value)>,
{
    let pairs: Vec<Value> = entries
        .into_iter()
        .map(|(k, v)| json!([k, v]))
        .collect();
    json!({ TYPE_KEY: OMAP_TAG, "entries": pairs })
}

/// Read an ordered mapping back out of its envelope, order preserved.
pub fn decode_ordered_map(value: &Value) -> Option<Vec<(String, Value)>> {
    let obj = value.as_object()?;
    if obj.get(TYPE_KEY)?.as_str()? != OMAP_TAG {
        return None;
    }
    let entries = obj.get("entries")?.as_array()?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let pair = entry.as_array()?;
        let key = pair.first()?.as_str()?.to_owned();
        let val = pair.get(1)?.clone();
        out.push((key, val));
    }
    Some(out)
}

/// Whether a value is one of the codec's marker envelopes.
pub fn is_marker(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|o| o.get(TYPE_KEY))
        .and_then(Value::as_str)
        .map(|t| t == INSTANT_TAG || t == OMAP_TAG)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_round_trips_with_sub_second_precision() {
        let now = Utc::now();
        let encoded = encode_instant(now);
        let text = serde_json::to_string(&encoded).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(decode_instant(&back), Some(now));
    }

    #[test]
    fn ordered_map_preserves_insertion_order() {
        let entries = vec![
            ("zulu".to_owned(), json!(1)),
            ("alpha".to_owned(), json!(2)),
            ("mike".to_owned(), json!(3)),
        ];
        let encoded = encode_ordered_map(entries.clone());
        let text = serde_json::to_string(&encoded).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        let decoded = decode_ordered_map(&back).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn markers_are_recognizable() {
        assert!(is_marker(&encode_instant(Utc::now())));
        assert!(is_marker(&encode_ordered_map(Vec::new())));
        assert!(!is_marker(&json!({"value": 1})));
        assert!(!is_marker(&json!("plain")));
    }

    #[test]
    fn decode_rejects_wrong_shapes() {
        assert!(decode_instant(&json!({"$type": "omap", "entries": []})).is_none());
        assert!(decode_ordered_map(&json!({"$type": "instant", "value": "x"})).is_none());
        assert!(decode_instant(&json!(42)).is_none());
    }
}
