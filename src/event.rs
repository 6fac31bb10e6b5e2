//! Event records flowing through the collator.
//!
//! An [`Event`] is a JSON object addressed by dotted field paths: `proc.name`
//! reads the `name` key of the nested `proc` object. The collator only reads
//! events on the hot path; it writes fields solely when turning a retained
//! event into a summary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Marker set on synthesized summaries so they are never collated again.
pub const COLLATED_FIELD: &str = "@collated_event";
/// RFC 3339 wall-clock timestamp stamped on summaries.
pub const TIMESTAMP_FIELD: &str = "@timestamp";
/// Default field holding the event time as epoch nanoseconds.
pub const REALTIME_TIMESTAMP_FIELD: &str = "@realtime_timestamp";
/// Human-readable message body.
pub const MESSAGE_FIELD: &str = "message";
/// Default field classifying where an event came from.
pub const DEFAULT_SOURCE_LABEL_FIELD: &str = "journal.systemd_unit";
/// Label used when an event has no usable source label.
pub const UNKNOWN_SOURCE_LABEL: &str = "-";

/// A structured event: a JSON object with dotted-path field access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    /// Create an empty event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value. Returns `None` unless the value is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Unwrap into the underlying JSON object.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Borrow the top-level fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Look up a dotted field path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Look up a dotted field path holding a string.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Whether a dotted field path exists.
    pub fn has_field(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set a dotted field path, creating intermediate objects.
    ///
    /// Non-object values sitting on the path are replaced by objects.
    pub fn put(&mut self, path: &str, value: impl Into<Value>) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(leaf) = segments.pop() else {
            return;
        };
        let mut current = &mut self.fields;
        for segment in segments {
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            current = match slot {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(leaf.to_string(), value.into());
    }

    /// Remove a dotted field path, returning the previous value.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let leaf = segments.pop()?;
        let mut current = &mut self.fields;
        for segment in segments {
            current = current.get_mut(segment)?.as_object_mut()?;
        }
        current.remove(leaf)
    }

    /// Whether this event is a collated summary.
    pub fn is_summary(&self) -> bool {
        self.fields.contains_key(COLLATED_FIELD)
    }

    /// Read an epoch-nanosecond timestamp from `path`.
    ///
    /// Only non-negative integers are accepted; strings, floats and missing
    /// fields yield `None`.
    pub fn timestamp_nanos(&self, path: &str) -> Option<u64> {
        self.get(path)?.as_u64()
    }

    /// Source label at `path`, or `"-"` when missing or not a string.
    pub fn source_label(&self, path: &str) -> &str {
        self.get_str(path).unwrap_or(UNKNOWN_SOURCE_LABEL)
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl TryFrom<Value> for Event {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Event {
        Event::from_value(json!({
            "type": "process",
            "proc": { "name": "test-1", "cmdline": "/sbin/launchd" },
            "journal": { "systemd_unit": "sshd.service" },
            "@realtime_timestamp": 1_500_000_000_000_000_000u64,
        }))
        .unwrap()
    }

    #[test]
    fn get_walks_nested_objects() {
        let event = sample();
        assert_eq!(event.get_str("proc.name"), Some("test-1"));
        assert_eq!(event.get_str("type"), Some("process"));
        assert!(event.get("proc.missing").is_none());
        assert!(event.get("type.inner").is_none());
    }

    #[test]
    fn put_creates_intermediate_objects() {
        let mut event = Event::new();
        event.put("a.b.c", 3);
        assert_eq!(event.get("a.b.c"), Some(&json!(3)));

        event.put("a.b", "flat");
        event.put("a.b.d", true);
        assert_eq!(event.get("a.b.d"), Some(&json!(true)));
        assert!(event.get("a.b.c").is_none());
    }

    #[test]
    fn remove_returns_previous_value() {
        let mut event = sample();
        assert_eq!(event.remove("proc.name"), Some(json!("test-1")));
        assert!(!event.has_field("proc.name"));
        assert!(event.remove("proc.name").is_none());
    }

    #[test]
    fn timestamp_requires_unsigned_integer() {
        let mut event = sample();
        assert_eq!(
            event.timestamp_nanos(REALTIME_TIMESTAMP_FIELD),
            Some(1_500_000_000_000_000_000)
        );
        event.put(REALTIME_TIMESTAMP_FIELD, "2017-07-14T02:40:00Z");
        assert_eq!(event.timestamp_nanos(REALTIME_TIMESTAMP_FIELD), None);
        event.put(REALTIME_TIMESTAMP_FIELD, -5);
        assert_eq!(event.timestamp_nanos(REALTIME_TIMESTAMP_FIELD), None);
    }

    #[test]
    fn source_label_falls_back_to_dash() {
        let mut event = sample();
        assert_eq!(event.source_label(DEFAULT_SOURCE_LABEL_FIELD), "sshd.service");
        event.put(DEFAULT_SOURCE_LABEL_FIELD, 12);
        assert_eq!(event.source_label(DEFAULT_SOURCE_LABEL_FIELD), UNKNOWN_SOURCE_LABEL);
        event.remove("journal");
        assert_eq!(event.source_label(DEFAULT_SOURCE_LABEL_FIELD), UNKNOWN_SOURCE_LABEL);
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(Event::from_value(json!([1, 2])).is_none());
        assert!(Event::try_from(json!("x")).is_err());
    }

    #[test]
    fn serializes_as_plain_object() {
        let event = sample();
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
        assert!(text.starts_with('{'));
    }
}
