//! Payload types and the snapshot/diff builder.
//!
//! A [`Payload`] is one serialized telemetry record: an opaque, immutable,
//! newline-terminated byte sequence tagged with the simulation tick it was
//! built for. Payloads are owned exclusively by whichever structure currently
//! holds them (the buffer, or the sending thread) and are never mutated after
//! creation.
//!
//! [`StreamPayloadBuilder`] turns the named signal groups produced by the
//! simulation into one flat record per tick. With diffing enabled, repeated
//! records shrink to deltas against the previous tick:
//!
//! ```rust
//! use serde_json::json;
//! use telegraph::{PayloadKind, StreamPayloadBuilder};
//!
//! let mut builder = StreamPayloadBuilder::new("1.0", true);
//!
//! let first = builder.build(1, [("agents", json!({"alice": 3}))]);
//! assert_eq!(first.kind(), PayloadKind::Snapshot);
//!
//! let second = builder.build(2, [("agents", json!({"alice": 4}))]);
//! assert_eq!(second.kind(), PayloadKind::Diff);
//! ```

use serde_json::{Map, Value};
use tracing::debug;

use crate::Result;

/// Record envelope keys. Signal groups may not shadow these.
const ENVELOPE_FIELDS: [&str; 3] = ["schema_version", "tick", "payload_type"];

/// One serialized telemetry record, newline-terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
    tick: u64,
}

impl Payload {
    /// Wrap serialized record bytes, appending the trailing newline if absent.
    pub fn new(mut bytes: Vec<u8>, tick: u64) -> Self {
        if bytes.last() != Some(&b'\n') {
            bytes.push(b'\n');
        }
        Self { bytes, tick }
    }

    /// Serialized length in bytes, including the trailing newline.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The simulation tick this record was built for.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Whether a record carries a full state or a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Complete telemetry state for one tick.
    Snapshot,
    /// Only the fields changed/removed since the last built snapshot.
    Diff,
}

impl PayloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadKind::Snapshot => "snapshot",
            PayloadKind::Diff => "diff",
        }
    }
}

/// One built telemetry record, ready for serialization.
#[derive(Debug, Clone)]
pub struct TelemetryRecord {
    kind: PayloadKind,
    tick: u64,
    record: Map<String, Value>,
}

impl TelemetryRecord {
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The record as a JSON object, envelope fields included.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.record
    }

    /// Serialize to one newline-terminated NDJSON payload.
    pub fn to_payload(&self) -> Result<Payload> {
        let bytes = serde_json::to_vec(&self.record)?;
        Ok(Payload::new(bytes, self.tick))
    }
}

/// Builds one record per tick, replacing repeated full snapshots with diffs.
///
/// The builder tracks the previously built mapping as process-local state.
/// With diffing enabled, the first `build` emits a full snapshot and caches
/// it; every later call emits a diff against the cache and replaces it.
/// [`reset`](StreamPayloadBuilder::reset) clears the cache, forcing the next
/// build to emit a full snapshot — required after an external state import,
/// where a diff against stale state would be bogus.
#[derive(Debug)]
pub struct StreamPayloadBuilder {
    schema_version: String,
    diff_enabled: bool,
    previous: Option<Map<String, Value>>,
}

impl StreamPayloadBuilder {
    pub fn new(schema_version: impl Into<String>, diff_enabled: bool) -> Self {
        Self { schema_version: schema_version.into(), diff_enabled, previous: None }
    }

    /// Forget the cached snapshot so the next build emits a full one.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Normalize the named signal groups into one record for `tick`.
    ///
    /// Signal groups colliding with an envelope field are skipped.
    pub fn build<I, K>(&mut self, tick: u64, signals: I) -> TelemetryRecord
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut fields = Map::new();
        for (name, value) in signals {
            let name = name.into();
            if ENVELOPE_FIELDS.contains(&name.as_str()) {
                debug!(field = %name, "signal group shadows an envelope field, skipping");
                continue;
            }
            fields.insert(name, value);
        }

        if !self.diff_enabled {
            return self.snapshot(tick, fields);
        }

        match self.previous.take() {
            None => {
                self.previous = Some(fields.clone());
                self.snapshot(tick, fields)
            }
            Some(previous) => {
                let record = self.diff(tick, &previous, &fields);
                self.previous = Some(fields);
                record
            }
        }
    }

    fn snapshot(&self, tick: u64, fields: Map<String, Value>) -> TelemetryRecord {
        let mut record = fields;
        self.tag_envelope(&mut record, tick, PayloadKind::Snapshot);
        TelemetryRecord { kind: PayloadKind::Snapshot, tick, record }
    }

    fn diff(
        &self,
        tick: u64,
        previous: &Map<String, Value>,
        current: &Map<String, Value>,
    ) -> TelemetryRecord {
        let mut changes = Map::new();
        for (name, value) in current {
            if previous.get(name) != Some(value) {
                changes.insert(name.clone(), value.clone());
            }
        }
        let removed: Vec<Value> = previous
            .keys()
            .filter(|name| !current.contains_key(*name))
            .map(|name| Value::String(name.clone()))
            .collect();

        let mut record = Map::new();
        self.tag_envelope(&mut record, tick, PayloadKind::Diff);
        record.insert("changes".to_string(), Value::Object(changes));
        if !removed.is_empty() {
            record.insert("removed".to_string(), Value::Array(removed));
        }
        TelemetryRecord { kind: PayloadKind::Diff, tick, record }
    }

    fn tag_envelope(&self, record: &mut Map<String, Value>, tick: u64, kind: PayloadKind) {
        record.insert("schema_version".to_string(), Value::String(self.schema_version.clone()));
        record.insert("tick".to_string(), Value::from(tick));
        record.insert("payload_type".to_string(), Value::String(kind.as_str().to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signals(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn payload_is_newline_terminated() {
        let payload = Payload::new(b"{\"tick\":1}".to_vec(), 1);
        assert_eq!(payload.as_bytes().last(), Some(&b'\n'));
        assert_eq!(payload.len(), 11);
        assert_eq!(payload.tick(), 1);

        // an already-terminated record is left alone
        let payload = Payload::new(b"{}\n".to_vec(), 2);
        assert_eq!(payload.len(), 3);
    }

    #[test]
    fn diff_disabled_always_emits_snapshots() {
        let mut builder = StreamPayloadBuilder::new("1.0", false);
        for tick in 1..4 {
            let record = builder.build(tick, signals(&[("a", json!(1))]));
            assert_eq!(record.kind(), PayloadKind::Snapshot);
            assert_eq!(record.as_map()["payload_type"], json!("snapshot"));
            assert_eq!(record.as_map()["tick"], json!(tick));
            assert_eq!(record.as_map()["a"], json!(1));
        }
    }

    #[test]
    fn snapshot_then_diff_sequence() {
        let mut builder = StreamPayloadBuilder::new("1.0", true);

        let first = builder.build(1, signals(&[("a", json!(1)), ("b", json!(2))]));
        assert_eq!(first.kind(), PayloadKind::Snapshot);
        assert_eq!(first.as_map()["a"], json!(1));
        assert_eq!(first.as_map()["b"], json!(2));

        let second = builder.build(2, signals(&[("a", json!(1)), ("b", json!(3))]));
        assert_eq!(second.kind(), PayloadKind::Diff);
        assert_eq!(second.as_map()["changes"], json!({"b": 3}));
        assert!(!second.as_map().contains_key("removed"));

        let third = builder.build(3, signals(&[("a", json!(1))]));
        assert_eq!(third.kind(), PayloadKind::Diff);
        assert_eq!(third.as_map()["changes"], json!({}));
        assert_eq!(third.as_map()["removed"], json!(["b"]));
    }

    #[test]
    fn reset_forces_full_snapshot() {
        let mut builder = StreamPayloadBuilder::new("1.0", true);
        builder.build(1, signals(&[("a", json!(1))]));
        builder.reset();
        let record = builder.build(2, signals(&[("a", json!(1))]));
        assert_eq!(record.kind(), PayloadKind::Snapshot);
    }

    #[test]
    fn envelope_fields_cannot_be_shadowed() {
        let mut builder = StreamPayloadBuilder::new("1.0", false);
        let record = builder.build(7, signals(&[("tick", json!(999)), ("a", json!(1))]));
        assert_eq!(record.as_map()["tick"], json!(7));
        assert_eq!(record.as_map()["a"], json!(1));
    }

    #[test]
    fn serialized_record_round_trips() {
        let mut builder = StreamPayloadBuilder::new("1.0", false);
        let record = builder.build(5, signals(&[("world", json!({"weather": "rain"}))]));
        let payload = record.to_payload().unwrap();
        assert_eq!(payload.as_bytes().last(), Some(&b'\n'));

        let parsed: Value = serde_json::from_slice(payload.as_bytes()).unwrap();
        assert_eq!(parsed["schema_version"], json!("1.0"));
        assert_eq!(parsed["tick"], json!(5));
        assert_eq!(parsed["payload_type"], json!("snapshot"));
        assert_eq!(parsed["world"]["weather"], json!("rain"));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeMap;

        /// Replay a snapshot/diff stream, reconstructing the full mapping.
        fn apply(state: &mut Map<String, Value>, record: &TelemetryRecord) {
            match record.kind() {
                PayloadKind::Snapshot => {
                    state.clear();
                    for (key, value) in record.as_map() {
                        if !ENVELOPE_FIELDS.contains(&key.as_str()) {
                            state.insert(key.clone(), value.clone());
                        }
                    }
                }
                PayloadKind::Diff => {
                    if let Some(Value::Object(changes)) = record.as_map().get("changes") {
                        for (key, value) in changes {
                            state.insert(key.clone(), value.clone());
                        }
                    }
                    if let Some(Value::Array(removed)) = record.as_map().get("removed") {
                        for name in removed {
                            if let Value::String(name) = name {
                                state.remove(name);
                            }
                        }
                    }
                }
            }
        }

        fn tick_mappings() -> impl Strategy<Value = Vec<BTreeMap<String, i64>>> {
            prop::collection::vec(
                prop::collection::btree_map("[a-e]", any::<i64>(), 0..5),
                1..12,
            )
        }

        proptest! {
            #[test]
            fn diff_replay_reconstructs_every_tick(mappings in tick_mappings()) {
                let mut builder = StreamPayloadBuilder::new("1.0", true);
                let mut replayed = Map::new();

                for (tick, mapping) in mappings.iter().enumerate() {
                    let signals: Vec<(String, Value)> = mapping
                        .iter()
                        .map(|(k, v)| (k.clone(), json!(*v)))
                        .collect();
                    let record = builder.build(tick as u64, signals);
                    apply(&mut replayed, &record);

                    let expected: Map<String, Value> = mapping
                        .iter()
                        .map(|(k, v)| (k.clone(), json!(*v)))
                        .collect();
                    prop_assert_eq!(&replayed, &expected);
                }
            }

            #[test]
            fn only_first_record_is_a_snapshot(mappings in tick_mappings()) {
                let mut builder = StreamPayloadBuilder::new("1.0", true);
                for (tick, mapping) in mappings.iter().enumerate() {
                    let signals: Vec<(String, Value)> = mapping
                        .iter()
                        .map(|(k, v)| (k.clone(), json!(*v)))
                        .collect();
                    let record = builder.build(tick as u64, signals);
                    if tick == 0 {
                        prop_assert_eq!(record.kind(), PayloadKind::Snapshot);
                    } else {
                        prop_assert_eq!(record.kind(), PayloadKind::Diff);
                    }
                }
            }
        }
    }
}
