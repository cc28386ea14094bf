// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! JSON snapshot parser.
//!
//! Accepts one message per line in any of these shapes:
//! ```text
//! {"V1": {"lon": 29.0, "lat": 41.0, "headingDeg": 90, "ts": 1700000000000}, ...}
//! [{"id": "V1", "lon": 29.0, "lat": 41.0}, ...]
//! 42["bus_positions", {"V1": {...}}]
//! ```
//! The last form is a socket.io event frame; frames for other events and
//! engine.io control packets (ping, open, connect) yield `Ok(None)`.

use chrono::{DateTime, Utc};
use log::debug;
use serde_json::{Map, Value};

use super::{ParseError, Protocol, Snapshot, VehicleId, VehiclePosition};
use crate::geo::LonLat;

/// Event name the live server uses for position snapshots.
pub const DEFAULT_EVENT_NAME: &str = "bus_positions";

/// Keys consumed into typed fields; everything else lands in `fields`.
const RESERVED_KEYS: &[&str] = &[
    "id",
    "vehicleId",
    "lon",
    "lat",
    "headingDeg",
    "heading",
    "speedKph",
    "ts",
];

/// Parser for JSON position snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotParser {
    event_name: String,
}

impl Default for SnapshotParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotParser {
    /// Create a parser listening for the default `bus_positions` event.
    #[must_use]
    pub fn new() -> Self {
        Self::for_event(DEFAULT_EVENT_NAME)
    }

    /// Create a parser listening for a specific socket.io event name.
    #[must_use]
    pub fn for_event(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
        }
    }

    /// Parse a line, stamping the snapshot with an explicit receipt time.
    pub fn parse_at(
        &self,
        line: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Option<Snapshot>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let payload = match line.as_bytes()[0] {
            b'{' | b'[' => serde_json::from_str::<Value>(line)?,
            b'0'..=b'9' => match self.unwrap_socketio_frame(line)? {
                Some(payload) => payload,
                None => return Ok(None),
            },
            _ => {
                return Err(ParseError::InvalidFormat(format!(
                    "unexpected leading character in '{}'",
                    truncate(line, 32)
                )))
            }
        };

        decode_payload(payload, received_at).map(Some)
    }

    /// Extract the event payload from a `42[...]` frame, if it is ours.
    fn unwrap_socketio_frame(&self, line: &str) -> Result<Option<Value>, ParseError> {
        let Some(rest) = line.strip_prefix("42") else {
            // open/ping/pong/connect packets
            return Ok(None);
        };

        // Optional namespace ("/fleet,") and ack id digits precede the array
        let rest = if rest.starts_with('/') {
            rest.split_once(',').map_or("", |(_, tail)| tail)
        } else {
            rest
        };
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

        let frame: Value = serde_json::from_str(rest)?;
        let Value::Array(mut items) = frame else {
            return Err(ParseError::InvalidFormat(
                "socket.io event frame is not an array".to_string(),
            ));
        };
        if items.is_empty() {
            return Err(ParseError::MissingField("event"));
        }

        let payload = if items.len() > 1 {
            items.swap_remove(1)
        } else {
            Value::Null
        };
        match &items[0] {
            Value::String(name) if *name == self.event_name => {}
            Value::String(name) => {
                debug!("Ignoring socket.io event '{}'", name);
                return Ok(None);
            }
            other => {
                return Err(ParseError::InvalidValue {
                    field: "event",
                    value: other.to_string(),
                })
            }
        }

        if payload.is_null() {
            return Err(ParseError::MissingField("payload"));
        }
        Ok(Some(payload))
    }
}

impl Protocol for SnapshotParser {
    type Message = Snapshot;
    type Error = ParseError;

    fn parse(&mut self, input: &[u8]) -> Result<Option<Snapshot>, ParseError> {
        let line = std::str::from_utf8(input)
            .map_err(|e| ParseError::InvalidFormat(format!("invalid UTF-8: {e}")))?;

        self.parse_at(line, Utc::now())
    }
}

fn decode_payload(payload: Value, received_at: DateTime<Utc>) -> Result<Snapshot, ParseError> {
    let mut snapshot = Snapshot::new(received_at);
    let receipt_ms = received_at.timestamp_millis();

    match payload {
        Value::Object(map) => {
            for (id, record) in map {
                add_record(&mut snapshot, id, &record, receipt_ms);
            }
        }
        Value::Array(records) => {
            for record in records {
                let Some(id) = record
                    .as_object()
                    .and_then(|obj| obj.get("id").or_else(|| obj.get("vehicleId")))
                    .and_then(id_string)
                else {
                    debug!("Dropping position record without id");
                    continue;
                };
                add_record(&mut snapshot, id, &record, receipt_ms);
            }
        }
        other => {
            return Err(ParseError::InvalidFormat(format!(
                "snapshot payload must be an object or array, got {}",
                kind(&other)
            )))
        }
    }

    Ok(snapshot)
}

fn add_record(snapshot: &mut Snapshot, id: VehicleId, record: &Value, receipt_ms: i64) {
    match decode_record(&id, record, receipt_ms) {
        Ok(position) => snapshot.insert(position),
        Err(e) => {
            debug!("Dropping position for {} this tick: {}", id, e);
            snapshot.positions.remove(&id);
            snapshot.malformed.insert(id);
        }
    }
}

fn decode_record(id: &str, record: &Value, receipt_ms: i64) -> Result<VehiclePosition, ParseError> {
    let obj: &Map<String, Value> = record.as_object().ok_or_else(|| ParseError::InvalidValue {
        field: "record",
        value: kind(record).to_string(),
    })?;

    let lon = number(obj, "lon").ok_or(ParseError::MissingField("lon"))?;
    let lat = number(obj, "lat").ok_or(ParseError::MissingField("lat"))?;
    let position = LonLat::new(lon, lat);
    if !position.is_valid() {
        return Err(ParseError::InvalidValue {
            field: "lon/lat",
            value: format!("{lon}, {lat}"),
        });
    }

    let heading_deg = number(obj, "headingDeg").or_else(|| number(obj, "heading"));
    let speed_kph = number(obj, "speedKph");
    let producer_ts = obj.get("ts").and_then(timestamp_ms);

    let fields = obj
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(VehiclePosition {
        id: id.to_string(),
        position,
        heading_deg,
        speed_kph,
        ts: producer_ts.unwrap_or(receipt_ms),
        ts_from_producer: producer_ts.is_some(),
        fields,
    })
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

/// Largest epoch offset a date can carry (±100,000,000 days).
const MAX_TIMESTAMP_MS: i64 = 8_640_000_000_000_000;

/// Epoch milliseconds from a number, a numeric string or an RFC 3339 string.
///
/// Values outside the representable date range are rejected so the record
/// falls back to the receipt time.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    reason = "floats are range-checked before the cast"
)]
fn timestamp_ms(value: &Value) -> Option<i64> {
    let ms = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() <= MAX_TIMESTAMP_MS as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok().or_else(|| {
            DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp_millis())
        }),
        _ => None,
    }?;
    (-MAX_TIMESTAMP_MS..=MAX_TIMESTAMP_MS).contains(&ms).then_some(ms)
}

fn id_string(value: &Value) -> Option<VehicleId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
