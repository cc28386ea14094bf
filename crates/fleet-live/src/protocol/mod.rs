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

//! Live-update message contract.
//!
//! The live transport delivers snapshots: a complete mapping from vehicle id
//! to the latest known position record. This module defines the decoded
//! types and a trait-based parser abstraction so other framings can be
//! plugged in next to the JSON/socket.io one.

mod snapshot;

pub use snapshot::{SnapshotParser, DEFAULT_EVENT_NAME};

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::geo::LonLat;

/// Vehicle identifier. Numeric ids on the wire are normalised to strings.
pub type VehicleId = String;

/// Errors that can occur during message parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// One decoded position record.
///
/// Immutable once decoded. `ts` is the producer timestamp in epoch
/// milliseconds; when the producer omitted it, it holds the receipt time and
/// `ts_from_producer` is false.
#[derive(Debug, Clone, PartialEq)]
pub struct VehiclePosition {
    pub id: VehicleId,
    pub position: LonLat,
    pub heading_deg: Option<f64>,
    pub speed_kph: Option<f64>,
    pub ts: i64,
    pub ts_from_producer: bool,
    /// Remaining display fields (`plate`, `status`, `event`, `odometer`, ...)
    /// keyed by their wire name.
    pub fields: BTreeMap<String, Value>,
}

impl VehiclePosition {
    /// Create a record with no optional fields, stamped at `ts`.
    #[must_use]
    pub fn new(id: impl Into<VehicleId>, position: LonLat, ts: i64) -> Self {
        Self {
            id: id.into(),
            position,
            heading_deg: None,
            speed_kph: None,
            ts,
            ts_from_producer: true,
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = Some(heading_deg);
        self
    }

    #[must_use]
    pub fn with_speed(mut self, speed_kph: f64) -> Self {
        self.speed_kph = Some(speed_kph);
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Look up an extra display field by its wire name.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// A complete id → position mapping delivered at one point in time.
///
/// Ids whose record was present but unusable (no coordinates) are kept in
/// `malformed`: they still count as present, so their markers survive the
/// tick at the previous rendered position.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub received_at: DateTime<Utc>,
    pub positions: BTreeMap<VehicleId, VehiclePosition>,
    pub malformed: BTreeSet<VehicleId>,
}

impl Snapshot {
    #[must_use]
    pub fn new(received_at: DateTime<Utc>) -> Self {
        Self {
            received_at,
            positions: BTreeMap::new(),
            malformed: BTreeSet::new(),
        }
    }

    /// Build a snapshot from already decoded records.
    #[must_use]
    pub fn from_positions(
        received_at: DateTime<Utc>,
        positions: impl IntoIterator<Item = VehiclePosition>,
    ) -> Self {
        let mut snapshot = Self::new(received_at);
        for position in positions {
            snapshot.insert(position);
        }
        snapshot
    }

    pub fn insert(&mut self, position: VehiclePosition) {
        self.malformed.remove(&position.id);
        self.positions.insert(position.id.clone(), position);
    }

    /// Whether `id` is present in this snapshot, valid or not.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id) || self.malformed.contains(id)
    }

    /// Number of ids present, valid or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len() + self.malformed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.malformed.is_empty()
    }
}

/// Trait for live-feed parsers.
///
/// Implement this trait to add support for new feed framings.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse input bytes into a message.
    ///
    /// Returns `Ok(Some(message))` if parsing succeeded,
    /// `Ok(None)` if the input is valid but doesn't produce a message,
    /// or `Err(error)` if parsing failed.
    fn parse(&mut self, input: &[u8]) -> Result<Option<Self::Message>, Self::Error>;
}
