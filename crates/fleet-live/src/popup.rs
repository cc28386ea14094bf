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

//! Popup content rendering.
//!
//! Turns a position record plus the field-visibility configuration into the
//! ordered rows a vehicle popup shows. Rendering never fails: absent values
//! become a literal `null` so an operator can tell "known but empty" apart
//! from "hidden".

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::VehiclePosition;
use crate::surface::PopupHandle;

/// Placeholder shown for a visible field without a value.
pub const MISSING_VALUE: &str = "null";

/// Popup fields in canonical display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKey {
    VehicleId,
    Plate,
    Speed,
    Status,
    Event,
    LastGpsTime,
    UtcTime,
    Location,
    Odometer,
    ActiveCouple,
    CoupleInfo,
    SamId,
    ContactStatus,
    GpsStatus,
}

impl FieldKey {
    /// Every field, in the order rows are rendered.
    pub const ALL: [FieldKey; 14] = [
        FieldKey::VehicleId,
        FieldKey::Plate,
        FieldKey::Speed,
        FieldKey::Status,
        FieldKey::Event,
        FieldKey::LastGpsTime,
        FieldKey::UtcTime,
        FieldKey::Location,
        FieldKey::Odometer,
        FieldKey::ActiveCouple,
        FieldKey::CoupleInfo,
        FieldKey::SamId,
        FieldKey::ContactStatus,
        FieldKey::GpsStatus,
    ];

    /// Field name as it appears in position records and configuration.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::VehicleId => "vehicleId",
            Self::Plate => "plate",
            Self::Speed => "speed",
            Self::Status => "status",
            Self::Event => "event",
            Self::LastGpsTime => "lastGpsTime",
            Self::UtcTime => "utcTime",
            Self::Location => "location",
            Self::Odometer => "odometer",
            Self::ActiveCouple => "activeCouple",
            Self::CoupleInfo => "coupleInfo",
            Self::SamId => "samId",
            Self::ContactStatus => "contactStatus",
            Self::GpsStatus => "gpsStatus",
        }
    }

    /// Human-readable row label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::VehicleId => "Vehicle ID",
            Self::Plate => "Plate",
            Self::Speed => "Speed",
            Self::Status => "Status",
            Self::Event => "Event",
            Self::LastGpsTime => "Last GPS Time",
            Self::UtcTime => "UTC Time",
            Self::Location => "Location",
            Self::Odometer => "Odometer",
            Self::ActiveCouple => "Active Couple",
            Self::CoupleInfo => "Couple Info",
            Self::SamId => "Sam ID",
            Self::ContactStatus => "Contact Status",
            Self::GpsStatus => "GPS Status",
        }
    }
}

/// Which popup fields are visible. Fields missing from the map are hidden.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldVisibility {
    fields: BTreeMap<FieldKey, bool>,
}

impl FieldVisibility {
    /// Every field hidden.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Every field visible.
    #[must_use]
    pub fn all() -> Self {
        Self {
            fields: FieldKey::ALL.iter().map(|k| (*k, true)).collect(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: FieldKey, visible: bool) -> Self {
        self.set(key, visible);
        self
    }

    pub fn set(&mut self, key: FieldKey, visible: bool) {
        self.fields.insert(key, visible);
    }

    pub fn toggle(&mut self, key: FieldKey) {
        let visible = self.is_visible(key);
        self.set(key, !visible);
    }

    #[must_use]
    pub fn is_visible(&self, key: FieldKey) -> bool {
        self.fields.get(&key).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn visible_count(&self) -> usize {
        self.fields.values().filter(|v| **v).count()
    }
}

/// Display values derived from one position record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleInfo {
    values: BTreeMap<FieldKey, String>,
}

impl VehicleInfo {
    /// Derive popup values for `id` from its latest record, if any.
    #[must_use]
    pub fn derive(id: &str, position: Option<&VehiclePosition>) -> Self {
        let mut values = BTreeMap::new();
        values.insert(FieldKey::VehicleId, id.to_string());

        let Some(p) = position else {
            return Self { values };
        };

        if let Some(speed) = p.speed_kph {
            values.insert(FieldKey::Speed, format!("{} km/h", speed.round()));
        }

        let location = p
            .field("addr")
            .and_then(display_value)
            .unwrap_or_else(|| format!("{:.5}, {:.5}", p.position.lat, p.position.lon));
        values.insert(FieldKey::Location, location);

        for key in FieldKey::ALL {
            if matches!(key, FieldKey::VehicleId | FieldKey::Speed | FieldKey::Location) {
                continue;
            }
            if let Some(value) = p.field(key.key()).and_then(display_value) {
                values.insert(key, value);
            }
        }

        Self { values }
    }

    #[must_use]
    pub fn get(&self, key: FieldKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }
}

/// One rendered popup line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupRow {
    pub key: FieldKey,
    pub label: &'static str,
    pub value: String,
}

impl fmt::Display for PopupRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.label, self.value)
    }
}

/// Render the visible rows in canonical order.
///
/// An empty result means "no content": the caller must keep the popup closed.
#[must_use]
pub fn render_rows(info: &VehicleInfo, visibility: &FieldVisibility) -> Vec<PopupRow> {
    FieldKey::ALL
        .iter()
        .filter(|key| visibility.is_visible(**key))
        .map(|key| PopupRow {
            key: *key,
            label: key.label(),
            value: info
                .get(*key)
                .map_or_else(|| MISSING_VALUE.to_string(), str::to_string),
        })
        .collect()
}

/// Per-marker popup state.
///
/// A popup is created lazily and afterwards only hidden or shown, never
/// destroyed while its marker lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PopupState {
    #[default]
    NotCreated,
    Hidden(PopupHandle),
    Shown(PopupHandle),
}

impl PopupState {
    #[must_use]
    pub fn handle(self) -> Option<PopupHandle> {
        match self {
            Self::NotCreated => None,
            Self::Hidden(handle) | Self::Shown(handle) => Some(handle),
        }
    }

    #[must_use]
    pub fn is_shown(self) -> bool {
        matches!(self, Self::Shown(_))
    }
}

/// String form of a record value, `None` for null or empty strings.
fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
