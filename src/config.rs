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

//! Application configuration management.
//!
//! Persistent configuration is stored as TOML through confy. Every field has
//! a serde default so older files keep loading as new settings are added.

use std::time::Duration;

use fleet_live::{AnimationTuning, ClusterOptions, ConnectionConfig, FeedConfig, FieldVisibility};
use fleet_live::{FieldKey, LonLat};
use log::info;
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "fleet-dashboard";
const CONFIG_NAME: &str = "config";

/// Default live feed address
pub const DEFAULT_FEED_ADDRESS: &str = fleet_live::tcp::DEFAULT_ADDRESS;

/// Default REST API base URL
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Live feed address in host:port format
    #[serde(default = "default_feed_address")]
    pub feed_address: String,

    /// socket.io event name carrying position snapshots
    #[serde(default = "default_event_name")]
    pub feed_event: String,

    /// Seconds without a feed line before reconnecting
    #[serde(default = "default_feed_idle_secs")]
    pub feed_idle_secs: u64,

    /// REST API base URL, without trailing slash
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Initial map center longitude
    #[serde(default = "default_center_lon")]
    pub center_lon: f64,

    /// Initial map center latitude
    #[serde(default = "default_center_lat")]
    pub center_lat: f64,

    /// Initial map zoom level
    #[serde(default = "default_zoom")]
    pub default_zoom: f64,

    /// Dark theme
    #[serde(default = "default_true")]
    pub dark_mode: bool,

    /// Side panel width in pixels
    #[serde(default = "default_panel_width")]
    pub panel_width: f32,

    /// Marker animation tuning
    #[serde(default)]
    pub animation: AnimationTuning,

    /// Stop clustering
    #[serde(default)]
    pub clustering: ClusterOptions,

    /// Popup fields shown for each vehicle
    #[serde(default = "default_popup_fields")]
    pub popup_fields: FieldVisibility,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_feed_address() -> String {
    DEFAULT_FEED_ADDRESS.to_string()
}

fn default_event_name() -> String {
    fleet_live::protocol::DEFAULT_EVENT_NAME.to_string()
}

fn default_feed_idle_secs() -> u64 {
    60
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_center_lon() -> f64 {
    27.1428
}

fn default_center_lat() -> f64 {
    38.4237
}

fn default_zoom() -> f64 {
    12.0
}

fn default_true() -> bool {
    true
}

fn default_panel_width() -> f32 {
    340.0
}

fn default_popup_fields() -> FieldVisibility {
    FieldVisibility::none()
        .with(FieldKey::VehicleId, true)
        .with(FieldKey::Plate, true)
        .with(FieldKey::Speed, true)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            feed_address: default_feed_address(),
            feed_event: default_event_name(),
            feed_idle_secs: default_feed_idle_secs(),
            api_url: default_api_url(),
            center_lon: default_center_lon(),
            center_lat: default_center_lat(),
            default_zoom: default_zoom(),
            dark_mode: true,
            panel_width: default_panel_width(),
            animation: AnimationTuning::default(),
            clustering: ClusterOptions::default(),
            popup_fields: default_popup_fields(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults if missing
    pub fn load() -> Result<Self, confy::ConfyError> {
        let config: AppConfig = confy::load(APP_NAME, CONFIG_NAME)?;
        if let Ok(path) = Self::get_config_path() {
            info!("Loaded configuration from {}", path.display());
        }
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    #[must_use]
    pub fn center(&self) -> LonLat {
        LonLat::new(self.center_lon, self.center_lat)
    }

    /// Live feed settings derived from this configuration
    #[must_use]
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            connection: ConnectionConfig {
                address: self.feed_address.clone(),
                read_timeout: (self.feed_idle_secs > 0)
                    .then(|| Duration::from_secs(self.feed_idle_secs)),
                ..Default::default()
            },
            event_name: self.feed_event.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"feed_address": "10.1.1.1:9000", "animation": {"max_duration_ms": 2000}}"#,
        )
        .unwrap();

        assert_eq!(config.feed_address, "10.1.1.1:9000");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.animation.max_duration_ms, 2000);
        assert_eq!(config.animation.min_duration_ms, 250);
        assert!((config.clustering.max_zoom - 14.0).abs() < f64::EPSILON);
        assert!(config.popup_fields.is_visible(FieldKey::Plate));
    }

    #[test]
    fn test_feed_config_idle_timeout() {
        let mut config = AppConfig::default();
        assert_eq!(
            config.feed_config().connection.read_timeout,
            Some(Duration::from_secs(60))
        );

        config.feed_idle_secs = 0;
        assert!(config.feed_config().connection.read_timeout.is_none());
        assert_eq!(config.feed_config().event_name, "bus_positions");
    }

    #[test]
    fn test_default_feed_address_matches_connection_default() {
        assert_eq!(
            AppConfig::default().feed_config().connection.address,
            ConnectionConfig::default().address
        );
    }
}
