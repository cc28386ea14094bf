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

//! Stop clustering layer.
//!
//! Declarative: every relevant change rebuilds the full point collection
//! from the selected stops and hands it to the surface's clustering source.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Deserializer, Serialize};

use crate::geo::LonLat;
use crate::selection::SelectionSet;
use crate::surface::MapSurface;

/// A coordinate that may be encoded as a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Coordinate {
    Number(f64),
    Text(String),
}

/// Parse a [`Coordinate`], `None` if it is not a finite number.
#[must_use]
pub fn coordinate(value: &Coordinate) -> Option<f64> {
    let parsed = match value {
        Coordinate::Number(n) => Some(*n),
        Coordinate::Text(s) => s.trim().parse::<f64>().ok(),
    };
    parsed.filter(|v| v.is_finite())
}

/// Accept ids encoded as strings or numbers.
pub(crate) fn flexible_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}

/// Stop record as served by the REST collaborator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StopRecord {
    #[serde(deserialize_with = "flexible_string")]
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: String,
    pub stop_lat: Coordinate,
    pub stop_lon: Coordinate,
}

/// One page of the stop listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopPage {
    #[serde(default)]
    pub stops: Vec<StopRecord>,
}

/// A point feature pushed to the clustering source.
#[derive(Debug, Clone, PartialEq)]
pub struct StopFeature {
    pub stop_id: String,
    pub stop_name: String,
    pub position: LonLat,
}

impl StopFeature {
    /// Text of the label shown when an unclustered stop is clicked.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}  -  {}", self.stop_name, self.stop_id)
    }
}

/// Clustering source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// Cluster radius in screen pixels.
    pub radius_px: f64,
    /// Zoom above which points are never clustered.
    pub max_zoom: f64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            radius_px: 50.0,
            max_zoom: 14.0,
        }
    }
}

/// Build features for the selected subset of `stops`.
#[must_use]
pub fn build_features(stops: &[StopRecord], selection: &SelectionSet) -> Vec<StopFeature> {
    stops
        .iter()
        .filter(|s| selection.contains_stop(&s.stop_id))
        .filter_map(|s| {
            let (Some(lon), Some(lat)) = (coordinate(&s.stop_lon), coordinate(&s.stop_lat)) else {
                warn!("Skipping stop {} with unparsable coordinates", s.stop_id);
                return None;
            };
            Some(StopFeature {
                stop_id: s.stop_id.clone(),
                stop_name: s.stop_name.clone(),
                position: LonLat::new(lon, lat),
            })
        })
        .collect()
}

/// Clustered view of the features for one zoom level.
#[derive(Debug, Clone, PartialEq)]
pub struct StopCluster {
    /// Mean position of the members.
    pub center: LonLat,
    /// Indices into the feature slice.
    pub members: Vec<usize>,
}

impl StopCluster {
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.members.len() == 1
    }
}

/// Grid clustering in screen space for hosts without a native source.
///
/// `project` maps a coordinate to pixels at the current zoom. Above
/// `options.max_zoom` every feature is its own cluster.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    reason = "pixel cells are small integers"
)]
pub fn cluster_features<F>(
    features: &[StopFeature],
    options: &ClusterOptions,
    zoom: f64,
    project: F,
) -> Vec<StopCluster>
where
    F: Fn(LonLat) -> (f64, f64),
{
    if zoom > options.max_zoom || options.radius_px <= 0.0 {
        return features
            .iter()
            .enumerate()
            .map(|(i, f)| StopCluster {
                center: f.position,
                members: vec![i],
            })
            .collect();
    }

    let mut cells: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
    for (i, feature) in features.iter().enumerate() {
        let (x, y) = project(feature.position);
        let cell = (
            (x / options.radius_px).floor() as i64,
            (y / options.radius_px).floor() as i64,
        );
        cells.entry(cell).or_default().push(i);
    }

    cells
        .into_values()
        .map(|members| {
            let n = members.len() as f64;
            let (lon, lat) = members.iter().fold((0.0, 0.0), |(lon, lat), i| {
                (lon + features[*i].position.lon, lat + features[*i].position.lat)
            });
            StopCluster {
                center: LonLat::new(lon / n, lat / n),
                members,
            }
        })
        .collect()
}

/// Pushes the selected stops to the surface, replacing everything each time.
#[derive(Debug, Default)]
pub struct StopLayer {
    options: ClusterOptions,
    features: Vec<StopFeature>,
}

impl StopLayer {
    #[must_use]
    pub fn new(options: ClusterOptions) -> Self {
        Self {
            options,
            features: Vec::new(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// Rebuild and push the full feature collection.
    pub fn render(
        &mut self,
        surface: &mut dyn MapSurface,
        stops: &[StopRecord],
        selection: &SelectionSet,
    ) {
        self.features = build_features(stops, selection);
        surface.set_stop_features(&self.features, &self.options);
        debug!("Pushed {} stop features", self.features.len());
    }

    /// Features pushed by the last render.
    #[must_use]
    pub fn features(&self) -> &[StopFeature] {
        &self.features
    }

    /// Open the transient label for a clicked stop. Returns false for stops
    /// that are not currently rendered.
    pub fn click(&self, surface: &mut dyn MapSurface, stop_id: &str) -> bool {
        match self.features.iter().find(|f| f.stop_id == stop_id) {
            Some(feature) => {
                surface.show_label(feature.position, &feature.label());
                true
            }
            None => false,
        }
    }
}
