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

//! Route line overlays.
//!
//! Route counts are small, so every change to the route selection removes
//! all drawn lines and redraws from scratch.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::geo::LonLat;
use crate::selection::SelectionSet;
use crate::stops::{coordinate, flexible_string, Coordinate};
use crate::surface::MapSurface;

/// Prefix shared by every route overlay id.
pub const ROUTE_OVERLAY_PREFIX: &str = "routeLine";

/// Travel direction of a route pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Outbound, Direction::Inbound];

    /// Wire code: `0` outbound, `1` inbound.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Outbound => 0,
            Self::Inbound => 1,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Outbound),
            1 => Some(Self::Inbound),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => write!(f, "outbound"),
            Self::Inbound => write!(f, "inbound"),
        }
    }
}

/// Route list entry from the REST collaborator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteSummary {
    #[serde(deserialize_with = "flexible_string")]
    pub route_id: String,
    #[serde(default)]
    pub route_short_name: String,
    #[serde(default)]
    pub route_long_name: String,
}

/// One geometry point; coordinates may arrive as strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoutePoint {
    pub latitude: Coordinate,
    pub longitude: Coordinate,
}

/// Ordered points of one route pattern.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoutePattern {
    pub direction: u8,
    #[serde(default)]
    pub points: Vec<RoutePoint>,
}

/// Fetched geometry keyed by route id.
pub type RouteGeometry = BTreeMap<String, Vec<RoutePattern>>;

/// Overlay id for a route + direction pair.
#[must_use]
pub fn overlay_id(route_id: &str, direction: Direction) -> String {
    format!("{}_{}_{}", ROUTE_OVERLAY_PREFIX, route_id, direction.code())
}

/// Concatenate every pattern of `direction` into one polyline.
#[must_use]
pub fn line_for(patterns: &[RoutePattern], direction: Direction) -> Vec<LonLat> {
    patterns
        .iter()
        .filter(|p| p.direction == direction.code())
        .flat_map(|p| p.points.iter())
        .filter_map(|pt| {
            let point = LonLat::new(coordinate(&pt.longitude)?, coordinate(&pt.latitude)?);
            point.is_valid().then_some(point)
        })
        .collect()
}

/// Draws selected route directions as line overlays.
#[derive(Debug, Default)]
pub struct RouteLayer {
    drawn: BTreeSet<String>,
}

impl RouteLayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route ids that are selected but have no geometry yet.
    #[must_use]
    pub fn missing_geometry(selection: &SelectionSet, geometry: &RouteGeometry) -> Vec<String> {
        selection
            .route_ids()
            .filter(|id| !geometry.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Remove every drawn overlay and redraw the current selection.
    ///
    /// Pairs whose geometry is unavailable, or has fewer than two points,
    /// are skipped.
    pub fn render(
        &mut self,
        surface: &mut dyn MapSurface,
        selection: &SelectionSet,
        geometry: &RouteGeometry,
    ) {
        self.clear(surface);

        for (route_id, direction) in selection.route_pairs() {
            let Some(patterns) = geometry.get(&route_id) else {
                debug!("No geometry for route {} yet", route_id);
                continue;
            };
            let points = line_for(patterns, direction);
            if points.len() < 2 {
                warn!(
                    "Route {} {} has {} usable points, not drawing",
                    route_id,
                    direction,
                    points.len()
                );
                continue;
            }
            let id = overlay_id(&route_id, direction);
            surface.add_line_overlay(&id, &points);
            self.drawn.insert(id);
        }

        debug!("Drew {} route overlays", self.drawn.len());
    }

    /// Remove every overlay this layer drew.
    pub fn clear(&mut self, surface: &mut dyn MapSurface) {
        for id in std::mem::take(&mut self.drawn) {
            surface.remove_line_overlay(&id);
        }
    }

    /// Overlay ids currently on the map.
    pub fn drawn(&self) -> impl Iterator<Item = &String> {
        self.drawn.iter()
    }
}
