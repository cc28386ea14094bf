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

//! Map controller composing the vehicle, stop and route layers.
//!
//! The host owns the selection, the fetched stop records and route geometry;
//! the controller only remembers which selection revisions it has already
//! rendered so it re-derives exactly the overlays that changed.

use std::time::Instant;

use log::debug;

use crate::animation::AnimationTuning;
use crate::geo::LonLat;
use crate::layer::VehicleLayer;
use crate::popup::FieldVisibility;
use crate::protocol::Snapshot;
use crate::routes::{RouteGeometry, RouteLayer};
use crate::selection::SelectionSet;
use crate::stops::{ClusterOptions, StopLayer, StopRecord};
use crate::surface::{MapSurface, MarkerHandle};

/// Zoom level used by [`MapController::fly_to`].
pub const FLY_TO_ZOOM: f64 = 18.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Revisions {
    vehicle: u64,
    stop: u64,
    route: u64,
}

impl Revisions {
    fn of(selection: &SelectionSet) -> Self {
        Self {
            vehicle: selection.vehicle_revision(),
            stop: selection.stop_revision(),
            route: selection.route_revision(),
        }
    }
}

/// What a selection change caused to be re-rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rerendered {
    pub vehicles: bool,
    pub stops: bool,
    pub routes: bool,
}

/// Drives every map layer from host events.
#[derive(Debug, Default)]
pub struct MapController {
    vehicles: VehicleLayer,
    stops: StopLayer,
    routes: RouteLayer,
    seen: Revisions,
    highlight: Option<MarkerHandle>,
}

impl MapController {
    #[must_use]
    pub fn new(
        tuning: AnimationTuning,
        visibility: FieldVisibility,
        cluster: ClusterOptions,
    ) -> Self {
        Self {
            vehicles: VehicleLayer::new(tuning, visibility),
            stops: StopLayer::new(cluster),
            routes: RouteLayer::new(),
            seen: Revisions::default(),
            highlight: None,
        }
    }

    /// Reconcile vehicle markers against a fresh snapshot.
    pub fn on_snapshot(
        &mut self,
        snapshot: &Snapshot,
        selection: &SelectionSet,
        surface: &mut dyn MapSurface,
        now: Instant,
    ) {
        self.vehicles.apply_snapshot(snapshot, selection, surface, now);
    }

    /// Re-derive whatever the selection change touched.
    pub fn on_selection_changed(
        &mut self,
        selection: &SelectionSet,
        stops: &[StopRecord],
        geometry: &RouteGeometry,
        surface: &mut dyn MapSurface,
    ) -> Rerendered {
        let current = Revisions::of(selection);
        let rerendered = Rerendered {
            vehicles: current.vehicle != self.seen.vehicle,
            stops: current.stop != self.seen.stop,
            routes: current.route != self.seen.route,
        };

        if rerendered.vehicles {
            self.vehicles.sweep_selection(selection, surface);
        }
        if rerendered.stops {
            self.stops.render(surface, stops, selection);
        }
        if rerendered.routes {
            self.routes.render(surface, selection, geometry);
        }

        self.seen = current;
        rerendered
    }

    /// A new stop listing arrived (search or page change).
    pub fn on_stops_loaded(
        &mut self,
        selection: &SelectionSet,
        stops: &[StopRecord],
        surface: &mut dyn MapSurface,
    ) {
        self.stops.render(surface, stops, selection);
    }

    /// Geometry for another route arrived.
    pub fn on_geometry_loaded(
        &mut self,
        selection: &SelectionSet,
        geometry: &RouteGeometry,
        surface: &mut dyn MapSurface,
    ) {
        self.routes.render(surface, selection, geometry);
    }

    /// The base style changed and dropped every overlay: redraw them all.
    pub fn on_style_changed(
        &mut self,
        selection: &SelectionSet,
        stops: &[StopRecord],
        geometry: &RouteGeometry,
        surface: &mut dyn MapSurface,
    ) {
        debug!("Base style changed, redrawing overlays");
        self.stops.render(surface, stops, selection);
        self.routes.render(surface, selection, geometry);
        self.seen = Revisions::of(selection);
    }

    pub fn set_field_visibility(
        &mut self,
        visibility: FieldVisibility,
        surface: &mut dyn MapSurface,
    ) {
        self.vehicles.set_field_visibility(visibility, surface);
    }

    pub fn set_tuning(&mut self, tuning: AnimationTuning) {
        self.vehicles.set_tuning(tuning);
    }

    /// Run one display frame. Returns true while animations are pending.
    pub fn frame(&mut self, now: Instant, surface: &mut dyn MapSurface) -> bool {
        self.vehicles.run_frame(now, surface)
    }

    /// Recenter on `center` and mark it, replacing any previous highlight.
    pub fn fly_to(&mut self, center: LonLat, surface: &mut dyn MapSurface) {
        if let Some(previous) = self.highlight.take() {
            surface.remove_marker(previous);
        }
        surface.fly_to(center, FLY_TO_ZOOM);
        self.highlight = Some(surface.add_highlight_marker(center));
    }

    /// Open the label of a clicked, unclustered stop.
    pub fn click_stop(&self, stop_id: &str, surface: &mut dyn MapSurface) -> bool {
        self.stops.click(surface, stop_id)
    }

    /// Route ids the host still needs geometry for.
    #[must_use]
    pub fn missing_geometry(selection: &SelectionSet, geometry: &RouteGeometry) -> Vec<String> {
        RouteLayer::missing_geometry(selection, geometry)
    }

    #[must_use]
    pub fn vehicles(&self) -> &VehicleLayer {
        &self.vehicles
    }

    #[must_use]
    pub fn stops(&self) -> &StopLayer {
        &self.stops
    }

    #[must_use]
    pub fn routes(&self) -> &RouteLayer {
        &self.routes
    }

    #[must_use]
    pub fn highlight(&self) -> Option<MarkerHandle> {
        self.highlight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::VehiclePosition;
    use crate::routes::{Direction, RoutePattern};
    use crate::testing::RecordingSurface;
    use chrono::Utc;

    fn stops() -> Vec<StopRecord> {
        serde_json::from_str(
            r#"[
                {"stop_id": "10", "stop_name": "Konak", "stop_lat": "38.4189", "stop_lon": "27.1287"},
                {"stop_id": "11", "stop_name": "Alsancak", "stop_lat": "38.4381", "stop_lon": "27.1434"}
            ]"#,
        )
        .unwrap()
    }

    fn geometry() -> RouteGeometry {
        let patterns: Vec<RoutePattern> = serde_json::from_str(
            r#"[{"direction": 1, "points": [
                {"latitude": "38.42", "longitude": "27.14"},
                {"latitude": "38.43", "longitude": "27.15"}
            ]}]"#,
        )
        .unwrap();
        RouteGeometry::from([("285".to_string(), patterns)])
    }

    fn controller() -> MapController {
        MapController::new(
            AnimationTuning::default(),
            FieldVisibility::none(),
            ClusterOptions::default(),
        )
    }

    #[test]
    fn test_selection_change_rerenders_only_touched_layers() {
        let mut surface = RecordingSurface::new();
        let mut controller = controller();
        let mut selection = SelectionSet::new();

        selection.set_stops(["10"]);
        let rerendered =
            controller.on_selection_changed(&selection, &stops(), &geometry(), &mut surface);
        assert_eq!(
            rerendered,
            Rerendered {
                vehicles: false,
                stops: true,
                routes: false
            }
        );
        assert_eq!(surface.stop_features.len(), 1);

        selection.set_route_direction("285", Direction::Inbound, true);
        let rerendered =
            controller.on_selection_changed(&selection, &stops(), &geometry(), &mut surface);
        assert!(rerendered.routes && !rerendered.stops);
        assert!(surface.lines.contains_key("routeLine_285_1"));
        assert_eq!(surface.stop_pushes, 1);

        // nothing changed
        let rerendered =
            controller.on_selection_changed(&selection, &stops(), &geometry(), &mut surface);
        assert_eq!(rerendered, Rerendered::default());
    }

    #[test]
    fn test_deselecting_vehicle_sweeps_marker() {
        let mut surface = RecordingSurface::new();
        let mut controller = controller();
        let mut selection = SelectionSet::new();
        selection.set_vehicles(["V1"]);
        controller.on_selection_changed(&selection, &[], &RouteGeometry::new(), &mut surface);

        let snapshot = Snapshot::from_positions(
            Utc::now(),
            [VehiclePosition::new("V1", LonLat::new(29.0, 41.0), 0)],
        );
        controller.on_snapshot(&snapshot, &selection, &mut surface, Instant::now());
        assert_eq!(controller.vehicles().marker_count(), 1);

        selection.clear_vehicles();
        controller.on_selection_changed(&selection, &[], &RouteGeometry::new(), &mut surface);
        assert_eq!(controller.vehicles().marker_count(), 0);
        assert!(surface.markers.is_empty());
    }

    #[test]
    fn test_style_change_redraws_everything() {
        let mut surface = RecordingSurface::new();
        let mut controller = controller();
        let mut selection = SelectionSet::new();
        selection.set_stops(["10", "11"]);
        selection.set_route_direction("285", Direction::Inbound, true);
        controller.on_selection_changed(&selection, &stops(), &geometry(), &mut surface);

        controller.on_style_changed(&selection, &stops(), &geometry(), &mut surface);

        assert_eq!(surface.stop_pushes, 2);
        assert_eq!(surface.lines.len(), 1);
        assert_eq!(surface.lines_removed, 1);
    }

    #[test]
    fn test_fly_to_replaces_highlight() {
        let mut surface = RecordingSurface::new();
        let mut controller = controller();

        controller.fly_to(LonLat::new(27.14, 38.42), &mut surface);
        let first = controller.highlight().unwrap();
        controller.fly_to(LonLat::new(27.15, 38.43), &mut surface);

        assert_eq!(surface.highlight_markers(), 1);
        assert!(!surface.markers.contains_key(&first));
        assert_eq!(surface.camera, Some((LonLat::new(27.15, 38.43), FLY_TO_ZOOM)));
    }

    #[test]
    fn test_click_stop_label() {
        let mut surface = RecordingSurface::new();
        let mut controller = controller();
        let mut selection = SelectionSet::new();
        selection.set_stops(["10"]);
        controller.on_stops_loaded(&selection, &stops(), &mut surface);

        assert!(controller.click_stop("10", &mut surface));
        assert_eq!(surface.label.unwrap().1, "Konak  -  10");
    }
}
