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

//! Retained map scene.
//!
//! The map layers issue effects into a [`Scene`]; each egui frame paints the
//! scene from scratch through the current [`Viewport`].

use std::collections::{BTreeMap, HashMap};

use fleet_live::stops::{cluster_features, StopCluster};
use fleet_live::{
    ClusterOptions, LonLat, MapSurface, MarkerHandle, PopupHandle, PopupRow, StopFeature,
};
use log::warn;

use crate::projection::{Viewport, WebMercator};

/// Click radius around markers and stop points, in pixels.
const HIT_RADIUS: f32 = 10.0;

#[derive(Debug, Clone)]
struct SceneMarker {
    /// `None` for the fly-to highlight.
    vehicle_id: Option<String>,
    at: LonLat,
    heading_deg: f64,
}

#[derive(Debug, Clone)]
struct ScenePopup {
    marker: MarkerHandle,
    open: bool,
    at: LonLat,
    lines: Vec<String>,
}

/// Color set for one theme.
#[derive(Debug, Clone, Copy)]
struct Palette {
    background: egui::Color32,
    vehicle: egui::Color32,
    highlight: egui::Color32,
    stop: egui::Color32,
    cluster: egui::Color32,
    route: egui::Color32,
    text: egui::Color32,
    box_fill: egui::Color32,
}

impl Palette {
    fn for_theme(dark: bool) -> Self {
        if dark {
            Self {
                background: egui::Color32::from_rgb(28, 32, 38),
                vehicle: egui::Color32::from_rgb(120, 220, 120),
                highlight: egui::Color32::from_rgb(255, 80, 80),
                stop: egui::Color32::from_rgb(100, 180, 255),
                cluster: egui::Color32::from_rgb(60, 130, 220),
                route: egui::Color32::from_rgb(255, 170, 40),
                text: egui::Color32::WHITE,
                box_fill: egui::Color32::from_rgba_unmultiplied(0, 0, 0, 180),
            }
        } else {
            Self {
                background: egui::Color32::from_rgb(200, 220, 240),
                vehicle: egui::Color32::from_rgb(20, 140, 60),
                highlight: egui::Color32::from_rgb(220, 30, 30),
                stop: egui::Color32::from_rgb(20, 90, 200),
                cluster: egui::Color32::from_rgb(40, 100, 190),
                route: egui::Color32::from_rgb(210, 110, 0),
                text: egui::Color32::BLACK,
                box_fill: egui::Color32::from_rgba_unmultiplied(255, 255, 255, 220),
            }
        }
    }
}

/// Everything currently drawn on the map.
#[derive(Debug, Default)]
pub struct Scene {
    next_handle: u64,
    markers: HashMap<MarkerHandle, SceneMarker>,
    popups: HashMap<PopupHandle, ScenePopup>,
    stops: Vec<StopFeature>,
    cluster_options: ClusterOptions,
    label: Option<(LonLat, String)>,
    lines: BTreeMap<String, Vec<LonLat>>,
    camera: Option<(LonLat, f64)>,
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Camera move requested since the last call.
    pub fn take_camera(&mut self) -> Option<(LonLat, f64)> {
        self.camera.take()
    }

    pub fn clear_label(&mut self) {
        self.label = None;
    }

    #[must_use]
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    #[must_use]
    pub fn open_popup_count(&self) -> usize {
        self.popups.values().filter(|p| p.open).count()
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Vehicle marker under `pos`, if any.
    #[must_use]
    pub fn vehicle_at(&self, viewport: &Viewport, pos: egui::Pos2) -> Option<&str> {
        self.markers
            .values()
            .filter_map(|m| m.vehicle_id.as_deref().map(|id| (id, m.at)))
            .find(|(_, at)| viewport.to_screen(*at).distance(pos) <= HIT_RADIUS)
            .map(|(id, _)| id)
    }

    /// Unclustered stop under `pos`, if any.
    #[must_use]
    pub fn stop_at(&self, viewport: &Viewport, pos: egui::Pos2) -> Option<&str> {
        self.clusters(viewport)
            .into_iter()
            .filter(StopCluster::is_single)
            .find(|c| viewport.to_screen(c.center).distance(pos) <= HIT_RADIUS)
            .map(|c| self.stops[c.members[0]].stop_id.as_str())
    }

    fn clusters(&self, viewport: &Viewport) -> Vec<StopCluster> {
        let zoom = viewport.zoom;
        cluster_features(&self.stops, &self.cluster_options, zoom, |p| {
            WebMercator::to_world(p, zoom)
        })
    }

    /// Paint the scene into `painter`.
    pub fn paint(&self, painter: &egui::Painter, viewport: &Viewport, dark: bool) {
        let palette = Palette::for_theme(dark);
        let rect = viewport.rect;
        painter.rect_filled(rect, 0.0, palette.background);

        for points in self.lines.values() {
            let screen: Vec<egui::Pos2> = points.iter().map(|p| viewport.to_screen(*p)).collect();
            painter.add(egui::Shape::line(
                screen,
                egui::Stroke::new(3.0, palette.route),
            ));
        }

        for cluster in self.clusters(viewport) {
            let pos = viewport.to_screen(cluster.center);
            if !rect.expand(20.0).contains(pos) {
                continue;
            }
            if cluster.is_single() {
                painter.circle_filled(pos, 4.0, palette.stop);
                painter.circle_stroke(pos, 4.0, egui::Stroke::new(1.0, palette.text));
            } else {
                #[allow(clippy::cast_precision_loss, reason = "cluster sizes are small")]
                let radius = 10.0 + (cluster.members.len() as f32).sqrt() * 2.0;
                painter.circle_filled(pos, radius, palette.cluster);
                painter.text(
                    pos,
                    egui::Align2::CENTER_CENTER,
                    cluster.members.len().to_string(),
                    egui::FontId::proportional(11.0),
                    egui::Color32::WHITE,
                );
            }
        }

        for marker in self.markers.values() {
            let pos = viewport.to_screen(marker.at);
            if !rect.contains(pos) {
                continue;
            }
            if marker.vehicle_id.is_some() {
                paint_vehicle(painter, pos, marker.heading_deg, palette.vehicle);
            } else {
                painter.circle_stroke(pos, 12.0, egui::Stroke::new(3.0, palette.highlight));
                painter.circle_filled(pos, 4.0, palette.highlight);
            }
        }

        for popup in self.popups.values().filter(|p| p.open) {
            let pos = viewport.to_screen(popup.at);
            if rect.contains(pos) {
                paint_text_box(painter, pos + egui::vec2(12.0, -12.0), &popup.lines, palette);
            }
        }

        if let Some((at, text)) = &self.label {
            let pos = viewport.to_screen(*at);
            paint_text_box(painter, pos + egui::vec2(8.0, -8.0), std::slice::from_ref(text), palette);
        }
    }
}

/// Vehicle glyph: a circle with a heading tick.
#[allow(clippy::cast_possible_truncation, reason = "screen offsets fit in f32")]
fn paint_vehicle(painter: &egui::Painter, pos: egui::Pos2, heading_deg: f64, color: egui::Color32) {
    painter.circle_filled(pos, 6.0, color);
    let angle = heading_deg.to_radians();
    let dx = angle.sin() as f32 * 15.0;
    let dy = -angle.cos() as f32 * 15.0;
    painter.line_segment([pos, pos + egui::vec2(dx, dy)], egui::Stroke::new(2.0, color));
}

/// Boxed multi-line text anchored at its bottom-left corner.
fn paint_text_box(painter: &egui::Painter, anchor: egui::Pos2, lines: &[String], palette: Palette) {
    let galley = painter.layout_no_wrap(
        lines.join("\n"),
        egui::FontId::proportional(11.0),
        palette.text,
    );
    let padding = egui::vec2(4.0, 3.0);
    let min = anchor - egui::vec2(0.0, galley.size().y + padding.y * 2.0);
    let box_rect = egui::Rect::from_min_size(min, galley.size() + padding * 2.0);
    painter.rect_filled(box_rect, 3.0, palette.box_fill);
    painter.galley(min + padding, galley, palette.text);
}

impl MapSurface for Scene {
    fn add_marker(&mut self, vehicle_id: &str, at: LonLat, heading_deg: f64) -> MarkerHandle {
        let handle = MarkerHandle(self.allocate());
        self.markers.insert(
            handle,
            SceneMarker {
                vehicle_id: Some(vehicle_id.to_string()),
                at,
                heading_deg,
            },
        );
        handle
    }

    fn update_marker(&mut self, marker: MarkerHandle, at: LonLat, heading_deg: f64) {
        if let Some(m) = self.markers.get_mut(&marker) {
            m.at = at;
            m.heading_deg = heading_deg;
        }
    }

    fn remove_marker(&mut self, marker: MarkerHandle) {
        if self.markers.remove(&marker).is_none() {
            warn!("Removing unknown marker {:?}", marker);
        }
    }

    fn create_popup(&mut self, marker: MarkerHandle) -> PopupHandle {
        let handle = PopupHandle(self.allocate());
        let at = self
            .markers
            .get(&marker)
            .map_or(LonLat::new(0.0, 0.0), |m| m.at);
        self.popups.insert(
            handle,
            ScenePopup {
                marker,
                open: false,
                at,
                lines: Vec::new(),
            },
        );
        handle
    }

    fn set_popup_content(&mut self, popup: PopupHandle, rows: &[PopupRow]) {
        if let Some(p) = self.popups.get_mut(&popup) {
            p.lines = rows.iter().map(ToString::to_string).collect();
        }
    }

    fn open_popup(&mut self, popup: PopupHandle, at: LonLat) {
        if let Some(p) = self.popups.get_mut(&popup) {
            p.open = true;
            p.at = at;
        }
    }

    fn move_popup(&mut self, popup: PopupHandle, at: LonLat) {
        if let Some(p) = self.popups.get_mut(&popup) {
            p.at = at;
        }
    }

    fn close_popup(&mut self, popup: PopupHandle) {
        if let Some(p) = self.popups.get_mut(&popup) {
            p.open = false;
        }
    }

    fn release_popup(&mut self, popup: PopupHandle) {
        if let Some(p) = self.popups.remove(&popup) {
            if p.open {
                warn!("Released popup {:?} of marker {:?} while open", popup, p.marker);
            }
        }
    }

    fn set_stop_features(&mut self, features: &[StopFeature], options: &ClusterOptions) {
        self.stops = features.to_vec();
        self.cluster_options = options.clone();
        self.label = None;
    }

    fn show_label(&mut self, at: LonLat, text: &str) {
        self.label = Some((at, text.to_string()));
    }

    fn add_line_overlay(&mut self, overlay_id: &str, points: &[LonLat]) {
        self.lines.insert(overlay_id.to_string(), points.to_vec());
    }

    fn remove_line_overlay(&mut self, overlay_id: &str) {
        self.lines.remove(overlay_id);
    }

    fn fly_to(&mut self, center: LonLat, zoom: f64) {
        self.camera = Some((center, zoom));
    }

    fn add_highlight_marker(&mut self, at: LonLat) -> MarkerHandle {
        let handle = MarkerHandle(self.allocate());
        self.markers.insert(
            handle,
            SceneMarker {
                vehicle_id: None,
                at,
                heading_deg: 0.0,
            },
        );
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_live::{FieldVisibility, MapController, Snapshot, VehiclePosition};
    use fleet_live::{AnimationTuning, SelectionSet};
    use std::time::Instant;

    #[test]
    fn test_popup_lifecycle() {
        let mut scene = Scene::new();
        let marker = scene.add_marker("V1", LonLat::new(27.14, 38.42), 90.0);
        let popup = scene.create_popup(marker);
        assert_eq!(scene.open_popup_count(), 0);

        scene.open_popup(popup, LonLat::new(27.14, 38.42));
        assert_eq!(scene.open_popup_count(), 1);
        scene.close_popup(popup);
        scene.release_popup(popup);
        scene.remove_marker(marker);

        assert_eq!(scene.marker_count(), 0);
        assert_eq!(scene.open_popup_count(), 0);
    }

    #[test]
    fn test_controller_drives_scene() {
        let mut scene = Scene::new();
        let mut controller = MapController::new(
            AnimationTuning::default(),
            FieldVisibility::all(),
            ClusterOptions::default(),
        );
        let mut selection = SelectionSet::new();
        selection.set_vehicles(["V1"]);

        let snapshot = Snapshot::from_positions(
            chrono::Utc::now(),
            [VehiclePosition::new("V1", LonLat::new(27.14, 38.42), 0)],
        );
        controller.on_snapshot(&snapshot, &selection, &mut scene, Instant::now());
        assert_eq!(scene.marker_count(), 1);
        assert_eq!(scene.open_popup_count(), 1);

        controller.fly_to(LonLat::new(27.2, 38.5), &mut scene);
        assert_eq!(scene.take_camera(), Some((LonLat::new(27.2, 38.5), 18.0)));
        assert!(scene.take_camera().is_none());
        assert_eq!(scene.marker_count(), 2);
    }

    #[test]
    fn test_hit_testing() {
        let mut scene = Scene::new();
        let viewport = Viewport::new(LonLat::new(27.14, 38.42), 16.0);
        scene.add_marker("V7", LonLat::new(27.14, 38.42), 0.0);
        scene.set_stop_features(
            &[StopFeature {
                stop_id: "10".to_string(),
                stop_name: "Konak".to_string(),
                position: LonLat::new(27.141, 38.42),
            }],
            &ClusterOptions::default(),
        );

        let center = viewport.rect.center();
        assert_eq!(scene.vehicle_at(&viewport, center + egui::vec2(3.0, 3.0)), Some("V7"));
        assert!(scene.vehicle_at(&viewport, center + egui::vec2(40.0, 0.0)).is_none());

        let stop_pos = viewport.to_screen(LonLat::new(27.141, 38.42));
        assert_eq!(scene.stop_at(&viewport, stop_pos), Some("10"));
    }
}
