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

//! The map surface abstraction.
//!
//! Layers never draw anything themselves. Every visual effect goes through a
//! [`MapSurface`], which a host (the desktop scene, a test recorder, a web
//! bridge) implements.

use crate::geo::LonLat;
use crate::popup::PopupRow;
use crate::stops::{ClusterOptions, StopFeature};

/// Opaque handle to a marker glyph owned by the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerHandle(pub u64);

/// Opaque handle to a popup owned by the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PopupHandle(pub u64);

/// Rendering backend for the dashboard map.
pub trait MapSurface {
    /// Place a vehicle marker rotated to `heading_deg`.
    fn add_marker(&mut self, vehicle_id: &str, at: LonLat, heading_deg: f64) -> MarkerHandle;

    /// Move and rotate an existing marker.
    fn update_marker(&mut self, marker: MarkerHandle, at: LonLat, heading_deg: f64);

    /// Remove a marker glyph from the map.
    fn remove_marker(&mut self, marker: MarkerHandle);

    /// Create a closed popup attached to `marker`.
    fn create_popup(&mut self, marker: MarkerHandle) -> PopupHandle;

    /// Replace the popup's displayed rows.
    fn set_popup_content(&mut self, popup: PopupHandle, rows: &[PopupRow]);

    /// Add a closed popup to the map at `at`.
    fn open_popup(&mut self, popup: PopupHandle, at: LonLat);

    /// Move an open popup.
    fn move_popup(&mut self, popup: PopupHandle, at: LonLat);

    /// Take a popup off the map without releasing it.
    fn close_popup(&mut self, popup: PopupHandle);

    /// Release a popup for good. It must already be closed.
    fn release_popup(&mut self, popup: PopupHandle);

    /// Replace the whole clustered stop source.
    fn set_stop_features(&mut self, features: &[StopFeature], options: &ClusterOptions);

    /// Show a transient text label, replacing any previous one.
    fn show_label(&mut self, at: LonLat, text: &str);

    /// Draw a line overlay under `overlay_id`.
    fn add_line_overlay(&mut self, overlay_id: &str, points: &[LonLat]);

    /// Remove a line overlay. Unknown ids are ignored.
    fn remove_line_overlay(&mut self, overlay_id: &str);

    /// Recenter the view.
    fn fly_to(&mut self, center: LonLat, zoom: f64);

    /// Drop a standalone highlight marker.
    fn add_highlight_marker(&mut self, at: LonLat) -> MarkerHandle;
}
