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

//! In-memory surface that records every effect, for tests.

use std::collections::{BTreeMap, HashMap};

use crate::geo::LonLat;
use crate::popup::PopupRow;
use crate::stops::{ClusterOptions, StopFeature};
use crate::surface::{MapSurface, MarkerHandle, PopupHandle};

#[derive(Debug, Clone)]
pub struct RecordedMarker {
    pub vehicle_id: Option<String>,
    pub at: LonLat,
    pub heading_deg: f64,
}

#[derive(Debug, Clone)]
pub struct RecordedPopup {
    pub marker: MarkerHandle,
    pub open: bool,
    pub at: Option<LonLat>,
    pub rows: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RecordingSurface {
    next_handle: u64,
    pub markers: HashMap<MarkerHandle, RecordedMarker>,
    pub popups: HashMap<PopupHandle, RecordedPopup>,
    pub markers_added: usize,
    pub markers_removed: usize,
    pub marker_moves: usize,
    pub popups_created: usize,
    pub popups_released: usize,
    pub popup_opens: usize,
    pub popup_closes: usize,
    pub popup_content_sets: usize,
    pub stop_features: Vec<StopFeature>,
    pub stop_pushes: usize,
    pub label: Option<(LonLat, String)>,
    pub lines: BTreeMap<String, Vec<LonLat>>,
    pub lines_removed: usize,
    pub camera: Option<(LonLat, f64)>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn vehicle_marker(&self, vehicle_id: &str) -> Option<&RecordedMarker> {
        self.markers
            .values()
            .find(|m| m.vehicle_id.as_deref() == Some(vehicle_id))
    }

    pub fn open_popups(&self) -> usize {
        self.popups.values().filter(|p| p.open).count()
    }

    pub fn highlight_markers(&self) -> usize {
        self.markers.values().filter(|m| m.vehicle_id.is_none()).count()
    }
}

impl MapSurface for RecordingSurface {
    fn add_marker(&mut self, vehicle_id: &str, at: LonLat, heading_deg: f64) -> MarkerHandle {
        let handle = MarkerHandle(self.handle());
        self.markers.insert(
            handle,
            RecordedMarker {
                vehicle_id: Some(vehicle_id.to_string()),
                at,
                heading_deg,
            },
        );
        self.markers_added += 1;
        handle
    }

    fn update_marker(&mut self, marker: MarkerHandle, at: LonLat, heading_deg: f64) {
        let m = self.markers.get_mut(&marker).expect("update of unknown marker");
        m.at = at;
        m.heading_deg = heading_deg;
        self.marker_moves += 1;
    }

    fn remove_marker(&mut self, marker: MarkerHandle) {
        assert!(self.markers.remove(&marker).is_some(), "removed unknown marker");
        assert!(
            self.popups.values().all(|p| p.marker != marker),
            "marker removed while its popup is still alive"
        );
        self.markers_removed += 1;
    }

    fn create_popup(&mut self, marker: MarkerHandle) -> PopupHandle {
        assert!(self.markers.contains_key(&marker));
        let handle = PopupHandle(self.handle());
        self.popups.insert(
            handle,
            RecordedPopup {
                marker,
                open: false,
                at: None,
                rows: Vec::new(),
            },
        );
        self.popups_created += 1;
        handle
    }

    fn set_popup_content(&mut self, popup: PopupHandle, rows: &[PopupRow]) {
        let p = self.popups.get_mut(&popup).expect("content for unknown popup");
        p.rows = rows.iter().map(ToString::to_string).collect();
        self.popup_content_sets += 1;
    }

    fn open_popup(&mut self, popup: PopupHandle, at: LonLat) {
        let p = self.popups.get_mut(&popup).expect("open of unknown popup");
        assert!(!p.open, "popup opened twice");
        p.open = true;
        p.at = Some(at);
        self.popup_opens += 1;
    }

    fn move_popup(&mut self, popup: PopupHandle, at: LonLat) {
        let p = self.popups.get_mut(&popup).expect("move of unknown popup");
        assert!(p.open, "moved a closed popup");
        p.at = Some(at);
    }

    fn close_popup(&mut self, popup: PopupHandle) {
        let p = self.popups.get_mut(&popup).expect("close of unknown popup");
        assert!(p.open, "closed a closed popup");
        p.open = false;
        self.popup_closes += 1;
    }

    fn release_popup(&mut self, popup: PopupHandle) {
        let p = self.popups.remove(&popup).expect("release of unknown popup");
        assert!(!p.open, "released an open popup");
        self.popups_released += 1;
    }

    fn set_stop_features(&mut self, features: &[StopFeature], _options: &ClusterOptions) {
        self.stop_features = features.to_vec();
        self.stop_pushes += 1;
    }

    fn show_label(&mut self, at: LonLat, text: &str) {
        self.label = Some((at, text.to_string()));
    }

    fn add_line_overlay(&mut self, overlay_id: &str, points: &[LonLat]) {
        assert!(
            self.lines.insert(overlay_id.to_string(), points.to_vec()).is_none(),
            "overlay {overlay_id} drawn twice"
        );
    }

    fn remove_line_overlay(&mut self, overlay_id: &str) {
        self.lines.remove(overlay_id);
        self.lines_removed += 1;
    }

    fn fly_to(&mut self, center: LonLat, zoom: f64) {
        self.camera = Some((center, zoom));
    }

    fn add_highlight_marker(&mut self, at: LonLat) -> MarkerHandle {
        let handle = MarkerHandle(self.handle());
        self.markers.insert(
            handle,
            RecordedMarker {
                vehicle_id: None,
                at,
                heading_deg: 0.0,
            },
        );
        handle
    }
}
