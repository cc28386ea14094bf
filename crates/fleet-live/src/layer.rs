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

//! Vehicle marker lifecycle.
//!
//! [`VehicleLayer`] reconciles the markers on the map against each incoming
//! snapshot and the current vehicle selection. It is the single owner of all
//! per-vehicle state: one [`MarkerRecord`] per id holds the marker handle, the
//! popup, the in-flight animation and the last heading/timestamp.
//!
//! Per id the lifecycle is:
//! ```text
//! ABSENT -> CREATED -> ANIMATING <-> SETTLED -> REMOVED
//! ```

use std::collections::HashMap;
use std::time::Instant;

use log::debug;

use crate::animation::{AnimationTask, AnimationTuning, FrameQueue, Pose};
use crate::geo::normalize_heading;
use crate::popup::{render_rows, FieldVisibility, PopupRow, PopupState, VehicleInfo};
use crate::protocol::{Snapshot, VehicleId, VehiclePosition};
use crate::selection::SelectionSet;
use crate::surface::{MapSurface, MarkerHandle};

/// Lifecycle state of one vehicle id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    /// No marker exists (never created, or removed).
    Absent,
    /// Placed at its first position, never animated.
    Created,
    /// Gliding towards a target.
    Animating,
    /// At rest on its last target.
    Settled,
}

/// Everything the layer owns for one vehicle.
#[derive(Debug)]
pub struct MarkerRecord {
    marker: MarkerHandle,
    pose: Pose,
    popup: PopupState,
    rendered_rows: Vec<PopupRow>,
    task: Option<AnimationTask>,
    last_heading: f64,
    last_ts: Option<i64>,
    latest: VehiclePosition,
    animated: bool,
}

impl MarkerRecord {
    /// Pose currently drawn on the map.
    #[must_use]
    pub fn pose(&self) -> Pose {
        self.pose
    }

    #[must_use]
    pub fn popup(&self) -> PopupState {
        self.popup
    }

    /// Rows last pushed to the popup.
    #[must_use]
    pub fn rendered_rows(&self) -> &[PopupRow] {
        &self.rendered_rows
    }

    #[must_use]
    pub fn task(&self) -> Option<&AnimationTask> {
        self.task.as_ref()
    }

    #[must_use]
    pub fn last_ts(&self) -> Option<i64> {
        self.last_ts
    }

    #[must_use]
    pub fn latest(&self) -> &VehiclePosition {
        &self.latest
    }

    fn state(&self) -> MarkerState {
        match (&self.task, self.animated) {
            (Some(_), _) => MarkerState::Animating,
            (None, true) => MarkerState::Settled,
            (None, false) => MarkerState::Created,
        }
    }
}

/// Running totals of surface effects, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    pub markers_created: u64,
    pub markers_removed: u64,
    pub tasks_started: u64,
    pub frames_applied: u64,
    pub popups_created: u64,
}

/// Owns every vehicle marker and its animation.
#[derive(Debug, Default)]
pub struct VehicleLayer {
    records: HashMap<VehicleId, MarkerRecord>,
    frames: FrameQueue,
    tuning: AnimationTuning,
    visibility: FieldVisibility,
    stats: LayerStats,
}

impl VehicleLayer {
    #[must_use]
    pub fn new(tuning: AnimationTuning, visibility: FieldVisibility) -> Self {
        Self {
            records: HashMap::new(),
            frames: FrameQueue::new(),
            tuning,
            visibility,
            stats: LayerStats::default(),
        }
    }

    /// Reconcile markers against a snapshot.
    ///
    /// Selected ids with a usable record are created or retargeted. Ids
    /// present with a malformed record keep their rendered pose. Every
    /// marker whose id is missing from the snapshot, or no longer selected,
    /// is removed.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &Snapshot,
        selection: &SelectionSet,
        surface: &mut dyn MapSurface,
        now: Instant,
    ) {
        for (id, position) in &snapshot.positions {
            if !selection.contains_vehicle(id) {
                continue;
            }
            if self.records.contains_key(id) {
                self.update(id, position, surface, now);
            } else {
                self.create(id, position, surface);
            }
        }

        let stale: Vec<VehicleId> = self
            .records
            .keys()
            .filter(|id| !snapshot.contains(id) || !selection.contains_vehicle(id))
            .cloned()
            .collect();
        for id in stale {
            self.remove(&id, surface);
        }
    }

    /// Drop markers for ids that left the selection, without waiting for the
    /// live stream to catch up.
    pub fn sweep_selection(&mut self, selection: &SelectionSet, surface: &mut dyn MapSurface) {
        let stale: Vec<VehicleId> = self
            .records
            .keys()
            .filter(|id| !selection.contains_vehicle(id))
            .cloned()
            .collect();
        for id in stale {
            self.remove(&id, surface);
        }
    }

    /// Advance every pending animation by one display frame.
    ///
    /// Returns true while frames remain queued, so the host knows to keep
    /// requesting repaints.
    pub fn run_frame(&mut self, now: Instant, surface: &mut dyn MapSurface) -> bool {
        self.frames.prune_cancelled();
        for request in self.frames.take() {
            let Some(record) = self.records.get_mut(&request.vehicle_id) else {
                continue;
            };
            let Some(task) = record.task.as_ref() else {
                continue;
            };

            let frame = task.sample(now);
            record.pose = frame.pose;
            surface.update_marker(record.marker, frame.pose.position, frame.pose.heading_deg);
            if let PopupState::Shown(popup) = record.popup {
                surface.move_popup(popup, frame.pose.position);
            }
            self.stats.frames_applied += 1;

            if frame.finished {
                record.task = None;
            } else {
                self.frames.request(request.vehicle_id, request.token);
            }
        }

        !self.frames.is_empty()
    }

    /// Swap the field configuration and re-evaluate every popup.
    pub fn set_field_visibility(
        &mut self,
        visibility: FieldVisibility,
        surface: &mut dyn MapSurface,
    ) {
        if visibility == self.visibility {
            return;
        }
        self.visibility = visibility;
        for (id, record) in &mut self.records {
            refresh_popup(id, record, &self.visibility, surface, &mut self.stats);
        }
    }

    #[must_use]
    pub fn field_visibility(&self) -> &FieldVisibility {
        &self.visibility
    }

    pub fn set_tuning(&mut self, tuning: AnimationTuning) {
        self.tuning = tuning;
    }

    /// Remove every marker and release everything attached to it.
    pub fn clear(&mut self, surface: &mut dyn MapSurface) {
        let ids: Vec<VehicleId> = self.records.keys().cloned().collect();
        for id in ids {
            self.remove(&id, surface);
        }
    }

    #[must_use]
    pub fn state(&self, id: &str) -> MarkerState {
        self.records
            .get(id)
            .map_or(MarkerState::Absent, MarkerRecord::state)
    }

    #[must_use]
    pub fn record(&self, id: &str) -> Option<&MarkerRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = (&VehicleId, &MarkerRecord)> {
        self.records.iter()
    }

    #[must_use]
    pub fn marker_count(&self) -> usize {
        self.records.len()
    }

    /// Tasks that are running and not cancelled.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.records
            .values()
            .filter_map(|r| r.task.as_ref())
            .filter(|t| !t.is_cancelled())
            .count()
    }

    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn has_pending_frames_for(&self, id: &str) -> bool {
        self.frames.references(id)
    }

    #[must_use]
    pub fn stats(&self) -> LayerStats {
        self.stats
    }

    fn create(&mut self, id: &str, position: &VehiclePosition, surface: &mut dyn MapSurface) {
        let heading = normalize_heading(position.heading_deg.unwrap_or(0.0));
        let marker = surface.add_marker(id, position.position, heading);
        self.stats.markers_created += 1;
        debug!("Created marker for vehicle {}", id);

        let mut record = MarkerRecord {
            marker,
            pose: Pose {
                position: position.position,
                heading_deg: heading,
            },
            popup: PopupState::NotCreated,
            rendered_rows: Vec::new(),
            task: None,
            last_heading: heading,
            last_ts: Some(position.ts),
            latest: position.clone(),
            animated: false,
        };
        refresh_popup(id, &mut record, &self.visibility, surface, &mut self.stats);
        self.records.insert(id.to_string(), record);
    }

    fn update(
        &mut self,
        id: &str,
        position: &VehiclePosition,
        surface: &mut dyn MapSurface,
        now: Instant,
    ) {
        let Some(record) = self.records.get_mut(id) else {
            return;
        };

        let to_heading = position
            .heading_deg
            .map_or(record.last_heading, normalize_heading);
        let target = Pose {
            position: position.position,
            heading_deg: to_heading,
        };

        // Retarget only when the destination actually moved; replaying a
        // snapshot must not start new work.
        let retarget = match &record.task {
            Some(task) => task.to != target,
            None => record.pose != target,
        };

        if retarget {
            let estimated =
                self.tuning
                    .estimated_seconds(record.pose.position, target.position, position.speed_kph);
            let gap = self.tuning.gap_seconds(record.last_ts, position.ts);
            let duration = self.tuning.plan_duration(estimated, gap);

            if let Some(previous) = record.task.take() {
                previous.cancel();
            }
            self.frames.purge(id);

            let task = AnimationTask::new(record.pose, target, now, duration);
            self.frames.request(id.to_string(), task.token());
            record.task = Some(task);
            record.animated = true;
            self.stats.tasks_started += 1;
        }

        record.last_heading = to_heading;
        record.last_ts = Some(position.ts);
        if record.latest != *position {
            record.latest = position.clone();
        }

        refresh_popup(id, record, &self.visibility, surface, &mut self.stats);
    }

    fn remove(&mut self, id: &str, surface: &mut dyn MapSurface) {
        let Some(record) = self.records.remove(id) else {
            return;
        };

        if let Some(task) = &record.task {
            task.cancel();
        }
        self.frames.purge(id);

        match record.popup {
            PopupState::Shown(popup) => {
                surface.close_popup(popup);
                surface.release_popup(popup);
            }
            PopupState::Hidden(popup) => surface.release_popup(popup),
            PopupState::NotCreated => {}
        }

        surface.remove_marker(record.marker);
        self.stats.markers_removed += 1;
        debug!("Removed marker for vehicle {}", id);
    }
}

/// Bring one popup in line with the record and the field configuration.
///
/// The popup is created on first use and afterwards only opened or closed.
fn refresh_popup(
    id: &str,
    record: &mut MarkerRecord,
    visibility: &FieldVisibility,
    surface: &mut dyn MapSurface,
    stats: &mut LayerStats,
) {
    let info = VehicleInfo::derive(id, Some(&record.latest));
    let rows = render_rows(&info, visibility);

    let handle = match record.popup {
        PopupState::NotCreated => {
            let handle = surface.create_popup(record.marker);
            stats.popups_created += 1;
            record.popup = PopupState::Hidden(handle);
            handle
        }
        PopupState::Hidden(handle) | PopupState::Shown(handle) => handle,
    };

    if rows.is_empty() {
        if record.popup.is_shown() {
            surface.close_popup(handle);
            record.popup = PopupState::Hidden(handle);
        }
        record.rendered_rows.clear();
        return;
    }

    if rows != record.rendered_rows {
        surface.set_popup_content(handle, &rows);
        record.rendered_rows = rows;
    }

    if !record.popup.is_shown() {
        surface.open_popup(handle, record.pose.position);
        record.popup = PopupState::Shown(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::LonLat;
    use crate::popup::FieldKey;
    use crate::protocol::SnapshotParser;
    use crate::testing::RecordingSurface;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn snapshot(positions: Vec<VehiclePosition>) -> Snapshot {
        Snapshot::from_positions(Utc.timestamp_millis_opt(0).unwrap(), positions)
    }

    fn selected(ids: &[&str]) -> SelectionSet {
        let mut selection = SelectionSet::new();
        selection.set_vehicles(ids.iter().copied());
        selection
    }

    fn layer() -> VehicleLayer {
        VehicleLayer::new(AnimationTuning::default(), FieldVisibility::none())
    }

    fn v1(lon: f64, ts: i64) -> VehiclePosition {
        VehiclePosition::new("V1", LonLat::new(lon, 41.0), ts)
    }

    #[test]
    fn test_first_position_places_without_animation() {
        let mut surface = RecordingSurface::new();
        let mut layer = layer();
        let t0 = Instant::now();

        layer.apply_snapshot(&snapshot(vec![v1(29.0, 0)]), &selected(&["V1"]), &mut surface, t0);

        assert_eq!(layer.state("V1"), MarkerState::Created);
        assert_eq!(layer.active_tasks(), 0);
        assert_eq!(layer.pending_frames(), 0);
        let marker = surface.vehicle_marker("V1").unwrap();
        assert_eq!(marker.at, LonLat::new(29.0, 41.0));
        assert!(marker.heading_deg.abs() < f64::EPSILON);
        // popup exists but stays closed with every field hidden
        assert_eq!(surface.popups_created, 1);
        assert_eq!(surface.open_popups(), 0);
    }

    #[test]
    fn test_unselected_ids_are_ignored() {
        let mut surface = RecordingSurface::new();
        let mut layer = layer();
        layer.apply_snapshot(
            &snapshot(vec![v1(29.0, 0)]),
            &selected(&["V2"]),
            &mut surface,
            Instant::now(),
        );
        assert_eq!(layer.marker_count(), 0);
        assert_eq!(surface.markers_added, 0);
    }

    #[test]
    fn test_update_animates_to_target_with_ceiling_duration() {
        let mut surface = RecordingSurface::new();
        let mut layer = layer();
        let selection = selected(&["V1"]);
        let t0 = Instant::now();

        layer.apply_snapshot(&snapshot(vec![v1(29.0, 0)]), &selection, &mut surface, t0);
        let update = v1(29.001, 1_000).with_speed(36.0);
        layer.apply_snapshot(&snapshot(vec![update]), &selection, &mut surface, t0);

        assert_eq!(layer.state("V1"), MarkerState::Animating);
        let task = layer.record("V1").unwrap().task().unwrap();
        assert_eq!(task.duration, Duration::from_millis(1400));
        assert_eq!(task.from.position, LonLat::new(29.0, 41.0));

        // halfway: on the segment, strictly between endpoints
        assert!(layer.run_frame(t0 + Duration::from_millis(700), &mut surface));
        let lon = surface.vehicle_marker("V1").unwrap().at.lon;
        assert!(lon > 29.0 && lon < 29.001);

        assert!(!layer.run_frame(t0 + Duration::from_millis(1400), &mut surface));
        assert_eq!(layer.state("V1"), MarkerState::Settled);
        assert_eq!(surface.vehicle_marker("V1").unwrap().at, LonLat::new(29.001, 41.0));
        assert_eq!(layer.pending_frames(), 0);
    }

    #[test]
    fn test_replaying_snapshot_is_idempotent() {
        let mut surface = RecordingSurface::new();
        let mut layer = VehicleLayer::new(
            AnimationTuning::default(),
            FieldVisibility::none().with(FieldKey::Plate, true),
        );
        let selection = selected(&["V1", "V2"]);
        let t0 = Instant::now();
        let snap = snapshot(vec![
            v1(29.0, 0).with_field("plate", "35 A 1"),
            VehiclePosition::new("V2", LonLat::new(27.0, 38.0), 0),
        ]);

        layer.apply_snapshot(&snap, &selection, &mut surface, t0);
        let before = layer.stats();
        let content_sets = surface.popup_content_sets;
        let opens = surface.popup_opens;

        layer.apply_snapshot(&snap, &selection, &mut surface, t0 + Duration::from_secs(1));

        let after = layer.stats();
        assert_eq!(after.markers_created, before.markers_created);
        assert_eq!(after.markers_removed, before.markers_removed);
        assert_eq!(after.tasks_started, before.tasks_started);
        assert_eq!(after.popups_created, before.popups_created);
        assert_eq!(surface.popup_content_sets, content_sets);
        assert_eq!(surface.popup_opens, opens);
        assert_eq!(layer.pending_frames(), 0);
    }

    #[test]
    fn test_replay_mid_animation_keeps_single_task() {
        let mut surface = RecordingSurface::new();
        let mut layer = layer();
        let selection = selected(&["V1"]);
        let t0 = Instant::now();

        layer.apply_snapshot(&snapshot(vec![v1(29.0, 0)]), &selection, &mut surface, t0);
        let moving = snapshot(vec![v1(29.001, 1_000)]);
        layer.apply_snapshot(&moving, &selection, &mut surface, t0);
        layer.apply_snapshot(&moving, &selection, &mut surface, t0 + Duration::from_millis(100));

        assert_eq!(layer.stats().tasks_started, 1);
        assert_eq!(layer.active_tasks(), 1);
        assert_eq!(layer.pending_frames(), 1);
    }

    #[test]
    fn test_second_update_retargets_single_task() {
        let mut surface = RecordingSurface::new();
        let mut layer = layer();
        let selection = selected(&["V1"]);
        let t0 = Instant::now();

        layer.apply_snapshot(&snapshot(vec![v1(29.0, 0)]), &selection, &mut surface, t0);
        layer.apply_snapshot(&snapshot(vec![v1(29.001, 1_000)]), &selection, &mut surface, t0);
        let first_token = layer.record("V1").unwrap().task().unwrap().token();

        layer.run_frame(t0 + Duration::from_millis(200), &mut surface);
        let rendered = layer.record("V1").unwrap().pose();

        layer.apply_snapshot(
            &snapshot(vec![v1(29.002, 2_000)]),
            &selection,
            &mut surface,
            t0 + Duration::from_millis(200),
        );

        assert!(first_token.is_cancelled());
        assert_eq!(layer.active_tasks(), 1);
        assert_eq!(layer.pending_frames(), 1);
        let task = layer.record("V1").unwrap().task().unwrap();
        assert_eq!(task.to.position, LonLat::new(29.002, 41.0));
        // starts from the rendered pose, not the abandoned target
        assert_eq!(task.from, rendered);
    }

    #[test]
    fn test_removal_releases_everything() {
        let mut surface = RecordingSurface::new();
        let mut layer = VehicleLayer::new(AnimationTuning::default(), FieldVisibility::all());
        let selection = selected(&["V1", "V2"]);
        let t0 = Instant::now();

        layer.apply_snapshot(
            &snapshot(vec![v1(29.0, 0), VehiclePosition::new("V2", LonLat::new(27.0, 38.0), 0)]),
            &selection,
            &mut surface,
            t0,
        );
        layer.apply_snapshot(
            &snapshot(vec![v1(29.001, 1_000), VehiclePosition::new("V2", LonLat::new(27.0, 38.0), 0)]),
            &selection,
            &mut surface,
            t0,
        );
        assert_eq!(surface.open_popups(), 2);
        let token = layer.record("V1").unwrap().task().unwrap().token();

        layer.apply_snapshot(
            &snapshot(vec![VehiclePosition::new("V2", LonLat::new(27.0, 38.0), 0)]),
            &selection,
            &mut surface,
            t0,
        );

        assert_eq!(layer.state("V1"), MarkerState::Absent);
        assert!(token.is_cancelled());
        assert!(!layer.has_pending_frames_for("V1"));
        assert!(surface.vehicle_marker("V1").is_none());
        assert_eq!(surface.open_popups(), 1);
        assert_eq!(surface.popups.len(), 1);

        // a frame after removal touches nothing
        let moves = surface.marker_moves;
        layer.run_frame(t0 + Duration::from_millis(500), &mut surface);
        assert_eq!(surface.marker_moves, moves);
    }

    #[test]
    fn test_selection_sweep_removes_without_snapshot() {
        let mut surface = RecordingSurface::new();
        let mut layer = layer();
        let mut selection = selected(&["V1"]);
        layer.apply_snapshot(&snapshot(vec![v1(29.0, 0)]), &selection, &mut surface, Instant::now());

        selection.toggle_vehicle("V1");
        layer.sweep_selection(&selection, &mut surface);

        assert_eq!(layer.marker_count(), 0);
        assert!(surface.markers.is_empty());
        assert!(surface.popups.is_empty());
    }

    #[test]
    fn test_malformed_record_keeps_rendered_position() {
        let mut surface = RecordingSurface::new();
        let mut layer = layer();
        let selection = selected(&["V1"]);
        let t0 = Instant::now();
        layer.apply_snapshot(&snapshot(vec![v1(29.0, 0)]), &selection, &mut surface, t0);

        let mut broken = snapshot(vec![]);
        broken.malformed.insert("V1".to_string());
        layer.apply_snapshot(&broken, &selection, &mut surface, t0);

        assert_eq!(layer.state("V1"), MarkerState::Created);
        assert_eq!(surface.vehicle_marker("V1").unwrap().at, LonLat::new(29.0, 41.0));
        assert_eq!(layer.active_tasks(), 0);
    }

    #[test]
    fn test_heading_defaults() {
        let mut surface = RecordingSurface::new();
        let mut layer = layer();
        let selection = selected(&["V1"]);
        let t0 = Instant::now();

        layer.apply_snapshot(
            &snapshot(vec![v1(29.0, 0).with_heading(-90.0)]),
            &selection,
            &mut surface,
            t0,
        );
        assert!((layer.record("V1").unwrap().pose().heading_deg - 270.0).abs() < 1e-9);

        // no heading on update: keep facing the last known heading
        layer.apply_snapshot(&snapshot(vec![v1(29.001, 1_000)]), &selection, &mut surface, t0);
        let task = layer.record("V1").unwrap().task().unwrap();
        assert!((task.to.heading_deg - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_popup_suppression_and_reopen() {
        let mut surface = RecordingSurface::new();
        let mut layer = layer();
        let selection = selected(&["V1"]);
        let t0 = Instant::now();
        layer.apply_snapshot(
            &snapshot(vec![v1(29.0, 0).with_field("plate", "35 A 1")]),
            &selection,
            &mut surface,
            t0,
        );
        assert_eq!(surface.open_popups(), 0);

        layer.set_field_visibility(FieldVisibility::none().with(FieldKey::Plate, true), &mut surface);
        assert_eq!(surface.open_popups(), 1);
        let popup = surface.popups.values().next().unwrap();
        assert_eq!(popup.rows, vec!["Plate - 35 A 1".to_string()]);

        layer.set_field_visibility(FieldVisibility::none(), &mut surface);
        assert_eq!(surface.open_popups(), 0);
        // hidden, not destroyed
        assert_eq!(surface.popups.len(), 1);
        assert_eq!(surface.popups_created, 1);

        layer.set_field_visibility(FieldVisibility::none().with(FieldKey::Plate, true), &mut surface);
        assert_eq!(surface.open_popups(), 1);
        assert_eq!(surface.popups_created, 1);
    }

    #[test]
    fn test_open_popup_travels_with_marker() {
        let mut surface = RecordingSurface::new();
        let mut layer = VehicleLayer::new(
            AnimationTuning::default(),
            FieldVisibility::none().with(FieldKey::VehicleId, true),
        );
        let selection = selected(&["V1"]);
        let t0 = Instant::now();
        layer.apply_snapshot(&snapshot(vec![v1(29.0, 0)]), &selection, &mut surface, t0);
        layer.apply_snapshot(&snapshot(vec![v1(29.001, 1_000)]), &selection, &mut surface, t0);

        layer.run_frame(t0 + Duration::from_millis(500), &mut surface);

        let marker_at = surface.vehicle_marker("V1").unwrap().at;
        let popup_at = surface.popups.values().next().unwrap().at.unwrap();
        assert_eq!(marker_at, popup_at);
    }

    #[test]
    fn test_cancelled_request_is_noop() {
        let mut surface = RecordingSurface::new();
        let mut layer = layer();
        let selection = selected(&["V1"]);
        let t0 = Instant::now();
        layer.apply_snapshot(&snapshot(vec![v1(29.0, 0)]), &selection, &mut surface, t0);
        layer.apply_snapshot(&snapshot(vec![v1(29.001, 1_000)]), &selection, &mut surface, t0);

        layer.record("V1").unwrap().task().unwrap().cancel();
        let moves = surface.marker_moves;
        layer.run_frame(t0 + Duration::from_millis(300), &mut surface);

        assert_eq!(surface.marker_moves, moves);
        assert_eq!(layer.pending_frames(), 0);
    }

    #[test]
    fn test_extreme_producer_timestamps_do_not_break_reconciliation() {
        let parser = SnapshotParser::new();
        let received = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let mut surface = RecordingSurface::new();
        let mut layer = layer();
        let selection = selected(&["V1"]);
        let t0 = Instant::now();

        let first = parser
            .parse_at(r#"{"V1":{"lon":29.0,"lat":41.0,"ts":-1e300}}"#, received)
            .unwrap()
            .unwrap();
        let second = parser
            .parse_at(r#"{"V1":{"lon":29.001,"lat":41.0,"ts":1000}}"#, received)
            .unwrap()
            .unwrap();
        layer.apply_snapshot(&first, &selection, &mut surface, t0);
        layer.apply_snapshot(&second, &selection, &mut surface, t0);

        let task = layer.record("V1").unwrap().task().unwrap();
        assert!(task.duration >= Duration::from_millis(250));
        assert!(task.duration <= Duration::from_millis(1400));

        // a saturated previous timestamp still yields a clamped gap
        layer.apply_snapshot(&snapshot(vec![v1(29.002, i64::MAX)]), &selection, &mut surface, t0);
        layer.apply_snapshot(&snapshot(vec![v1(29.003, i64::MIN)]), &selection, &mut surface, t0);
        assert_eq!(layer.active_tasks(), 1);
    }
}
