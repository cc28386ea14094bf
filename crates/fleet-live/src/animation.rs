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

//! Marker interpolation scheduling.
//!
//! A marker never snaps to a new position; it glides there over a duration
//! blended from the expected travel time and the gap between messages. Each
//! in-flight glide is an [`AnimationTask`] carrying a cancellation token, and
//! frame callbacks are queued in a [`FrameQueue`] that the host drains once
//! per display refresh.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::geo::{ease_in_out_cubic, haversine_meters, lerp_angle_deg, LonLat};
use crate::protocol::VehicleId;

/// Tuning constants for duration selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationTuning {
    /// Assumed speed when a record carries none.
    pub default_speed_kph: f64,
    /// Lower clamp of the inter-message gap in seconds.
    pub min_gap_secs: f64,
    /// Upper clamp of the inter-message gap in seconds.
    pub max_gap_secs: f64,
    /// Gap assumed when no previous timestamp exists.
    pub default_gap_secs: f64,
    /// Weight of the distance-based estimate; the gap gets `1 - weight`.
    pub distance_weight: f64,
    /// Shortest allowed animation.
    pub min_duration_ms: u64,
    /// Longest allowed animation.
    pub max_duration_ms: u64,
}

impl Default for AnimationTuning {
    fn default() -> Self {
        Self {
            default_speed_kph: 30.0,
            min_gap_secs: 0.2,
            max_gap_secs: 2.0,
            default_gap_secs: 1.0,
            distance_weight: 0.5,
            min_duration_ms: 250,
            max_duration_ms: 1400,
        }
    }
}

impl AnimationTuning {
    /// Seconds needed to cover `from` → `to` at the record's speed.
    #[must_use]
    pub fn estimated_seconds(&self, from: LonLat, to: LonLat, speed_kph: Option<f64>) -> f64 {
        let speed_mps = speed_kph.unwrap_or(self.default_speed_kph) * 1000.0 / 3600.0;
        if speed_mps > 0.0 {
            haversine_meters(from, to) / speed_mps
        } else {
            1.0
        }
    }

    /// Clamped seconds between two producer timestamps (milliseconds).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        reason = "the gap is clamped to a few seconds right after"
    )]
    pub fn gap_seconds(&self, previous_ts: Option<i64>, ts: i64) -> f64 {
        match previous_ts {
            Some(prev) => {
                let gap_ms = ts.saturating_sub(prev) as f64;
                (gap_ms / 1000.0).clamp(self.min_gap_secs, self.max_gap_secs)
            }
            None => self.default_gap_secs,
        }
    }

    /// Blend distance and gap estimates into a clamped duration.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        reason = "value is clamped to the configured millisecond bounds first"
    )]
    pub fn plan_duration(&self, estimated_secs: f64, gap_secs: f64) -> Duration {
        let weight = self.distance_weight.clamp(0.0, 1.0);
        let blended_ms = 1000.0 * (weight * estimated_secs + (1.0 - weight) * gap_secs);
        let ms = if blended_ms.is_finite() {
            blended_ms.clamp(self.min_duration_ms as f64, self.max_duration_ms as f64)
        } else {
            self.max_duration_ms as f64
        };
        Duration::from_millis(ms.round() as u64)
    }
}

/// A rendered marker pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: LonLat,
    pub heading_deg: f64,
}

/// One marker pose sampled from a task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub pose: Pose,
    pub finished: bool,
}

/// An in-flight interpolation between two poses.
#[derive(Debug, Clone)]
pub struct AnimationTask {
    pub from: Pose,
    pub to: Pose,
    pub started_at: Instant,
    pub duration: Duration,
    token: CancellationToken,
}

impl AnimationTask {
    #[must_use]
    pub fn new(from: Pose, to: Pose, started_at: Instant, duration: Duration) -> Self {
        Self {
            from,
            to,
            started_at,
            duration,
            token: CancellationToken::new(),
        }
    }

    /// Token the frame callbacks check before mutating anything.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Normalized progress in [0, 1].
    #[must_use]
    pub fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    /// Sample the eased pose at `now`. The final frame equals the target.
    #[must_use]
    pub fn sample(&self, now: Instant) -> Frame {
        let t = self.progress(now);
        if t >= 1.0 {
            return Frame {
                pose: self.to,
                finished: true,
            };
        }
        let k = ease_in_out_cubic(t);
        Frame {
            pose: Pose {
                position: self.from.position.lerp(self.to.position, k),
                heading_deg: lerp_angle_deg(self.from.heading_deg, self.to.heading_deg, k),
            },
            finished: false,
        }
    }
}

/// A queued "run again before the next paint" request.
#[derive(Debug, Clone)]
pub struct FrameRequest {
    pub vehicle_id: VehicleId,
    pub token: CancellationToken,
}

impl FrameRequest {
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }
}

/// Pending frame callbacks, drained once per display refresh.
#[derive(Debug, Default)]
pub struct FrameQueue {
    pending: Vec<FrameRequest>,
}

impl FrameQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, vehicle_id: VehicleId, token: CancellationToken) {
        self.pending.push(FrameRequest { vehicle_id, token });
    }

    /// Take every request queued so far. Requests made while handling them
    /// land in the next batch.
    pub fn take(&mut self) -> Vec<FrameRequest> {
        std::mem::take(&mut self.pending)
    }

    /// Drop every request for `vehicle_id`.
    pub fn purge(&mut self, vehicle_id: &str) {
        self.pending.retain(|r| r.vehicle_id != vehicle_id);
    }

    /// Drop requests whose task was cancelled.
    pub fn prune_cancelled(&mut self) {
        self.pending.retain(FrameRequest::is_live);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn references(&self, vehicle_id: &str) -> bool {
        self.pending.iter().any(|r| r.vehicle_id == vehicle_id)
    }
}
