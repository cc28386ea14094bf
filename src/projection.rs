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

//! Web Mercator projection and the map viewport.

use fleet_live::LonLat;

/// Pixel size of one tile at integer zoom.
pub const TILE_SIZE: f64 = 256.0;

/// Zoom range the viewport allows.
pub const MIN_ZOOM: f64 = 3.0;
pub const MAX_ZOOM: f64 = 19.0;

/// Largest latitude Web Mercator can represent.
const MAX_LATITUDE: f64 = 85.051_128_78;

/// Web Mercator projection utilities
#[derive(Debug)]
pub struct WebMercator;

impl WebMercator {
    /// Convert latitude to Web Mercator Y in tile units at `zoom`.
    #[must_use]
    pub fn lat_to_y(lat: f64, zoom: f64) -> f64 {
        let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let n = zoom.exp2();
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0;
        y * n
    }

    /// Convert longitude to Web Mercator X in tile units at `zoom`.
    #[must_use]
    pub fn lon_to_x(lon: f64, zoom: f64) -> f64 {
        let n = zoom.exp2();
        ((lon + 180.0) / 360.0) * n
    }

    /// Convert tile units back to latitude
    #[must_use]
    pub fn y_to_lat(y: f64, zoom: f64) -> f64 {
        let n = zoom.exp2();
        let lat_rad = (std::f64::consts::PI * (1.0 - 2.0 * y / n)).sinh().atan();
        lat_rad.to_degrees()
    }

    /// Convert tile units back to longitude
    #[must_use]
    pub fn x_to_lon(x: f64, zoom: f64) -> f64 {
        let n = zoom.exp2();
        x / n * 360.0 - 180.0
    }

    /// Global pixel coordinates of `p` at `zoom`.
    #[must_use]
    pub fn to_world(p: LonLat, zoom: f64) -> (f64, f64) {
        (
            Self::lon_to_x(p.lon, zoom) * TILE_SIZE,
            Self::lat_to_y(p.lat, zoom) * TILE_SIZE,
        )
    }
}

/// Visible part of the map: center, zoom and screen rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub center: LonLat,
    pub zoom: f64,
    pub rect: egui::Rect,
}

impl Viewport {
    #[must_use]
    pub fn new(center: LonLat, zoom: f64) -> Self {
        Self {
            center,
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            rect: egui::Rect::from_min_size(egui::Pos2::ZERO, egui::vec2(800.0, 600.0)),
        }
    }

    /// Screen position of a coordinate.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, reason = "screen pixels fit in f32")]
    pub fn to_screen(&self, p: LonLat) -> egui::Pos2 {
        let (x, y) = WebMercator::to_world(p, self.zoom);
        let (cx, cy) = WebMercator::to_world(self.center, self.zoom);
        let c = self.rect.center();
        egui::pos2(c.x + (x - cx) as f32, c.y + (y - cy) as f32)
    }

    /// Coordinate under a screen position.
    #[must_use]
    pub fn from_screen(&self, pos: egui::Pos2) -> LonLat {
        let (cx, cy) = WebMercator::to_world(self.center, self.zoom);
        let c = self.rect.center();
        let x = (cx + f64::from(pos.x - c.x)) / TILE_SIZE;
        let y = (cy + f64::from(pos.y - c.y)) / TILE_SIZE;
        LonLat::new(
            WebMercator::x_to_lon(x, self.zoom),
            WebMercator::y_to_lat(y, self.zoom),
        )
    }

    /// Move the map by a screen-space drag.
    pub fn pan(&mut self, delta: egui::Vec2) {
        let c = self.rect.center();
        self.center = self.from_screen(c - delta);
    }

    /// Zoom by `delta` levels keeping the coordinate under `anchor` fixed.
    pub fn zoom_by(&mut self, delta: f64, anchor: egui::Pos2) {
        let before = self.from_screen(anchor);
        self.zoom = (self.zoom + delta).clamp(MIN_ZOOM, MAX_ZOOM);
        let after = self.to_screen(before);
        self.pan(anchor - after);
    }

    pub fn fly_to(&mut self, center: LonLat, zoom: f64) {
        self.center = center;
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }
}
