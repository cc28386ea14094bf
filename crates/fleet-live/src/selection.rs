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

//! The set of entities the operator currently has selected.
//!
//! Each category keeps its own revision counter so renderers can tell which
//! overlays need to be re-derived after a change.

use std::collections::{BTreeMap, BTreeSet};

use crate::protocol::VehicleId;
use crate::routes::Direction;

/// Outbound/inbound toggles for one route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionToggle {
    pub outbound: bool,
    pub inbound: bool,
}

impl DirectionToggle {
    #[must_use]
    pub fn get(self, direction: Direction) -> bool {
        match direction {
            Direction::Outbound => self.outbound,
            Direction::Inbound => self.inbound,
        }
    }

    fn set(&mut self, direction: Direction, on: bool) {
        match direction {
            Direction::Outbound => self.outbound = on,
            Direction::Inbound => self.inbound = on,
        }
    }

    fn any(self) -> bool {
        self.outbound || self.inbound
    }
}

/// Selected vehicles, stops and route directions.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    vehicle_ids: BTreeSet<VehicleId>,
    stop_ids: BTreeSet<String>,
    routes: BTreeMap<String, DirectionToggle>,
    vehicle_revision: u64,
    stop_revision: u64,
    route_revision: u64,
}

impl SelectionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Vehicles

    #[must_use]
    pub fn contains_vehicle(&self, id: &str) -> bool {
        self.vehicle_ids.contains(id)
    }

    pub fn vehicle_ids(&self) -> impl Iterator<Item = &VehicleId> {
        self.vehicle_ids.iter()
    }

    pub fn toggle_vehicle(&mut self, id: &str) {
        if !self.vehicle_ids.remove(id) {
            self.vehicle_ids.insert(id.to_string());
        }
        self.vehicle_revision += 1;
    }

    pub fn set_vehicles<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<VehicleId>,
    {
        self.vehicle_ids = ids.into_iter().map(Into::into).collect();
        self.vehicle_revision += 1;
    }

    pub fn clear_vehicles(&mut self) {
        self.vehicle_ids.clear();
        self.vehicle_revision += 1;
    }

    // Stops

    #[must_use]
    pub fn contains_stop(&self, id: &str) -> bool {
        self.stop_ids.contains(id)
    }

    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.stop_ids.len()
    }

    pub fn toggle_stop(&mut self, id: &str) {
        if !self.stop_ids.remove(id) {
            self.stop_ids.insert(id.to_string());
        }
        self.stop_revision += 1;
    }

    pub fn set_stops<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_ids = ids.into_iter().map(Into::into).collect();
        self.stop_revision += 1;
    }

    pub fn clear_stops(&mut self) {
        self.stop_ids.clear();
        self.stop_revision += 1;
    }

    // Routes

    #[must_use]
    pub fn route_direction(&self, route_id: &str, direction: Direction) -> bool {
        self.routes
            .get(route_id)
            .is_some_and(|toggle| toggle.get(direction))
    }

    pub fn set_route_direction(&mut self, route_id: &str, direction: Direction, on: bool) {
        let toggle = self.routes.entry(route_id.to_string()).or_default();
        toggle.set(direction, on);
        if !toggle.any() {
            self.routes.remove(route_id);
        }
        self.route_revision += 1;
    }

    pub fn toggle_route_direction(&mut self, route_id: &str, direction: Direction) {
        let on = !self.route_direction(route_id, direction);
        self.set_route_direction(route_id, direction, on);
    }

    pub fn clear_routes(&mut self) {
        self.routes.clear();
        self.route_revision += 1;
    }

    /// Every selected (route, direction) pair in stable order.
    #[must_use]
    pub fn route_pairs(&self) -> Vec<(String, Direction)> {
        self.routes
            .iter()
            .flat_map(|(route_id, toggle)| {
                Direction::ALL
                    .into_iter()
                    .filter(move |d| toggle.get(*d))
                    .map(move |d| (route_id.clone(), d))
            })
            .collect()
    }

    /// Route ids with at least one direction selected.
    pub fn route_ids(&self) -> impl Iterator<Item = &String> {
        self.routes.keys()
    }

    #[must_use]
    pub fn vehicle_revision(&self) -> u64 {
        self.vehicle_revision
    }

    #[must_use]
    pub fn stop_revision(&self) -> u64 {
        self.stop_revision
    }

    #[must_use]
    pub fn route_revision(&self) -> u64 {
        self.route_revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_vehicle() {
        let mut selection = SelectionSet::new();
        selection.toggle_vehicle("V1");
        assert!(selection.contains_vehicle("V1"));
        selection.toggle_vehicle("V1");
        assert!(!selection.contains_vehicle("V1"));
        assert_eq!(selection.vehicle_revision(), 2);
        assert_eq!(selection.stop_revision(), 0);
    }

    #[test]
    fn test_set_and_clear_stops() {
        let mut selection = SelectionSet::new();
        selection.set_stops(["10", "11", "12"]);
        assert_eq!(selection.stop_count(), 3);
        selection.toggle_stop("11");
        assert!(!selection.contains_stop("11"));
        selection.clear_stops();
        assert_eq!(selection.stop_count(), 0);
        assert_eq!(selection.stop_revision(), 3);
    }

    #[test]
    fn test_route_pairs() {
        let mut selection = SelectionSet::new();
        selection.set_route_direction("285", Direction::Inbound, true);
        selection.set_route_direction("12", Direction::Outbound, true);
        selection.set_route_direction("12", Direction::Inbound, true);

        assert_eq!(
            selection.route_pairs(),
            vec![
                ("12".to_string(), Direction::Outbound),
                ("12".to_string(), Direction::Inbound),
                ("285".to_string(), Direction::Inbound),
            ]
        );

        selection.toggle_route_direction("285", Direction::Inbound);
        assert_eq!(selection.route_ids().count(), 1);
        assert_eq!(selection.route_revision(), 4);
    }
}
