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

//! The dashboard application: side panels, map canvas and the per-frame
//! driving of the map layers.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;
use fleet_live::{
    Direction, FieldKey, FieldVisibility, LiveFeed, MapController, RouteGeometry, RoutePattern,
    RouteSummary, SelectionSet, Snapshot, StopPage, StopRecord,
};
use log::{error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::api::{ApiClient, ApiError};
use crate::config::AppConfig;
use crate::projection::Viewport;
use crate::scene::Scene;

/// Repaint interval while nothing is animating.
const IDLE_REPAINT: Duration = Duration::from_millis(250);

/// Results of background REST calls, delivered to the UI thread.
#[derive(Debug)]
enum ApiEvent {
    Stops {
        search: String,
        page: u32,
        result: Result<StopPage, ApiError>,
    },
    StopIds(Result<Vec<String>, ApiError>),
    Routes(Result<Vec<RouteSummary>, ApiError>),
    RoutePoints {
        route_id: String,
        result: Result<Vec<RoutePattern>, ApiError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Vehicles,
    Stops,
    Routes,
    Popup,
}

/// Paged stop listing with search.
#[derive(Debug, Default)]
struct StopListing {
    records: Vec<StopRecord>,
    search: String,
    page: u32,
    has_more: bool,
    loading: bool,
}

impl StopListing {
    /// Merge a fetched page, keeping the first record per stop id.
    fn merge(&mut self, page: u32, fetched: StopPage) {
        self.has_more = !fetched.stops.is_empty();
        self.page = page;
        let mut seen: HashSet<String> = self.records.iter().map(|s| s.stop_id.clone()).collect();
        for stop in fetched.stops {
            if seen.insert(stop.stop_id.clone()) {
                self.records.push(stop);
            }
        }
    }

    fn reset(&mut self, search: String) {
        self.records.clear();
        self.search = search;
        self.page = 0;
        self.has_more = true;
    }
}

pub struct FleetApp {
    config: AppConfig,
    save_config: bool,
    runtime: Handle,
    feed: LiveFeed,
    api: Option<ApiClient>,
    api_tx: mpsc::UnboundedSender<ApiEvent>,
    api_rx: mpsc::UnboundedReceiver<ApiEvent>,
    controller: MapController,
    scene: Scene,
    viewport: Viewport,
    selection: SelectionSet,
    visibility: FieldVisibility,
    latest: Option<Arc<Snapshot>>,
    stops: StopListing,
    stop_search_input: String,
    routes: Vec<RouteSummary>,
    geometry: RouteGeometry,
    geometry_pending: BTreeSet<String>,
    feed_address_input: String,
    tab: Tab,
    status: Option<String>,
}

impl std::fmt::Debug for FleetApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetApp")
            .field("feed", &self.feed)
            .field("viewport", &self.viewport)
            .finish_non_exhaustive()
    }
}

impl FleetApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig, save_config: bool, runtime: Handle) -> Self {
        let feed = {
            let _guard = runtime.enter();
            let ctx = cc.egui_ctx.clone();
            LiveFeed::spawn_with_wake(config.feed_config(), move || ctx.request_repaint())
        };
        info!("Live feed connecting to {}", config.feed_address);

        let api = match ApiClient::new(&config.api_url) {
            Ok(api) => Some(api),
            Err(e) => {
                error!("REST client unavailable: {}", e);
                None
            }
        };
        let (api_tx, api_rx) = mpsc::unbounded_channel();

        cc.egui_ctx.set_visuals(if config.dark_mode {
            egui::Visuals::dark()
        } else {
            egui::Visuals::light()
        });

        let mut app = Self {
            controller: MapController::new(
                config.animation.clone(),
                config.popup_fields.clone(),
                config.clustering.clone(),
            ),
            visibility: config.popup_fields.clone(),
            viewport: Viewport::new(config.center(), config.default_zoom),
            feed_address_input: config.feed_address.clone(),
            config,
            save_config,
            runtime,
            feed,
            api,
            api_tx,
            api_rx,
            scene: Scene::new(),
            selection: SelectionSet::new(),
            latest: None,
            stops: StopListing::default(),
            stop_search_input: String::new(),
            routes: Vec::new(),
            geometry: RouteGeometry::new(),
            geometry_pending: BTreeSet::new(),
            tab: Tab::Vehicles,
            status: None,
        };

        app.request_stops(&cc.egui_ctx, String::new());
        app.request_routes(&cc.egui_ctx);
        app
    }

    fn persist(&self) {
        if !self.save_config {
            return;
        }
        if let Err(e) = self.config.save() {
            warn!("Failed to save configuration: {}", e);
        }
    }

    // REST plumbing

    fn spawn_api<F, Fut>(&self, ctx: &egui::Context, call: F)
    where
        F: FnOnce(ApiClient) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ApiEvent> + Send + 'static,
    {
        let Some(api) = self.api.clone() else {
            return;
        };
        let tx = self.api_tx.clone();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            let event = call(api).await;
            let _ = tx.send(event);
            ctx.request_repaint();
        });
    }

    fn request_stops(&mut self, ctx: &egui::Context, search: String) {
        if search != self.stops.search || self.stops.page == 0 {
            self.stops.reset(search.clone());
        }
        if self.stops.loading || !self.stops.has_more {
            return;
        }
        self.stops.loading = true;
        let page = self.stops.page + 1;
        self.spawn_api(ctx, move |api| async move {
            let result = api.stops(page, &search).await;
            ApiEvent::Stops {
                search,
                page,
                result,
            }
        });
    }

    fn request_stop_ids(&self, ctx: &egui::Context) {
        self.spawn_api(ctx, |api| async move { ApiEvent::StopIds(api.stop_ids().await) });
    }

    fn request_routes(&self, ctx: &egui::Context) {
        self.spawn_api(ctx, |api| async move { ApiEvent::Routes(api.routes().await) });
    }

    fn request_missing_geometry(&mut self, ctx: &egui::Context) {
        for route_id in MapController::missing_geometry(&self.selection, &self.geometry) {
            if !self.geometry_pending.insert(route_id.clone()) {
                continue;
            }
            self.spawn_api(ctx, move |api| async move {
                let result = api.route_points(&route_id).await;
                ApiEvent::RoutePoints { route_id, result }
            });
        }
    }

    fn poll_api(&mut self) {
        while let Ok(event) = self.api_rx.try_recv() {
            match event {
                ApiEvent::Stops {
                    search,
                    page,
                    result,
                } => {
                    if search != self.stops.search {
                        continue; // superseded by a newer search
                    }
                    self.stops.loading = false;
                    match result {
                        Ok(fetched) => {
                            self.stops.merge(page, fetched);
                            self.controller.on_stops_loaded(
                                &self.selection,
                                &self.stops.records,
                                &mut self.scene,
                            );
                        }
                        Err(e) => {
                            error!("Failed to load stops: {}", e);
                            self.status = Some("Stops could not be loaded".to_string());
                        }
                    }
                }
                ApiEvent::StopIds(Ok(ids)) => self.selection.set_stops(ids),
                ApiEvent::StopIds(Err(e)) => {
                    error!("Failed to load stop ids: {}", e);
                    let ids: Vec<String> =
                        self.stops.records.iter().map(|s| s.stop_id.clone()).collect();
                    self.selection.set_stops(ids);
                }
                ApiEvent::Routes(Ok(routes)) => {
                    info!("Loaded {} routes", routes.len());
                    self.routes = routes;
                }
                ApiEvent::Routes(Err(e)) => {
                    error!("Failed to load routes: {}", e);
                    self.status = Some("Routes could not be loaded".to_string());
                }
                ApiEvent::RoutePoints { route_id, result } => {
                    self.geometry_pending.remove(&route_id);
                    match result {
                        Ok(patterns) => {
                            self.geometry.insert(route_id, patterns);
                            self.controller.on_geometry_loaded(
                                &self.selection,
                                &self.geometry,
                                &mut self.scene,
                            );
                        }
                        Err(e) => error!("Route {} could not be drawn: {}", route_id, e),
                    }
                }
            }
        }
    }

    // Panels

    fn draw_top_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let state = self.feed.connection_state();
            let (color, text) = match &state {
                fleet_live::ConnectionState::Connected => {
                    (egui::Color32::from_rgb(100, 255, 100), "● LIVE".to_string())
                }
                fleet_live::ConnectionState::Connecting => {
                    (egui::Color32::from_rgb(255, 200, 50), "● CONNECTING".to_string())
                }
                fleet_live::ConnectionState::Disconnected => {
                    (egui::Color32::from_rgb(150, 150, 150), "○ OFFLINE".to_string())
                }
                fleet_live::ConnectionState::Error(e) => {
                    (egui::Color32::from_rgb(255, 80, 80), format!("○ {e}"))
                }
            };
            ui.label(egui::RichText::new(text).color(color).monospace());

            if let Some(snapshot) = &self.latest {
                ui.separator();
                ui.label(format!(
                    "{} vehicles @ {}",
                    snapshot.len(),
                    snapshot.received_at.with_timezone(&chrono::Local).format("%H:%M:%S")
                ));
            }

            ui.separator();
            ui.label("Feed");
            let response = ui.add(
                egui::TextEdit::singleline(&mut self.feed_address_input).desired_width(160.0),
            );
            if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                let address = self.feed_address_input.trim().to_string();
                if !address.is_empty() && address != self.config.feed_address {
                    info!("Switching live feed to {}", address);
                    self.feed.set_address(address.clone());
                    self.config.feed_address = address;
                    self.persist();
                }
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let label = if self.config.dark_mode { "☀ Light" } else { "☾ Dark" };
                if ui.button(label).clicked() {
                    self.toggle_theme(ui.ctx());
                }
                if let Some(status) = &self.status {
                    ui.label(egui::RichText::new(status).color(egui::Color32::from_rgb(255, 120, 80)));
                }
            });
        });
    }

    fn toggle_theme(&mut self, ctx: &egui::Context) {
        self.config.dark_mode = !self.config.dark_mode;
        ctx.set_visuals(if self.config.dark_mode {
            egui::Visuals::dark()
        } else {
            egui::Visuals::light()
        });
        self.controller.on_style_changed(
            &self.selection,
            &self.stops.records,
            &self.geometry,
            &mut self.scene,
        );
        self.persist();
    }

    fn draw_side_panel(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.selectable_value(&mut self.tab, Tab::Vehicles, "Vehicles");
            ui.selectable_value(&mut self.tab, Tab::Stops, "Stops");
            ui.selectable_value(&mut self.tab, Tab::Routes, "Routes");
            ui.selectable_value(&mut self.tab, Tab::Popup, "Popup");
        });
        ui.separator();

        match self.tab {
            Tab::Vehicles => self.draw_vehicles(ui),
            Tab::Stops => self.draw_stops(ui),
            Tab::Routes => self.draw_routes(ui),
            Tab::Popup => self.draw_popup_fields(ui),
        }
    }

    fn draw_vehicles(&mut self, ui: &mut egui::Ui) {
        let mut ids: BTreeSet<String> = self.selection.vehicle_ids().cloned().collect();
        if let Some(snapshot) = &self.latest {
            ids.extend(snapshot.positions.keys().cloned());
            ids.extend(snapshot.malformed.iter().cloned());
        }

        ui.horizontal(|ui| {
            if ui.button("Select all").clicked() {
                self.selection.set_vehicles(ids.iter().cloned());
            }
            if ui.button("Clear").clicked() {
                self.selection.clear_vehicles();
            }
        });

        egui::ScrollArea::vertical().auto_shrink(false).show(ui, |ui| {
            for id in &ids {
                let position = self.latest.as_ref().and_then(|s| s.positions.get(id));
                ui.horizontal(|ui| {
                    let mut on = self.selection.contains_vehicle(id);
                    let plate = position
                        .and_then(|p| p.field("plate"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    if ui.checkbox(&mut on, format!("{id}  {plate}")).changed() {
                        self.selection.toggle_vehicle(id);
                    }
                    if let Some(p) = position {
                        if ui.small_button("⌖").on_hover_text("Fly to").clicked() {
                            self.controller.fly_to(p.position, &mut self.scene);
                        }
                    }
                });
            }
        });
    }

    fn draw_stops(&mut self, ui: &mut egui::Ui) {
        let ctx = ui.ctx().clone();
        ui.horizontal(|ui| {
            let response = ui.add(
                egui::TextEdit::singleline(&mut self.stop_search_input)
                    .hint_text("Search stops")
                    .desired_width(180.0),
            );
            if response.changed() {
                let search = self.stop_search_input.trim().to_string();
                self.stops.loading = false;
                self.stops.reset(search.clone());
                self.request_stops(&ctx, search);
            }
        });
        ui.horizontal(|ui| {
            if ui.button("Select all").clicked() {
                self.request_stop_ids(&ctx);
            }
            if ui.button("Clear").clicked() {
                self.selection.clear_stops();
            }
            ui.label(format!("{} selected", self.selection.stop_count()));
        });

        egui::ScrollArea::vertical().auto_shrink(false).show(ui, |ui| {
            let mut toggled = None;
            for stop in &self.stops.records {
                let mut on = self.selection.contains_stop(&stop.stop_id);
                if ui
                    .checkbox(&mut on, format!("{}  {}", stop.stop_id, stop.stop_name))
                    .changed()
                {
                    toggled = Some(stop.stop_id.clone());
                }
            }
            if let Some(id) = toggled {
                self.selection.toggle_stop(&id);
            }

            if self.stops.loading {
                ui.spinner();
            } else if self.stops.has_more && ui.button("Load more").clicked() {
                let search = self.stops.search.clone();
                self.request_stops(&ctx, search);
            }
        });
    }

    fn draw_routes(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Reload").clicked() {
                self.request_routes(ui.ctx());
            }
            if ui.button("Clear").clicked() {
                self.selection.clear_routes();
            }
        });
        egui::ScrollArea::vertical().auto_shrink(false).show(ui, |ui| {
            egui::Grid::new("routes_grid").striped(true).show(ui, |ui| {
                ui.label("Route");
                ui.label("Out");
                ui.label("In");
                ui.end_row();

                for route in &self.routes {
                    ui.label(format!("{}  {}", route.route_short_name, route.route_long_name));
                    for direction in Direction::ALL {
                        let mut on = self.selection.route_direction(&route.route_id, direction);
                        if ui.checkbox(&mut on, "").changed() {
                            self.selection
                                .set_route_direction(&route.route_id, direction, on);
                        }
                    }
                    ui.end_row();
                }
            });
        });
    }

    fn draw_popup_fields(&mut self, ui: &mut egui::Ui) {
        ui.label("Fields shown in vehicle popups");
        for key in FieldKey::ALL {
            let mut on = self.visibility.is_visible(key);
            if ui.checkbox(&mut on, key.label()).changed() {
                self.visibility.set(key, on);
            }
        }
        ui.horizontal(|ui| {
            if ui.button("All").clicked() {
                self.visibility = FieldVisibility::all();
            }
            if ui.button("None").clicked() {
                self.visibility = FieldVisibility::none();
            }
        });
    }

    fn draw_map(&mut self, ui: &mut egui::Ui) {
        let (response, painter) = ui.allocate_painter(
            egui::vec2(ui.available_width(), ui.available_height()),
            egui::Sense::click_and_drag(),
        );
        self.viewport.rect = response.rect;

        if response.dragged() {
            self.viewport.pan(response.drag_delta());
        }

        if let Some(hover) = response.hover_pos() {
            let (zoom_delta, scroll) = ui.ctx().input(|i| (i.zoom_delta(), i.smooth_scroll_delta.y));
            let mut levels = 0.0;
            if (zoom_delta - 1.0).abs() > 0.001 {
                levels += f64::from(zoom_delta.log2());
            }
            if scroll.abs() > 0.0 {
                levels += f64::from(scroll) / 200.0;
            }
            if levels.abs() > f64::EPSILON {
                self.viewport.zoom_by(levels, hover);
            }
        }

        if response.clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.handle_map_click(pos);
            }
        }

        if let Some((center, zoom)) = self.scene.take_camera() {
            self.viewport.fly_to(center, zoom);
        }

        self.scene.paint(&painter, &self.viewport, self.config.dark_mode);

        painter.text(
            response.rect.left_bottom() + egui::vec2(10.0, -10.0),
            egui::Align2::LEFT_BOTTOM,
            format!(
                "z{:.1}  {:.5}, {:.5}",
                self.viewport.zoom, self.viewport.center.lat, self.viewport.center.lon
            ),
            egui::FontId::monospace(10.0),
            egui::Color32::GRAY,
        );
    }

    fn handle_map_click(&mut self, pos: egui::Pos2) {
        let stop = self.scene.stop_at(&self.viewport, pos).map(str::to_string);
        if let Some(stop_id) = stop {
            self.controller.click_stop(&stop_id, &mut self.scene);
            return;
        }
        let vehicle = self.scene.vehicle_at(&self.viewport, pos).map(str::to_string);
        let position = vehicle
            .and_then(|id| self.latest.as_ref()?.positions.get(&id).map(|p| p.position));
        match position {
            Some(at) => self.controller.fly_to(at, &mut self.scene),
            None => self.scene.clear_label(),
        }
    }
}

impl eframe::App for FleetApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        self.poll_api();

        if let Some(snapshot) = self.feed.take_if_changed() {
            self.controller
                .on_snapshot(&snapshot, &self.selection, &mut self.scene, now);
            self.latest = Some(snapshot);
        }

        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| self.draw_top_bar(ui));
        egui::SidePanel::left("selection_panel")
            .default_width(self.config.panel_width)
            .show(ctx, |ui| self.draw_side_panel(ui));

        // Selection and popup fields may have changed in the panels above
        let rerendered = self.controller.on_selection_changed(
            &self.selection,
            &self.stops.records,
            &self.geometry,
            &mut self.scene,
        );
        if rerendered.routes {
            self.request_missing_geometry(ctx);
        }
        if self.visibility != *self.controller.vehicles().field_visibility() {
            self.controller
                .set_field_visibility(self.visibility.clone(), &mut self.scene);
            self.config.popup_fields = self.visibility.clone();
            self.persist();
        }

        let animating = self.controller.frame(now, &mut self.scene);

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| self.draw_map(ui));

        if animating {
            ctx.request_repaint();
        } else {
            ctx.request_repaint_after(IDLE_REPAINT);
        }
    }
}
