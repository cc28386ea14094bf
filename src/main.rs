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

mod api;
mod app;
mod cli;
mod config;
mod projection;
mod scene;

use clap::Parser;
use eframe::egui;
use log::{error, info, warn};

use app::FleetApp;
use cli::Cli;
use config::AppConfig;

fn main() -> Result<(), eframe::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("Starting Fleet Dashboard...");

    let mut config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load configuration, using defaults: {}", e);
            AppConfig::default()
        }
    };
    cli.apply(&mut config);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("fleet-io")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };
    let handle = runtime.handle().clone();
    let save_config = !cli.no_save;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 800.0])
            .with_title("Fleet Dashboard"),
        ..Default::default()
    };

    info!("Initializing window...");
    let result = eframe::run_native(
        "Fleet Dashboard",
        options,
        Box::new(move |cc| Ok(Box::new(FleetApp::new(cc, config, save_config, handle)))),
    );

    runtime.shutdown_background();
    result
}
