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

//! Command line definition using clap.

use clap::Parser;

use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "fleet-dashboard")]
#[command(version)]
#[command(about = "Live transit fleet map with stop and route overlays")]
pub struct Cli {
    /// Live feed address (host:port). Overrides the config file.
    #[arg(long, short = 'f')]
    pub feed: Option<String>,

    /// REST API base URL. Overrides the config file.
    #[arg(long, short = 'a')]
    pub api_url: Option<String>,

    /// Start in light mode
    #[arg(long)]
    pub light: bool,

    /// Do not write the configuration back to disk
    #[arg(long)]
    pub no_save: bool,
}

impl Cli {
    /// Apply command line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(feed) = &self.feed {
            config.feed_address.clone_from(feed);
        }
        if let Some(url) = &self.api_url {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if self.light {
            config.dark_mode = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::parse_from([
            "fleet-dashboard",
            "--feed",
            "10.0.0.5:3001",
            "--api-url",
            "http://api.local:8080/",
            "--light",
        ]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.feed_address, "10.0.0.5:3001");
        assert_eq!(config.api_url, "http://api.local:8080");
        assert!(!config.dark_mode);
        assert!(!cli.no_save);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let cli = Cli::parse_from(["fleet-dashboard", "--no-save"]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.feed_address, AppConfig::default().feed_address);
        assert!(cli.no_save);
    }
}
