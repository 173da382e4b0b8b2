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

//! Application configuration management.
//!
//! Configuration is persisted as TOML through `confy`. It holds the list of
//! channel servers plus interpolation and status settings.

use std::time::Duration;

use adsb_channels::{ConnectionConfig, InterpolationConfig};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const APP_NAME: &str = "adsb-live";
const CONFIG_NAME: &str = "config";
const CONFIG_VERSION: u32 = 2;

/// Default channels endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/ws/aircraft/";

/// One channels server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Unique identifier for this server (stable across renames)
    pub id: String,

    /// User-friendly display name
    pub name: String,

    /// WebSocket URL
    pub url: String,

    /// Topics subscribed after connecting
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,

    /// Whether this server should connect on startup
    pub enabled: bool,
}

impl ServerConfig {
    /// Create a new server configuration with a generated UUID
    #[must_use]
    pub fn new(name: String, url: String, enabled: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            url,
            topics: default_topics(),
            enabled,
        }
    }

    /// Create the default local server
    #[must_use]
    pub fn default_local() -> Self {
        Self::new(
            "Default Local Server".to_string(),
            DEFAULT_SERVER_URL.to_string(),
            true,
        )
    }

    /// Connection settings for this server.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.url.clone(),
            topics: self.topics.clone(),
            ..ConnectionConfig::default()
        }
    }
}

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Configuration schema version
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Configured channel servers
    #[serde(default = "default_servers")]
    pub servers: Vec<ServerConfig>,

    /// Smooth positions between updates
    #[serde(default = "default_true")]
    pub interpolation_enabled: bool,

    /// Duration of one eased transition in milliseconds
    #[serde(default = "default_interpolation_ms")]
    pub interpolation_ms: u64,

    /// Frame interval in milliseconds
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Seconds between status log lines
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

fn default_config_version() -> u32 {
    CONFIG_VERSION
}

fn default_topics() -> Vec<String> {
    vec!["aircraft".to_string()]
}

fn default_servers() -> Vec<ServerConfig> {
    vec![ServerConfig::default_local()]
}

fn default_true() -> bool {
    true
}

fn default_interpolation_ms() -> u64 {
    1000
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_status_interval_secs() -> u64 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            servers: default_servers(),
            interpolation_enabled: true,
            interpolation_ms: default_interpolation_ms(),
            frame_interval_ms: default_frame_interval_ms(),
            status_interval_secs: default_status_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, writing the defaults on first run
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Servers that should connect on startup.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|server| server.enabled)
    }

    /// Interpolation settings.
    #[must_use]
    pub fn interpolation_config(&self) -> InterpolationConfig {
        InterpolationConfig {
            enabled: self.interpolation_enabled,
            duration: Duration::from_millis(self.interpolation_ms),
            frame_interval: Duration::from_millis(self.frame_interval_ms.max(1)),
        }
    }

    #[must_use]
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }
}
