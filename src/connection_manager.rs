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

use std::collections::HashMap;

use adsb_channels::{
    Client, ClientConfig, InterpolationConfig, PositionChannels, PositionState, PositionTable,
};
use log::{info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::status::{self, SharedSystemStatus};

/// A running client for one server.
struct ActiveClient {
    channels: PositionChannels,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

/// One configured server and, while enabled, its running client
struct ServerConnection {
    config: ServerConfig,
    url_tx: watch::Sender<String>,
    active: Option<ActiveClient>,
}

impl ServerConnection {
    fn new(config: ServerConfig) -> Self {
        let (url_tx, _) = watch::channel(config.url.clone());
        Self {
            config,
            url_tx,
            active: None,
        }
    }

    /// Start the client in a background task
    fn start(&mut self, interpolation: &InterpolationConfig, status: &SharedSystemStatus) {
        if self.active.is_some() {
            return;
        }

        let server_id = self.config.id.clone();
        status::lock(status).register_server(
            server_id.clone(),
            self.config.name.clone(),
            self.config.url.clone(),
        );
        info!(
            "Starting connection to server '{}' ({})",
            self.config.name, self.config.url
        );

        let mut client = Client::spawn(ClientConfig {
            connection: self.config.connection_config(),
            interpolation: interpolation.clone(),
        });
        let channels = client.channels();
        let cancel_token = CancellationToken::new();
        let task_cancel = cancel_token.clone();
        let mut url_rx = self.url_tx.subscribe();
        let status = SharedSystemStatus::clone(status);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    alive = client.process_next() => {
                        if !alive {
                            break;
                        }
                        let channels = client.channels();
                        let mut guard = status::lock(&status);
                        guard.update_server_state(&server_id, &channels.connection_state());
                        guard.update_server_counts(
                            &server_id,
                            channels.batches_applied(),
                            channels.aircraft_count(),
                        );
                    }
                    changed = url_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let url = url_rx.borrow_and_update().clone();
                        client.set_url(url);
                    }
                    () = task_cancel.cancelled() => break,
                }
            }
            client.shutdown();
        });

        self.active = Some(ActiveClient {
            channels,
            cancel_token,
            task,
        });
    }

    /// Stop the client; its tables are cleared on shutdown
    fn stop(&mut self, status: &SharedSystemStatus) -> Option<JoinHandle<()>> {
        let active = self.active.take()?;
        info!("Stopping connection to server '{}'", self.config.name);
        active.cancel_token.cancel();
        status::lock(status).update_server_state(
            &self.config.id,
            &adsb_channels::ConnectionState::Disconnected,
        );
        Some(active.task)
    }

    /// Update the server URL (hot-reload)
    fn update_url(&mut self, new_url: String) {
        info!(
            "Updating URL for server '{}': {} -> {}",
            self.config.name, self.config.url, new_url
        );
        self.config.url.clone_from(&new_url);
        let _ = self.url_tx.send(new_url);
    }

    fn channels(&self) -> Option<&PositionChannels> {
        self.active.as_ref().map(|active| &active.channels)
    }
}

/// Manages one client per configured server
pub struct ConnectionManager {
    /// Server connections keyed by server id
    connections: HashMap<String, ServerConnection>,
    status: SharedSystemStatus,
    interpolation: InterpolationConfig,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("servers", &self.connections.len())
            .field("interpolation", &self.interpolation)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    #[must_use]
    pub fn new(status: SharedSystemStatus, interpolation: InterpolationConfig) -> Self {
        Self {
            connections: HashMap::new(),
            status,
            interpolation,
        }
    }

    /// Add a server, starting it if enabled
    pub fn add_server(&mut self, config: ServerConfig) {
        info!(
            "Adding server '{}' ({}) - enabled: {}",
            config.name, config.url, config.enabled
        );
        let server_id = config.id.clone();
        let enabled = config.enabled;
        let mut connection = ServerConnection::new(config);
        if enabled {
            connection.start(&self.interpolation, &self.status);
        }
        self.connections.insert(server_id, connection);
    }

    /// Remove a server, stopping its client
    pub fn remove_server(&mut self, server_id: &str) {
        if let Some(mut connection) = self.connections.remove(server_id) {
            info!("Removing server '{}'", connection.config.name);
            connection.stop(&self.status);
            status::lock(&self.status).unregister_server(server_id);
        } else {
            warn!("Attempted to remove non-existent server: {server_id}");
        }
    }

    /// Enable a server (start its client)
    pub fn enable_server(&mut self, server_id: &str) {
        if let Some(connection) = self.connections.get_mut(server_id) {
            if !connection.config.enabled {
                info!("Enabling server '{}'", connection.config.name);
                connection.config.enabled = true;
                connection.start(&self.interpolation, &self.status);
            }
        } else {
            warn!("Attempted to enable non-existent server: {server_id}");
        }
    }

    /// Disable a server (stop its client, keep config)
    pub fn disable_server(&mut self, server_id: &str) {
        if let Some(connection) = self.connections.get_mut(server_id) {
            if connection.config.enabled {
                info!("Disabling server '{}'", connection.config.name);
                connection.config.enabled = false;
                connection.stop(&self.status);
            }
        } else {
            warn!("Attempted to disable non-existent server: {server_id}");
        }
    }

    /// Update server configuration (hot-reload URL)
    ///
    /// Topic changes take effect the next time the server starts.
    pub fn update_server(&mut self, server_id: &str, new_config: ServerConfig) {
        let Some(connection) = self.connections.get_mut(server_id) else {
            warn!("Attempted to update non-existent server: {server_id}");
            return;
        };
        if connection.config == new_config {
            return;
        }
        info!("Updating server '{}' configuration", connection.config.name);

        connection.config.name.clone_from(&new_config.name);
        connection.config.topics.clone_from(&new_config.topics);
        if connection.config.url != new_config.url {
            connection.update_url(new_config.url.clone());
        }
        status::lock(&self.status).update_server_info(
            server_id,
            new_config.name.clone(),
            new_config.url.clone(),
        );

        if new_config.enabled {
            self.enable_server(server_id);
        } else {
            self.disable_server(server_id);
        }
    }

    /// Bring the managed servers in line with `servers`.
    ///
    /// Servers missing from the list are removed, new ones are added, and
    /// known ones are updated in place (name, URL and enabled flag).
    pub fn apply_servers(&mut self, servers: &[ServerConfig]) {
        let stale: Vec<String> = self
            .connections
            .keys()
            .filter(|id| !servers.iter().any(|server| &server.id == *id))
            .cloned()
            .collect();
        for id in stale {
            self.remove_server(&id);
        }

        for server in servers {
            if self.connections.contains_key(&server.id) {
                self.update_server(&server.id, server.clone());
            } else {
                self.add_server(server.clone());
            }
        }
    }

    /// Find an aircraft's current position across all servers
    #[must_use]
    pub fn get_position(&self, id: &str) -> Option<PositionState> {
        self.connections
            .values()
            .filter_map(ServerConnection::channels)
            .find_map(|channels| channels.get_position(id))
    }

    /// Positions from all servers merged; the first server to report an id wins
    #[must_use]
    pub fn get_all_positions_merged(&self) -> PositionTable {
        let mut merged = PositionTable::new();
        for channels in self.connections.values().filter_map(ServerConnection::channels) {
            for (id, state) in channels.positions_ref().iter() {
                merged.entry(id.clone()).or_insert(*state);
            }
        }
        merged
    }

    /// Get the number of managed servers
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of running clients
    #[must_use]
    pub fn active_connection_count(&self) -> usize {
        self.connections
            .values()
            .filter(|conn| conn.active.is_some())
            .count()
    }

    /// Stop every client and wait for the tasks to finish
    pub async fn shutdown(&mut self) {
        info!("Shutting down ConnectionManager - stopping all connections");
        let tasks: Vec<_> = self
            .connections
            .values_mut()
            .filter_map(|connection| connection.stop(&self.status))
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Connection task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for connection in self.connections.values_mut() {
            connection.stop(&self.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{ConnectionStatus, SystemStatus};
    use std::sync::{Arc, Mutex};

    fn manager() -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(Mutex::new(SystemStatus::new())),
            InterpolationConfig::default(),
        )
    }

    fn offline_server(enabled: bool) -> ServerConfig {
        ServerConfig::new("Offline".to_string(), "ws://127.0.0.1:9/".to_string(), enabled)
    }

    #[tokio::test]
    async fn test_enabled_servers_start() {
        let mut manager = manager();
        manager.add_server(offline_server(true));
        manager.add_server(offline_server(false));
        assert_eq!(manager.connection_count(), 2);
        assert_eq!(manager.active_connection_count(), 1);
        assert!(manager.get_all_positions_merged().is_empty());
        manager.shutdown().await;
        assert_eq!(manager.active_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_enable_disable_remove() {
        let mut manager = manager();
        let server = offline_server(false);
        let id = server.id.clone();
        manager.add_server(server);

        manager.enable_server(&id);
        assert_eq!(manager.active_connection_count(), 1);
        assert!(status::lock(&manager.status).servers.get(&id).is_some());

        manager.disable_server(&id);
        assert_eq!(manager.active_connection_count(), 0);
        assert_eq!(
            status::lock(&manager.status)
                .servers.get(&id)
                .map(|s| s.status),
            Some(ConnectionStatus::Disconnected)
        );

        manager.remove_server(&id);
        assert_eq!(manager.connection_count(), 0);
        assert!(status::lock(&manager.status).servers.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_update_server_hot_reloads_url() {
        let mut manager = manager();
        let server = offline_server(true);
        let id = server.id.clone();
        manager.add_server(server.clone());

        let updated = ServerConfig {
            name: "Renamed".to_string(),
            url: "ws://127.0.0.1:7/".to_string(),
            ..server
        };
        manager.update_server(&id, updated);

        let connection = &manager.connections[&id];
        assert_eq!(connection.config.url, "ws://127.0.0.1:7/");
        assert_eq!(*connection.url_tx.borrow(), "ws://127.0.0.1:7/");
        assert_eq!(
            status::lock(&manager.status)
                .servers.get(&id)
                .map(|s| s.server_name.clone()),
            Some("Renamed".to_string())
        );
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_apply_servers() {
        let mut manager = manager();
        let kept = offline_server(true);
        let dropped = offline_server(true);
        manager.apply_servers(&[kept.clone(), dropped.clone()]);
        assert_eq!(manager.active_connection_count(), 2);

        let added = offline_server(false);
        let kept = ServerConfig {
            enabled: false,
            ..kept
        };
        manager.apply_servers(&[kept.clone(), added.clone()]);

        assert_eq!(manager.connection_count(), 2);
        assert_eq!(manager.active_connection_count(), 0);
        assert!(!manager.connections.contains_key(&dropped.id));
        assert!(!manager.connections[&kept.id].config.enabled);
        assert!(manager.connections.contains_key(&added.id));
        assert!(status::lock(&manager.status).servers.get(&dropped.id).is_none());
        manager.shutdown().await;
    }
}
