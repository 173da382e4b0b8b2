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

//! Per-server connection status and diagnostics.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use adsb_channels::ConnectionState;
use chrono::{DateTime, Utc};

const MAX_DIAGNOSTICS: usize = 50;

/// Connection status for a channels server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl From<&ConnectionState> for ConnectionStatus {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Connected => Self::Connected,
            ConnectionState::Disconnected => Self::Disconnected,
            ConnectionState::Error(_) => Self::Error,
        }
    }
}

/// Diagnostic message with timestamp
#[derive(Debug, Clone)]
pub struct DiagnosticMessage {
    pub timestamp: DateTime<Utc>,
    pub level: DiagnosticLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

/// Per-server connection status and statistics
#[derive(Debug, Clone)]
pub struct ServerStatus {
    /// Server display name
    pub server_name: String,

    /// WebSocket URL
    pub server_url: String,

    /// Current connection status
    pub status: ConnectionStatus,

    /// Last error message (if any)
    pub last_error: Option<String>,

    /// Aircraft batches applied from this server
    pub batch_count: u64,

    /// Number of aircraft currently tracked from this server
    pub aircraft_count: usize,

    /// When the connection was established
    pub connected_at: Option<DateTime<Utc>>,

    /// Last time a batch was applied
    pub last_batch_at: Option<DateTime<Utc>>,
}

impl ServerStatus {
    #[must_use]
    pub fn new(server_name: String, server_url: String) -> Self {
        Self {
            server_name,
            server_url,
            status: ConnectionStatus::Disconnected,
            last_error: None,
            batch_count: 0,
            aircraft_count: 0,
            connected_at: None,
            last_batch_at: None,
        }
    }

    /// Get connection uptime in seconds
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        match (self.status, self.connected_at) {
            (ConnectionStatus::Connected, Some(connected)) => {
                u64::try_from((Utc::now() - connected).num_seconds()).unwrap_or(0)
            }
            _ => 0,
        }
    }
}

/// Status of every configured server plus recent diagnostics
#[derive(Debug, Default)]
pub struct SystemStatus {
    pub servers: HashMap<String, ServerStatus>,
    pub diagnostics: VecDeque<DiagnosticMessage>,
}

impl SystemStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic message, keeping only the most recent ones
    pub fn add_diagnostic(&mut self, level: DiagnosticLevel, message: String) {
        self.diagnostics.push_back(DiagnosticMessage {
            timestamp: Utc::now(),
            level,
            message,
        });

        while self.diagnostics.len() > MAX_DIAGNOSTICS {
            self.diagnostics.pop_front();
        }
    }

    /// Register a new server for tracking
    pub fn register_server(&mut self, server_id: String, server_name: String, server_url: String) {
        self.servers
            .insert(server_id, ServerStatus::new(server_name, server_url));
    }

    /// Remove a server from tracking
    pub fn unregister_server(&mut self, server_id: &str) {
        self.servers.remove(server_id);
    }

    /// Update server connection state
    pub fn update_server_state(&mut self, server_id: &str, state: &ConnectionState) {
        let Some(server) = self.servers.get_mut(server_id) else {
            return;
        };
        let status = ConnectionStatus::from(state);
        if server.status == status && !matches!(state, ConnectionState::Error(_)) {
            return;
        }
        server.status = status;

        let diagnostic = match state {
            ConnectionState::Connected => {
                server.connected_at = Some(Utc::now());
                server.last_error = None;
                (
                    DiagnosticLevel::Info,
                    format!("[{}] Connected to {}", server.server_name, server.server_url),
                )
            }
            ConnectionState::Connecting => (
                DiagnosticLevel::Info,
                format!("[{}] Connecting to {}...", server.server_name, server.server_url),
            ),
            ConnectionState::Disconnected => {
                server.connected_at = None;
                server.aircraft_count = 0;
                (
                    DiagnosticLevel::Warning,
                    format!("[{}] Disconnected from {}", server.server_name, server.server_url),
                )
            }
            ConnectionState::Error(error) => {
                server.connected_at = None;
                server.aircraft_count = 0;
                server.last_error = Some(error.clone());
                (
                    DiagnosticLevel::Error,
                    format!("[{}] Connection error: {error}", server.server_name),
                )
            }
        };

        self.add_diagnostic(diagnostic.0, diagnostic.1);
    }

    /// Update batch and aircraft counters for a server
    pub fn update_server_counts(&mut self, server_id: &str, batches: u64, aircraft: usize) {
        if let Some(server) = self.servers.get_mut(server_id) {
            if batches != server.batch_count {
                server.batch_count = batches;
                server.last_batch_at = Some(Utc::now());
            }
            server.aircraft_count = aircraft;
        }
    }

    /// Update server name and URL
    pub fn update_server_info(&mut self, server_id: &str, name: String, url: String) {
        if let Some(server) = self.servers.get_mut(server_id) {
            server.server_name = name;
            server.server_url = url;
        }
    }

    /// Diagnostics recorded after `since`, oldest first
    pub fn diagnostics_since(
        &self,
        since: DateTime<Utc>,
    ) -> impl Iterator<Item = &DiagnosticMessage> {
        self.diagnostics
            .iter()
            .filter(move |diagnostic| diagnostic.timestamp > since)
    }

    /// Get total aircraft count across all servers
    #[must_use]
    pub fn get_total_server_aircraft(&self) -> usize {
        self.servers.values().map(|s| s.aircraft_count).sum()
    }

    /// Get number of connected servers
    #[must_use]
    pub fn get_connected_server_count(&self) -> usize {
        self.servers
            .values()
            .filter(|s| s.status == ConnectionStatus::Connected)
            .count()
    }
}

/// Thread-safe wrapper for `SystemStatus`
pub type SharedSystemStatus = Arc<Mutex<SystemStatus>>;

/// Lock shared status, recovering from a poisoned lock.
pub fn lock(status: &SharedSystemStatus) -> MutexGuard<'_, SystemStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}
