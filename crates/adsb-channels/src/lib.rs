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

//! Live aircraft positions over a WebSocket channels feed.
//!
//! The crate turns a stream of JSON snapshot and delta messages into a
//! smoothly animated table of aircraft positions. It is split into layers
//! that can be used independently or composed together:
//!
//! - **Connection layer** ([`ws`]): WebSocket with exponential backoff,
//!   URL hot-reload, topic subscriptions and correlated requests
//! - **Protocol layer** ([`protocol`]): message decoding and field aliases
//! - **Reconciler** ([`reconciler`]): authoritative aircraft table
//! - **Engine** ([`engine`]): per-frame eased interpolation into a visual
//!   table that is swapped atomically
//! - **Query surface** ([`PositionChannels`]): lookups, snapshots and change
//!   signals
//! - **Replay** ([`replay`]): scrubbing through recorded tracks
//!
//! # Quick Start
//!
//! Use the [`Client`] type for full-stack operation:
//!
//! ```no_run
//! use adsb_channels::{Client, ClientConfig, ConnectionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut client = Client::spawn(ClientConfig {
//!         connection: ConnectionConfig {
//!             url: "ws://localhost:8000/ws/aircraft/".to_string(),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     });
//!
//!     let channels = client.channels();
//!     tokio::spawn(async move {
//!         let mut count = channels.watch_aircraft_count();
//!         while count.changed().await.is_ok() {
//!             println!("{} aircraft", *count.borrow());
//!         }
//!     });
//!
//!     client.run().await;
//! }
//! ```
//!
//! # Without a connection
//!
//! ```
//! use std::time::Instant;
//!
//! use adsb_channels::{InterpolationConfig, PositionChannels};
//! use serde_json::json;
//!
//! let channels = PositionChannels::new(&InterpolationConfig::default());
//! let now = Instant::now();
//! channels.apply_snapshot(&[json!({"hex": "a1b2c3", "lat": 34.0, "lon": -118.4})], now);
//! channels.frame(now);
//!
//! let position = channels.get_position("A1B2C3").unwrap();
//! assert_eq!(position.lat, 34.0);
//! ```

pub mod channels;
pub mod engine;
pub mod error;
pub mod interpolation;
pub mod protocol;
pub mod reconciler;
pub mod replay;
pub mod state;
pub mod ws;

use std::time::{Duration, Instant};

use log::{debug, info, warn};

pub use channels::PositionChannels;
pub use engine::{FrameLoop, InterpolationConfig, InterpolationEngine, PositionTable};
pub use error::ChannelError;
pub use interpolation::{ease_out_cubic, interpolate_angle};
pub use protocol::{ChannelAction, ChannelMessage, ChannelParser, Protocol, ProtocolError};
pub use reconciler::{BatchOutcome, Reconciler};
pub use replay::{replay_event, TrackPoint, TrackReplay};
pub use state::{Aircraft, PositionState};
pub use ws::{
    Backoff, BackoffConfig, Connection, ConnectionConfig, ConnectionEvent, ConnectionHandle,
    ConnectionState, PendingRequests,
};

/// Configuration for the full-stack client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Connection configuration.
    pub connection: ConnectionConfig,
    /// Interpolation configuration.
    pub interpolation: InterpolationConfig,
}

/// Full-stack client that wires all layers together.
///
/// The client manages the WebSocket connection, decodes incoming frames,
/// reconciles them into the aircraft table and runs the frame loop that
/// animates the visual table.
pub struct Client {
    channels: PositionChannels,
    connection: Connection,
    handle: ConnectionHandle,
    parser: ChannelParser,
    frame_loop: FrameLoop,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .field("frame_loop", &self.frame_loop)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Spawn a new client with the given configuration.
    ///
    /// This starts the connection task and the frame loop. The frame loop
    /// keeps ticking while interpolation is disabled and skips those frames.
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: ClientConfig) -> Self {
        let channels = PositionChannels::new(&config.interpolation);
        let connection = Connection::spawn(config.connection);
        let handle = connection.handle();
        let frame_loop = spawn_frame_loop(&channels, config.interpolation.frame_interval);

        Self {
            channels,
            connection,
            handle,
            parser: ChannelParser::new(),
            frame_loop,
        }
    }

    /// Process one event from the connection.
    ///
    /// Returns `false` once the connection task has stopped:
    ///
    /// ```no_run
    /// # use adsb_channels::{Client, ClientConfig};
    /// # async fn example() {
    /// let mut client = Client::spawn(ClientConfig::default());
    /// while client.process_next().await {}
    /// # }
    /// ```
    pub async fn process_next(&mut self) -> bool {
        let Some(event) = self.connection.recv().await else {
            return false;
        };
        self.handle_event(event, Instant::now());
        true
    }

    /// Process events until the client is shut down.
    pub async fn run(&mut self) {
        while self.process_next().await {}
        info!("Client stopped");
    }

    fn handle_event(&mut self, event: ConnectionEvent, now: Instant) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                if matches!(
                    state,
                    ConnectionState::Disconnected | ConnectionState::Error(_)
                ) {
                    let failed = self.handle.pending().fail_all();
                    if failed > 0 {
                        warn!("Failed {failed} pending requests after disconnect");
                    }
                }
                self.channels.set_connection_state(state);
            }
            ConnectionEvent::Text(text) => self.handle_text(&text, now),
        }
    }

    fn handle_text(&mut self, text: &str, now: Instant) {
        let message = match self.parser.parse(text.as_bytes()) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!("Decode error: {e}");
                return;
            }
        };

        if let Some(outcome) = self.channels.apply_message(&message, now) {
            debug!(
                "Applied batch: {} applied, {} skipped, {} removed",
                outcome.applied, outcome.skipped, outcome.removed
            );
            return;
        }

        let pending = self.handle.pending();
        match message {
            ChannelMessage::Response { request_id, data } => {
                if !pending.resolve(&request_id, data) {
                    debug!("Response for unknown request {request_id}");
                }
            }
            ChannelMessage::Error {
                request_id: Some(request_id),
                message,
            } => {
                if !pending.reject(&request_id, message.clone()) {
                    warn!("Server error for unknown request {request_id}: {message}");
                }
            }
            ChannelMessage::Error {
                request_id: None,
                message,
            } => warn!("Server error: {message}"),
            ChannelMessage::Heartbeat { count } => {
                debug!("Heartbeat (server count {count:?})");
            }
            ChannelMessage::Other(kind) => debug!("Ignoring message type {kind}"),
            ChannelMessage::Snapshot { .. }
            | ChannelMessage::Update { .. }
            | ChannelMessage::Remove { .. } => {}
        }
    }

    /// Shared handle to the position tables.
    #[must_use]
    pub fn channels(&self) -> PositionChannels {
        self.channels.clone()
    }

    /// Cloneable handle for subscriptions and requests.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Current position of one aircraft, case-insensitive.
    #[must_use]
    pub fn get_position(&self, id: &str) -> Option<PositionState> {
        self.channels.get_position(id)
    }

    /// Copy of the whole visual table.
    #[must_use]
    pub fn get_positions_snapshot(&self) -> PositionTable {
        self.channels.get_positions_snapshot()
    }

    /// Get the number of tracked aircraft.
    #[must_use]
    pub fn aircraft_count(&self) -> usize {
        self.channels.aircraft_count()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.channels.connection_state()
    }

    /// Add topics to the subscription set.
    pub fn subscribe<I, S>(&self, topics: I) -> Result<(), ChannelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handle.subscribe(topics)
    }

    /// Remove topics from the subscription set.
    pub fn unsubscribe<I, S>(&self, topics: I) -> Result<(), ChannelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handle.unsubscribe(topics)
    }

    /// Send a correlated request.
    ///
    /// The reply is delivered while another task drives [`Client::run`];
    /// use [`Client::handle`] to issue requests from there.
    pub async fn request(
        &self,
        kind: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ChannelError> {
        self.handle.request(kind, params).await
    }

    /// Turn smoothing on or off.
    ///
    /// Same as toggling through [`Client::channels`]; the frame loop picks
    /// the change up on its next tick.
    pub fn set_interpolation_enabled(&self, enabled: bool) {
        self.channels
            .set_interpolation_enabled(enabled, Instant::now());
    }

    /// Change the server URL.
    ///
    /// The connection will disconnect and reconnect to the new URL.
    pub fn set_url(&self, url: String) {
        self.connection.set_url(url);
    }

    /// Get the current server URL.
    #[must_use]
    pub fn current_url(&self) -> String {
        self.connection.current_url()
    }

    /// Shut down the client.
    ///
    /// Cancels the connection and any pending reconnect, stops the frame
    /// loop and clears every table.
    pub fn shutdown(&self) {
        self.connection.shutdown();
        self.frame_loop.stop();
        self.handle.pending().fail_all();
        self.channels
            .handle_disconnect(ConnectionState::Disconnected);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs until the client shuts down, whatever the interpolation setting.
fn spawn_frame_loop(channels: &PositionChannels, interval: Duration) -> FrameLoop {
    let channels = channels.clone();
    FrameLoop::spawn(interval, move |now| {
        channels.frame(now);
        true
    })
}
