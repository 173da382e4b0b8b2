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

//! Async WebSocket connection layer with automatic reconnection.
//!
//! Provides a connection handle that manages the channels socket with
//! exponential backoff, URL hot-reload, topic subscriptions that survive
//! reconnects, correlated requests, and graceful shutdown.

pub mod backoff;
pub mod request;

pub use backoff::{Backoff, BackoffConfig};
pub use request::PendingRequests;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;
use crate::protocol::ChannelAction;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the channels socket.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL, e.g. `ws://localhost:8000/ws/aircraft/`.
    pub url: String,
    /// Topics subscribed on every (re)connect.
    pub topics: Vec<String>,
    /// Reconnect policy.
    pub backoff: BackoffConfig,
    /// Upper bound for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Default wait for a correlated response.
    pub request_timeout: Duration,
    /// Channel buffer size for received frames.
    pub buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws/aircraft/".to_string(),
            topics: vec!["aircraft".to_string()],
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            buffer_size: 1024,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to connect.
    Connecting,
    /// Successfully connected.
    Connected,
    /// Disconnected (will attempt reconnect).
    Disconnected,
    /// Connection error occurred.
    Error(String),
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Events emitted by the connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// One text frame received.
    Text(String),
}

/// Cloneable sender side of a connection.
///
/// Subscriptions, unsubscriptions and correlated requests go through here
/// so they can be issued while another task is busy receiving events.
///
/// Nothing is queued while the socket is down: topic changes only update
/// the set sent on the next connect, and requests fail with
/// [`ChannelError::NotConnected`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    command_tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    topics: Arc<Mutex<BTreeSet<String>>>,
    pending: PendingRequests,
    request_timeout: Duration,
}

impl ConnectionHandle {
    fn topic_set(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add topics. They are sent now and again after every reconnect.
    pub fn subscribe<I, S>(&self, topics: I) -> Result<(), ChannelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let added: Vec<String> = {
            let mut set = self.topic_set();
            topics
                .into_iter()
                .map(Into::into)
                .filter(|topic| set.insert(topic.clone()))
                .collect()
        };
        if added.is_empty() || !self.is_connected() {
            return Ok(());
        }
        self.send_action(&ChannelAction::Subscribe { topics: added })
    }

    /// Remove topics.
    pub fn unsubscribe<I, S>(&self, topics: I) -> Result<(), ChannelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let removed: Vec<String> = {
            let mut set = self.topic_set();
            topics
                .into_iter()
                .map(Into::into)
                .filter(|topic| set.remove(topic))
                .collect()
        };
        if removed.is_empty() || !self.is_connected() {
            return Ok(());
        }
        self.send_action(&ChannelAction::Unsubscribe { topics: removed })
    }

    /// Currently subscribed topics.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topic_set().iter().cloned().collect()
    }

    /// Send a correlated request and wait for its response using the
    /// configured default timeout.
    pub async fn request(&self, kind: &str, params: Value) -> Result<Value, ChannelError> {
        self.request_with_timeout(kind, params, self.request_timeout)
            .await
    }

    /// Send a correlated request and wait at most `timeout` for its response.
    pub async fn request_with_timeout(
        &self,
        kind: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let (request_id, reply_rx) = self.pending.register();
        let action = ChannelAction::Request {
            kind: kind.to_string(),
            request_id: request_id.clone(),
            params,
        };
        if let Err(e) = self.send_action(&action) {
            self.pending.cancel(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ChannelError::Disconnected(request_id)),
            Err(_) => {
                self.pending.cancel(&request_id);
                Err(ChannelError::Timeout {
                    request_id,
                    timeout,
                })
            }
        }
    }

    /// Requests awaiting a response.
    #[must_use]
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Whether a session is open and accepting actions.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send_action(&self, action: &ChannelAction) -> Result<(), ChannelError> {
        let frame = action.encode()?;
        self.command_tx
            .send(frame)
            .map_err(|e| ChannelError::WebSocket(format!("connection task stopped: {e}")))
    }
}

/// Handle to a managed WebSocket connection.
///
/// The connection runs in a background task and automatically reconnects
/// on disconnect. Use `recv()` to receive events and `set_url()` to
/// change the server URL at runtime.
pub struct Connection {
    event_rx: mpsc::Receiver<ConnectionEvent>,
    url_tx: watch::Sender<String>,
    handle: ConnectionHandle,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &*self.url_tx.borrow())
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Spawn a new connection task with the given configuration.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: ConnectionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.buffer_size.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (url_tx, url_rx) = watch::channel(config.url.clone());
        let cancel_token = CancellationToken::new();
        let topics = Arc::new(Mutex::new(config.topics.iter().cloned().collect()));
        let connected = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            event_tx,
            command_rx,
            connected: Arc::clone(&connected),
            url_rx,
            topics: Arc::clone(&topics),
            cancel_token: cancel_token.clone(),
            backoff: Backoff::new(config.backoff.clone()),
            connect_timeout: config.connect_timeout,
        };
        tokio::spawn(worker.run());

        Self {
            event_rx,
            url_tx,
            handle: ConnectionHandle {
                command_tx,
                connected,
                topics,
                pending: PendingRequests::new(),
                request_timeout: config.request_timeout,
            },
            cancel_token,
        }
    }

    /// Receive the next event from the connection.
    ///
    /// Returns `None` once the connection task has stopped.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Cloneable handle for subscriptions and requests.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Change the server URL.
    ///
    /// The connection will disconnect and reconnect to the new URL.
    pub fn set_url(&self, url: String) {
        let _ = self.url_tx.send(url);
    }

    /// Get the current server URL.
    #[must_use]
    pub fn current_url(&self) -> String {
        self.url_tx.borrow().clone()
    }

    /// Shut down the connection, including any pending reconnect.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

enum ReconnectReason {
    UrlChanged,
    ConnectionClosed,
    Cancelled,
}

struct Worker {
    event_tx: mpsc::Sender<ConnectionEvent>,
    command_rx: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
    url_rx: watch::Receiver<String>,
    topics: Arc<Mutex<BTreeSet<String>>>,
    cancel_token: CancellationToken,
    backoff: Backoff,
    connect_timeout: Duration,
}

impl Worker {
    /// Close the session to new actions and drop any that were not sent.
    fn go_offline(&mut self) {
        self.connected.store(false, Ordering::Release);
        let mut dropped = 0;
        while self.command_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {dropped} unsent actions");
        }
    }

    async fn emit(&self, event: ConnectionEvent) -> bool {
        self.event_tx.send(event).await.is_ok()
    }

    async fn run(mut self) {
        loop {
            if self.cancel_token.is_cancelled() {
                info!("Connection cancelled");
                return;
            }

            let current_url = self.url_rx.borrow_and_update().clone();

            if !self
                .emit(ConnectionEvent::StateChanged(ConnectionState::Connecting))
                .await
            {
                return; // Receiver dropped
            }

            info!("Connecting to {current_url}...");

            let result = self.connect_and_process(&current_url).await;
            self.go_offline();

            match result {
                Ok(ReconnectReason::UrlChanged) => {
                    info!("Server URL changed, reconnecting immediately...");
                    self.backoff.reset();
                    if !self
                        .emit(ConnectionEvent::StateChanged(ConnectionState::Disconnected))
                        .await
                    {
                        return;
                    }
                    continue;
                }
                Ok(ReconnectReason::ConnectionClosed) => {
                    info!("Connection closed");
                    if !self
                        .emit(ConnectionEvent::StateChanged(ConnectionState::Disconnected))
                        .await
                    {
                        return;
                    }
                }
                Ok(ReconnectReason::Cancelled) => {
                    info!("Connection cancelled");
                    return;
                }
                Err(e) => {
                    error!("Connection error: {e}");
                    if !self
                        .emit(ConnectionEvent::StateChanged(ConnectionState::Error(
                            e.to_string(),
                        )))
                        .await
                    {
                        return;
                    }
                }
            }

            let Some(delay) = self.backoff.next_delay() else {
                error!("Giving up after {} reconnect attempts", self.backoff.attempt());
                let _ = self
                    .emit(ConnectionEvent::StateChanged(ConnectionState::Error(
                        "reconnect attempts exhausted".to_string(),
                    )))
                    .await;
                return;
            };

            warn!(
                "Reconnecting in {:.1} seconds (attempt {})...",
                delay.as_secs_f64(),
                self.backoff.attempt()
            );

            tokio::select! {
                () = sleep(delay) => {}
                changed = self.url_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    info!("Server URL changed during reconnect delay");
                    self.backoff.reset();
                }
                () = self.cancel_token.cancelled() => {
                    info!("Connection cancelled during reconnect delay");
                    return;
                }
            }
        }
    }

    async fn connect_and_process(&mut self, url: &str) -> Result<ReconnectReason, ChannelError> {
        let request = url
            .into_client_request()
            .map_err(|e| ChannelError::InvalidUrl(format!("{url}: {e}")))?;

        let (mut ws, _response) = tokio::select! {
            result = tokio::time::timeout(self.connect_timeout, connect_async(request)) => match result {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    return Err(ChannelError::Connect { url: url.to_string(), reason: e.to_string() });
                }
                Err(_) => {
                    return Err(ChannelError::Connect {
                        url: url.to_string(),
                        reason: format!("handshake timed out after {:?}", self.connect_timeout),
                    });
                }
            },
            () = self.cancel_token.cancelled() => return Ok(ReconnectReason::Cancelled),
        };

        info!("Connected to {url}");
        self.backoff.reset();

        if !self
            .emit(ConnectionEvent::StateChanged(ConnectionState::Connected))
            .await
        {
            return Ok(ReconnectReason::Cancelled);
        }

        // Open before reading the topic set so a concurrent subscribe is
        // either in that set or queued behind it
        self.connected.store(true, Ordering::Release);
        self.send_subscriptions(&mut ws).await?;

        loop {
            tokio::select! {
                frame = ws.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if !self.emit(ConnectionEvent::Text(text.as_str().to_owned())).await {
                                return Ok(ReconnectReason::Cancelled);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Server closed the connection: {frame:?}");
                            return Ok(ReconnectReason::ConnectionClosed);
                        }
                        Some(Ok(Message::Binary(data))) => {
                            debug!("Ignoring {} byte binary frame", data.len());
                        }
                        // Pings are answered by tungstenite itself
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(ChannelError::WebSocket(e.to_string()));
                        }
                        None => {
                            info!("Connection closed by server");
                            return Ok(ReconnectReason::ConnectionClosed);
                        }
                    }
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(frame) => {
                            ws.send(Message::text(frame))
                                .await
                                .map_err(|e| ChannelError::WebSocket(e.to_string()))?;
                        }
                        None => return Ok(ReconnectReason::Cancelled),
                    }
                }

                changed = self.url_rx.changed() => {
                    if changed.is_err() {
                        return Ok(ReconnectReason::Cancelled);
                    }
                    let new_url = self.url_rx.borrow_and_update().clone();
                    if new_url != url {
                        info!("Server URL changed from {url} to {new_url}");
                        let _ = ws.close(None).await;
                        return Ok(ReconnectReason::UrlChanged);
                    }
                }

                () = self.cancel_token.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(ReconnectReason::Cancelled);
                }
            }
        }
    }

    async fn send_subscriptions(&self, ws: &mut WsStream) -> Result<(), ChannelError> {
        let topics: Vec<String> = self
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        if topics.is_empty() {
            return Ok(());
        }

        let frame = ChannelAction::Subscribe { topics }.encode()?;
        ws.send(Message::text(frame))
            .await
            .map_err(|e| ChannelError::WebSocket(e.to_string()))?;
        debug!("Sent subscribe action");
        Ok(())
    }
}
