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

//! Shared position channels: the reconciler and the interpolation engine
//! behind one lock, plus the query surface read by consumers.
//!
//! High-frequency data (positions) is only ever pulled through getters.
//! The two low-frequency signals, connection state and aircraft count, are
//! published on `watch` channels and change at most once per batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use log::{debug, info};
use serde_json::Value;
use tokio::sync::watch;

use crate::engine::{InterpolationConfig, InterpolationEngine, PositionTable};
use crate::protocol::fields::normalize_id;
use crate::protocol::ChannelMessage;
use crate::reconciler::{BatchOutcome, Reconciler};
use crate::state::{Aircraft, PositionState};
use crate::ws::ConnectionState;

#[derive(Debug)]
struct ChannelState {
    reconciler: Reconciler,
    engine: InterpolationEngine,
}

/// Cloneable handle to the live aircraft position tables.
#[derive(Debug, Clone)]
pub struct PositionChannels {
    state: Arc<RwLock<ChannelState>>,
    connection_tx: Arc<watch::Sender<ConnectionState>>,
    count_tx: Arc<watch::Sender<usize>>,
    batches: Arc<AtomicU64>,
}

impl PositionChannels {
    /// Create empty channels.
    #[must_use]
    pub fn new(config: &InterpolationConfig) -> Self {
        let (connection_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (count_tx, _) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(ChannelState {
                reconciler: Reconciler::new(),
                engine: InterpolationEngine::new(config),
            })),
            connection_tx: Arc::new(connection_tx),
            count_tx: Arc::new(count_tx),
            batches: Arc::new(AtomicU64::new(0)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ChannelState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChannelState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_count(&self, count: usize) {
        self.count_tx.send_if_modified(|current| {
            if *current == count {
                false
            } else {
                *current = count;
                true
            }
        });
    }

    fn finish_batch(&self, count: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.publish_count(count);
    }

    /// Replace the whole table.
    pub fn apply_snapshot(&self, entries: &[Value], now: Instant) -> BatchOutcome {
        let (outcome, count) = {
            let mut guard = self.write();
            let state = &mut *guard;
            let outcome = state
                .reconciler
                .apply_snapshot(&mut state.engine, entries, now);
            (outcome, state.reconciler.len())
        };
        self.finish_batch(count);
        outcome
    }

    /// Merge updates and apply removals as one batch.
    pub fn apply_update(&self, entries: &[Value], removed: &[String], now: Instant) -> BatchOutcome {
        let (outcome, count) = {
            let mut guard = self.write();
            let state = &mut *guard;
            let outcome = state
                .reconciler
                .apply_update(&mut state.engine, entries, removed, now);
            (outcome, state.reconciler.len())
        };
        self.finish_batch(count);
        outcome
    }

    /// Remove aircraft by id. Returns how many existed.
    pub fn remove(&self, ids: &[String]) -> usize {
        let (removed, count) = {
            let mut guard = self.write();
            let state = &mut *guard;
            let removed = state.reconciler.remove(&mut state.engine, ids);
            (removed, state.reconciler.len())
        };
        self.finish_batch(count);
        removed
    }

    /// Apply one decoded message that concerns the aircraft table.
    ///
    /// Returns `None` for messages that are not about aircraft positions.
    pub fn apply_message(&self, message: &ChannelMessage, now: Instant) -> Option<BatchOutcome> {
        match message {
            ChannelMessage::Snapshot { aircraft } => Some(self.apply_snapshot(aircraft, now)),
            ChannelMessage::Update { aircraft, removed } => {
                Some(self.apply_update(aircraft, removed, now))
            }
            ChannelMessage::Remove { ids } => Some(BatchOutcome {
                removed: self.remove(ids),
                ..BatchOutcome::default()
            }),
            _ => None,
        }
    }

    /// Drop every aircraft.
    pub fn clear(&self) {
        {
            let mut guard = self.write();
            let state = &mut *guard;
            state.reconciler.clear(&mut state.engine);
        }
        self.publish_count(0);
    }

    /// Record a new connection state.
    ///
    /// Anything other than `Connecting`/`Connected` invalidates the tables:
    /// stale positions must not be shown as live.
    pub fn set_connection_state(&self, state: ConnectionState) {
        match state {
            ConnectionState::Disconnected | ConnectionState::Error(_) => {
                self.handle_disconnect(state);
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.connection_tx.send_replace(state);
            }
        }
    }

    /// Clear all tables and publish the disconnected state.
    pub fn handle_disconnect(&self, state: ConnectionState) {
        let had = self.aircraft_count();
        self.clear();
        if had > 0 {
            info!("Connection lost, cleared {had} aircraft");
        }
        self.connection_tx.send_replace(state);
    }

    /// Compute one interpolation frame. Returns whether smoothing is on.
    pub fn frame(&self, now: Instant) -> bool {
        let mut state = self.write();
        state.engine.frame(now);
        state.engine.is_enabled()
    }

    /// Turn smoothing on or off.
    pub fn set_interpolation_enabled(&self, enabled: bool, now: Instant) {
        self.write().engine.set_enabled(enabled, now);
        debug!("Interpolation enabled: {enabled}");
    }

    #[must_use]
    pub fn is_interpolation_enabled(&self) -> bool {
        self.read().engine.is_enabled()
    }

    /// Current (interpolated) position of one aircraft, case-insensitive.
    #[must_use]
    pub fn get_position(&self, id: &str) -> Option<PositionState> {
        let id = normalize_id(id)?;
        self.read().engine.position(&id)
    }

    /// Copy of the whole position table. Meant for occasional bulk reads.
    #[must_use]
    pub fn get_positions_snapshot(&self) -> PositionTable {
        (*self.positions_ref()).clone()
    }

    /// Read-only handle to the current frame's position table.
    ///
    /// No copy is made. The table never changes once handed out; call again
    /// to see the next frame.
    #[must_use]
    pub fn positions_ref(&self) -> Arc<PositionTable> {
        self.read().engine.visual()
    }

    /// Authoritative record of one aircraft, case-insensitive.
    #[must_use]
    pub fn get_aircraft(&self, id: &str) -> Option<Aircraft> {
        self.read().reconciler.get(id).cloned()
    }

    /// All authoritative aircraft records.
    #[must_use]
    pub fn aircraft(&self) -> Vec<Aircraft> {
        self.read().reconciler.aircraft().cloned().collect()
    }

    /// Number of tracked aircraft.
    #[must_use]
    pub fn aircraft_count(&self) -> usize {
        *self.count_tx.borrow()
    }

    /// Watch the aircraft count. Changes at most once per batch.
    #[must_use]
    pub fn watch_aircraft_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }

    /// Number of batches applied since creation.
    #[must_use]
    pub fn batches_applied(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_tx.borrow().clone()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection_tx.subscribe()
    }
}

impl Default for PositionChannels {
    fn default() -> Self {
        Self::new(&InterpolationConfig::default())
    }
}
