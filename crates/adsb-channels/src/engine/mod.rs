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

//! Per-frame position interpolation.
//!
//! Every tracked aircraft keeps its previous and target states plus the
//! instant the target was set. On each frame the engine blends the two with
//! an ease-out cubic curve and publishes the result as a new visual table.
//!
//! The visual table is an `Arc` that is swapped in one assignment per frame.
//! Readers holding an older `Arc` keep a consistent, complete table; nobody
//! ever observes a half-built frame.

mod frame_loop;

pub use frame_loop::FrameLoop;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use crate::interpolation::{ease_out_cubic, finite, finite_or, interpolate_angle, lerp};
use crate::state::PositionState;

/// Table of positions keyed by uppercase aircraft id.
pub type PositionTable = HashMap<String, PositionState>;

/// Configuration for the interpolation engine.
#[derive(Debug, Clone)]
pub struct InterpolationConfig {
    /// Whether positions are smoothed at all.
    pub enabled: bool,
    /// Time to blend from the previous state to a new target.
    pub duration: Duration,
    /// Interval between frames when driven by a [`FrameLoop`].
    pub frame_interval: Duration,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration: Duration::from_millis(1000),
            frame_interval: Duration::from_millis(16),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InterpolationRecord {
    previous: PositionState,
    target: PositionState,
    updated_at: Instant,
}

impl InterpolationRecord {
    fn settled(state: PositionState, now: Instant) -> Self {
        Self {
            previous: state,
            target: state,
            updated_at: now,
        }
    }

    fn blend(&self, now: Instant, duration: Duration) -> PositionState {
        let elapsed = now.saturating_duration_since(self.updated_at);
        let t = if duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
        };
        let eased = ease_out_cubic(t);

        let target = &self.target;
        let previous = &self.previous;

        PositionState {
            lat: finite_or(lerp(previous.lat, target.lat, eased), target.lat),
            lon: finite_or(lerp(previous.lon, target.lon, eased), target.lon),
            alt: finite(target.alt),
            track: blend_track(previous.track, target.track, eased),
            gs: finite(target.gs),
            vr: finite(target.vr),
        }
    }
}

/// Unknown track stays unknown; otherwise take the short arc.
fn blend_track(previous: Option<f64>, target: Option<f64>, t: f64) -> Option<f64> {
    if finite(previous).is_none() && finite(target).is_none() {
        return None;
    }
    Some(interpolate_angle(previous, target, t))
}

/// Interpolation state for all tracked aircraft.
///
/// The engine is the sole writer of the visual table. Ids passed in must
/// already be normalized (see [`crate::protocol::fields::normalize_id`]).
#[derive(Debug)]
pub struct InterpolationEngine {
    records: HashMap<String, InterpolationRecord>,
    visual: Arc<PositionTable>,
    enabled: bool,
    duration: Duration,
}

impl InterpolationEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new(config: &InterpolationConfig) -> Self {
        Self {
            records: HashMap::new(),
            visual: Arc::new(PositionTable::new()),
            enabled: config.enabled,
            duration: config.duration,
        }
    }

    /// Whether smoothing is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Blend duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Turn smoothing on or off.
    ///
    /// Turning it off snaps the visual table to the targets. Turning it on
    /// settles every record at its target so nothing jumps.
    pub fn set_enabled(&mut self, enabled: bool, now: Instant) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;

        for record in self.records.values_mut() {
            *record = InterpolationRecord::settled(record.target, now);
        }
        self.visual = Arc::new(
            self.records
                .iter()
                .map(|(id, record)| (id.clone(), record.target))
                .collect(),
        );
        debug!("Interpolation {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Start tracking `id` at `state` with no motion.
    pub fn seed(&mut self, id: &str, state: PositionState, now: Instant) {
        self.records
            .insert(id.to_string(), InterpolationRecord::settled(state, now));
        self.write_through(id, state);
    }

    /// Record a new target for `id`.
    ///
    /// The current target becomes the start of the next blend. Unknown ids
    /// are seeded with no motion.
    pub fn observe(&mut self, id: &str, state: PositionState, now: Instant) {
        match self.records.get_mut(id) {
            Some(record) => {
                record.previous = record.target;
                record.target = state;
                record.updated_at = now;
            }
            None => {
                self.records
                    .insert(id.to_string(), InterpolationRecord::settled(state, now));
            }
        }
        self.write_through(id, state);
    }

    /// Stop tracking `id`. It disappears from the visual table immediately.
    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.records.remove(id).is_some();
        if self.visual.contains_key(id) {
            Arc::make_mut(&mut self.visual).remove(id);
        }
        removed
    }

    /// Drop every record and the visual table.
    pub fn clear(&mut self) {
        self.records.clear();
        self.visual = Arc::new(PositionTable::new());
    }

    /// Number of tracked aircraft.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Recompute the visual table for `now`.
    ///
    /// Does nothing while smoothing is disabled; writes go straight to the
    /// visual table in that mode.
    pub fn frame(&mut self, now: Instant) {
        if !self.enabled {
            return;
        }

        let table: PositionTable = self
            .records
            .iter()
            .map(|(id, record)| (id.clone(), record.blend(now, self.duration)))
            .collect();

        self.visual = Arc::new(table);
    }

    /// Shared handle to the current visual table.
    #[must_use]
    pub fn visual(&self) -> Arc<PositionTable> {
        Arc::clone(&self.visual)
    }

    /// Current visual state of `id`.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<PositionState> {
        self.visual.get(id).copied()
    }

    /// Latest authoritative target for `id`.
    #[must_use]
    pub fn target(&self, id: &str) -> Option<PositionState> {
        self.records.get(id).map(|record| record.target)
    }

    fn write_through(&mut self, id: &str, state: PositionState) {
        if !self.enabled {
            Arc::make_mut(&mut self.visual).insert(id.to_string(), state);
        }
    }
}
