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

//! Snapshot and delta reconciliation.
//!
//! The reconciler owns the authoritative aircraft table and feeds position
//! targets into the [`InterpolationEngine`]. Entries are normalized one at a
//! time: an entry without an id or without finite coordinates is skipped and
//! counted, and never aborts the rest of the batch.
//!
//! Messages are applied in arrival order; the last one applied wins.

use std::collections::HashMap;
use std::time::Instant;

use log::debug;
use serde_json::Value;

use crate::engine::InterpolationEngine;
use crate::protocol::fields::{self, Telemetry};
use crate::state::Aircraft;

/// Result of applying one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Entries accepted into the table.
    pub applied: usize,
    /// Entries dropped as malformed.
    pub skipped: usize,
    /// Aircraft removed.
    pub removed: usize,
}

/// Authoritative aircraft table.
#[derive(Debug, Default)]
pub struct Reconciler {
    aircraft: HashMap<String, Aircraft>,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table with `entries`.
    pub fn apply_snapshot(
        &mut self,
        engine: &mut InterpolationEngine,
        entries: &[Value],
        now: Instant,
    ) -> BatchOutcome {
        self.clear(engine);

        let mut outcome = BatchOutcome::default();
        for entry in entries {
            let Some(aircraft) = Aircraft::from_entry(entry) else {
                outcome.skipped += 1;
                continue;
            };
            let Some(position) = aircraft.position() else {
                outcome.skipped += 1;
                continue;
            };

            engine.seed(&aircraft.hex, position, now);
            self.aircraft.insert(aircraft.hex.clone(), aircraft);
            outcome.applied += 1;
        }

        debug!(
            "Snapshot applied: {} aircraft, {} skipped",
            outcome.applied, outcome.skipped
        );
        outcome
    }

    /// Merge updated entries and drop removed ids.
    ///
    /// Updated entries must carry finite coordinates; anything else leaves
    /// the existing record untouched.
    pub fn apply_update(
        &mut self,
        engine: &mut InterpolationEngine,
        entries: &[Value],
        removed: &[String],
        now: Instant,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for entry in entries {
            let Some(map) = entry.as_object() else {
                outcome.skipped += 1;
                continue;
            };
            let Some(id) = fields::entry_id(map) else {
                outcome.skipped += 1;
                continue;
            };
            if !Telemetry::from_map(map).has_position() {
                outcome.skipped += 1;
                continue;
            }

            let aircraft = self
                .aircraft
                .entry(id.clone())
                .or_insert_with(|| Aircraft::new(id.clone()));
            aircraft.merge(map);

            if let Some(position) = aircraft.position() {
                engine.observe(&id, position, now);
                outcome.applied += 1;
            }
        }

        outcome.removed = self.remove(engine, removed);

        debug!(
            "Update applied: {} aircraft, {} skipped, {} removed",
            outcome.applied, outcome.skipped, outcome.removed
        );
        outcome
    }

    /// Remove aircraft by id (case-insensitive). Returns how many existed.
    pub fn remove(&mut self, engine: &mut InterpolationEngine, ids: &[String]) -> usize {
        let mut removed = 0;
        for id in ids.iter().filter_map(|raw| fields::normalize_id(raw)) {
            let known = self.aircraft.remove(&id).is_some();
            let tracked = engine.remove(&id);
            if known || tracked {
                removed += 1;
            }
        }
        removed
    }

    /// Drop every aircraft.
    pub fn clear(&mut self, engine: &mut InterpolationEngine) {
        self.aircraft.clear();
        engine.clear();
    }

    /// Look up one aircraft (case-insensitive).
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Aircraft> {
        fields::normalize_id(id).and_then(|id| self.aircraft.get(&id))
    }

    /// All tracked aircraft, in no particular order.
    pub fn aircraft(&self) -> impl Iterator<Item = &Aircraft> {
        self.aircraft.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InterpolationConfig;
    use crate::state::PositionState;
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> (Reconciler, InterpolationEngine) {
        (
            Reconciler::new(),
            InterpolationEngine::new(&InterpolationConfig::default()),
        )
    }

    #[test]
    fn test_snapshot_replaces_table() {
        let (mut reconciler, mut engine) = setup();
        let now = Instant::now();

        reconciler.apply_snapshot(
            &mut engine,
            &[json!({"hex": "OLD1", "lat": 1.0, "lon": 1.0})],
            now,
        );
        let outcome = reconciler.apply_snapshot(
            &mut engine,
            &[
                json!({"hex": "new1", "lat": 2.0, "lon": 2.0}),
                json!({"hex": "NEW2", "lat": 3.0, "lon": 3.0}),
            ],
            now,
        );

        assert_eq!(outcome, BatchOutcome { applied: 2, skipped: 0, removed: 0 });
        assert!(reconciler.get("OLD1").is_none());
        assert!(engine.target("OLD1").is_none());
        assert!(reconciler.get("NEW1").is_some());
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn test_snapshot_skips_malformed_entries() {
        let (mut reconciler, mut engine) = setup();
        let outcome = reconciler.apply_snapshot(
            &mut engine,
            &[
                json!({"lat": 1.0, "lon": 1.0}),
                json!({"hex": "A1", "lat": "NaN", "lon": 1.0}),
                json!({"hex": "A2"}),
                json!(42),
                json!({"hex": "A3", "lat": 1.0, "lon": 1.0}),
            ],
            Instant::now(),
        );
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.skipped, 4);
        assert_eq!(reconciler.len(), 1);
    }

    #[test]
    fn test_update_shifts_target_to_previous() {
        let (mut reconciler, mut engine) = setup();
        let t0 = Instant::now();
        reconciler.apply_snapshot(
            &mut engine,
            &[json!({"hex": "A1", "lat": 0.0, "lon": 0.0})],
            t0,
        );
        reconciler.apply_update(
            &mut engine,
            &[json!({"hex": "A1", "lat": 1.0, "lon": 1.0})],
            &[],
            t0,
        );

        engine.frame(t0);
        assert_eq!(engine.position("A1"), Some(PositionState::at(0.0, 0.0)));
        engine.frame(t0 + Duration::from_secs(2));
        assert_eq!(engine.position("A1"), Some(PositionState::at(1.0, 1.0)));
    }

    #[test]
    fn test_update_with_nan_leaves_prior_state() {
        let (mut reconciler, mut engine) = setup();
        let t0 = Instant::now();
        reconciler.apply_snapshot(
            &mut engine,
            &[json!({"hex": "A1", "lat": 5.0, "lon": 5.0, "alt": 100})],
            t0,
        );

        let outcome = reconciler.apply_update(
            &mut engine,
            &[
                json!({"hex": "A1", "lat": "NaN", "lon": 6.0, "alt": 200}),
                json!({"hex": "B2", "lat": f64::NAN.to_string(), "lon": 6.0}),
                json!({"hex": "C3", "lat": 7.0, "lon": 7.0}),
            ],
            &[],
            t0,
        );

        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.skipped, 2);
        let a1 = reconciler.get("A1").unwrap();
        assert_eq!(a1.lat, Some(5.0));
        assert_eq!(a1.alt, Some(100.0));
        assert_eq!(engine.target("A1").unwrap().lat, 5.0);
        assert!(reconciler.get("B2").is_none());
        assert!(engine.target("B2").is_none());
        assert!(reconciler.get("C3").is_some());
    }

    #[test]
    fn test_update_merges_fields() {
        let (mut reconciler, mut engine) = setup();
        let t0 = Instant::now();
        reconciler.apply_snapshot(
            &mut engine,
            &[json!({"hex": "A1", "lat": 1.0, "lon": 1.0, "track": 45.0, "flight": "DAL1", "rssi": -3})],
            t0,
        );
        reconciler.apply_update(
            &mut engine,
            &[json!({"hex": "a1", "lat": 1.1, "lon": 1.1, "baro_rate": 0})],
            &[],
            t0,
        );

        let a1 = reconciler.get("A1").unwrap();
        assert_eq!(a1.callsign.as_deref(), Some("DAL1"));
        assert_eq!(a1.track, Some(45.0));
        assert_eq!(a1.vr, Some(0.0));
        assert_eq!(a1.fields.get("rssi"), Some(&json!(-3)));

        let target = engine.target("A1").unwrap();
        assert_eq!(target.track, Some(45.0));
        assert_eq!(target.vr, Some(0.0));
    }

    #[test]
    fn test_update_leaves_other_aircraft_untouched() {
        let (mut reconciler, mut engine) = setup();
        let t0 = Instant::now();
        reconciler.apply_snapshot(
            &mut engine,
            &[
                json!({"hex": "A1", "lat": 1.0, "lon": 1.0}),
                json!({"hex": "B2", "lat": 2.0, "lon": 2.0}),
            ],
            t0,
        );
        reconciler.apply_update(
            &mut engine,
            &[json!({"hex": "A1", "lat": 1.5, "lon": 1.5})],
            &[],
            t0,
        );
        assert_eq!(engine.target("B2"), Some(PositionState::at(2.0, 2.0)));
        assert_eq!(reconciler.len(), 2);
    }

    #[test]
    fn test_removal() {
        let (mut reconciler, mut engine) = setup();
        let t0 = Instant::now();
        reconciler.apply_snapshot(
            &mut engine,
            &[json!({"hex": "ABC123", "lat": 1.0, "lon": 1.0})],
            t0,
        );
        engine.frame(t0);

        let outcome =
            reconciler.apply_update(&mut engine, &[], &["abc123".to_string(), "NOPE".to_string()], t0);
        assert_eq!(outcome.removed, 1);
        assert!(reconciler.get("ABC123").is_none());
        assert!(engine.position("ABC123").is_none());

        engine.frame(t0);
        assert!(engine.position("ABC123").is_none());
    }
}
