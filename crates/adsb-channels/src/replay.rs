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

//! Replay of recorded aircraft tracks.
//!
//! History and safety-event views scrub through a recorded track at an
//! explicit time rather than following live data. Positions between two
//! recorded points are linearly interpolated; the track angle takes the
//! short arc.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::interpolation::{finite_or, interpolate_angle, lerp, lerp_option};
use crate::protocol::fields::Telemetry;
use crate::state::PositionState;

const TIMESTAMP_KEYS: &[&str] = &["timestamp", "time", "ts"];

/// One recorded sample of an aircraft track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub timestamp: DateTime<Utc>,
    pub state: PositionState,
}

impl TrackPoint {
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, state: PositionState) -> Self {
        Self { timestamp, state }
    }

    /// Read a point from a history API entry.
    ///
    /// Accepts the same field aliases as live entries. Returns `None` when
    /// the timestamp or a finite position is missing.
    #[must_use]
    pub fn from_map(map: &Map<String, Value>) -> Option<Self> {
        let timestamp = TIMESTAMP_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .filter_map(Value::as_str)
            .find_map(|s| DateTime::parse_from_rfc3339(s).ok())?
            .with_timezone(&Utc);

        let telemetry = Telemetry::from_map(map);
        let state = PositionState {
            lat: telemetry.lat?,
            lon: telemetry.lon?,
            alt: telemetry.alt,
            track: telemetry.track,
            gs: telemetry.gs,
            vr: telemetry.vr,
        };
        Some(Self { timestamp, state })
    }
}

impl<'de> Deserialize<'de> for TrackPoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_map(&map).ok_or_else(|| {
            serde::de::Error::custom("track point needs a RFC 3339 timestamp and finite lat/lon")
        })
    }
}

/// A time-ordered recorded track.
#[derive(Debug, Clone, Default)]
pub struct TrackReplay {
    points: Vec<TrackPoint>,
}

impl TrackReplay {
    /// Build a replay, dropping points with non-finite coordinates and
    /// sorting by time.
    #[must_use]
    pub fn new(points: impl IntoIterator<Item = TrackPoint>) -> Self {
        let mut points: Vec<TrackPoint> = points
            .into_iter()
            .filter(|point| point.state.is_trackable())
            .collect();
        points.sort_by_key(|point| point.timestamp);
        Self { points }
    }

    /// Build a replay from raw history entries, skipping unusable ones.
    #[must_use]
    pub fn from_entries(entries: &[Value]) -> Self {
        Self::new(
            entries
                .iter()
                .filter_map(Value::as_object)
                .filter_map(TrackPoint::from_map),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    #[must_use]
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|point| point.timestamp)
    }

    #[must_use]
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|point| point.timestamp)
    }

    /// Time covered by the track.
    #[must_use]
    pub fn duration(&self) -> ChronoDuration {
        match (self.start(), self.end()) {
            (Some(start), Some(end)) => end - start,
            _ => ChronoDuration::zero(),
        }
    }

    /// Position at `at`, clamped to the first and last recorded points.
    #[must_use]
    pub fn position_at(&self, at: DateTime<Utc>) -> Option<PositionState> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if at <= first.timestamp {
            return Some(first.state);
        }
        if at >= last.timestamp {
            return Some(last.state);
        }

        // First point strictly after `at`; both neighbours exist here
        let upper = self.points.partition_point(|point| point.timestamp <= at);
        let before = &self.points[upper - 1];
        let after = &self.points[upper];

        let span = (after.timestamp - before.timestamp).num_milliseconds();
        if span <= 0 {
            return Some(after.state);
        }
        #[allow(clippy::cast_precision_loss, reason = "millisecond spans fit f64 exactly")]
        let t = ((at - before.timestamp).num_milliseconds() as f64 / span as f64).clamp(0.0, 1.0);

        Some(blend(&before.state, &after.state, t))
    }

    /// Sample the track every `step` from start to end (inclusive).
    #[must_use]
    pub fn sample_every(&self, step: ChronoDuration) -> Vec<(DateTime<Utc>, PositionState)> {
        let (Some(start), Some(end)) = (self.start(), self.end()) else {
            return Vec::new();
        };
        if step <= ChronoDuration::zero() {
            return Vec::new();
        }

        let mut samples = Vec::new();
        let mut at = start;
        while at < end {
            if let Some(state) = self.position_at(at) {
                samples.push((at, state));
            }
            at += step;
        }
        if let Some(state) = self.position_at(end) {
            samples.push((end, state));
        }
        samples
    }
}

fn blend(from: &PositionState, to: &PositionState, t: f64) -> PositionState {
    PositionState {
        lat: finite_or(lerp(from.lat, to.lat, t), to.lat),
        lon: finite_or(lerp(from.lon, to.lon, t), to.lon),
        alt: lerp_option(from.alt, to.alt, t),
        track: if from.track.is_none() && to.track.is_none() {
            None
        } else {
            Some(interpolate_angle(from.track, to.track, t))
        },
        gs: lerp_option(from.gs, to.gs, t),
        vr: lerp_option(from.vr, to.vr, t),
    }
}

/// Position of every aircraft involved in an event at instant `at`.
///
/// Aircraft whose tracks are empty are left out.
#[must_use]
pub fn replay_event<S: std::hash::BuildHasher>(
    tracks: &HashMap<String, TrackReplay, S>,
    at: DateTime<Utc>,
) -> HashMap<String, PositionState> {
    tracks
        .iter()
        .filter_map(|(id, track)| track.position_at(at).map(|state| (id.clone(), state)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn point(secs: i64, lat: f64, lon: f64, track: Option<f64>) -> TrackPoint {
        TrackPoint::new(
            at(secs),
            PositionState {
                track,
                ..PositionState::at(lat, lon)
            },
        )
    }

    #[test]
    fn test_position_at_interpolates() {
        let replay = TrackReplay::new(vec![
            point(0, 0.0, 0.0, Some(90.0)),
            point(10, 1.0, 2.0, Some(90.0)),
        ]);
        let mid = replay.position_at(at(5)).unwrap();
        assert!((mid.lat - 0.5).abs() < 1e-9);
        assert!((mid.lon - 1.0).abs() < 1e-9);
        assert!((mid.track.unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_at_clamps() {
        let replay = TrackReplay::new(vec![point(0, 0.0, 0.0, None), point(10, 1.0, 1.0, None)]);
        assert_eq!(replay.position_at(at(-5)).unwrap().lat, 0.0);
        assert_eq!(replay.position_at(at(50)).unwrap().lat, 1.0);
        assert!(TrackReplay::default().position_at(at(0)).is_none());
    }

    #[test]
    fn test_track_takes_short_arc() {
        let replay = TrackReplay::new(vec![
            point(0, 0.0, 0.0, Some(350.0)),
            point(10, 0.0, 0.0, Some(10.0)),
        ]);
        let track = replay.position_at(at(5)).unwrap().track.unwrap();
        assert!(track < 1e-9 || track > 360.0 - 1e-9, "got {track}");
    }

    #[test]
    fn test_unsorted_and_bad_points() {
        let replay = TrackReplay::new(vec![
            point(10, 1.0, 1.0, None),
            point(5, f64::NAN, 1.0, None),
            point(0, 0.0, 0.0, None),
        ]);
        assert_eq!(replay.len(), 2);
        assert_eq!(replay.start(), Some(at(0)));
        assert_eq!(replay.duration(), ChronoDuration::seconds(10));
    }

    #[test]
    fn test_from_entries() {
        let entries = vec![
            json!({"timestamp": "2024-01-01T12:00:00Z", "lat": 34.0, "lon": -118.0, "alt_baro": 5000, "track": 10}),
            json!({"time": "2024-01-01T12:00:10Z", "latitude": 34.1, "longitude": -118.1, "alt": 6000}),
            json!({"timestamp": "not a time", "lat": 1.0, "lon": 1.0}),
            json!({"timestamp": "2024-01-01T12:00:20Z"}),
        ];
        let replay = TrackReplay::from_entries(&entries);
        assert_eq!(replay.len(), 2);

        let start = replay.start().unwrap();
        let mid = replay.position_at(start + ChronoDuration::seconds(5)).unwrap();
        assert!((mid.alt.unwrap() - 5500.0).abs() < 1e-9);
        // Only one side has a track
        assert!((mid.track.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_deserialize_track_point() {
        let point: TrackPoint = serde_json::from_value(json!({
            "ts": "2024-01-01T12:00:00+00:00", "lat": 1.0, "lon": 2.0, "vr": 0
        }))
        .unwrap();
        assert_eq!(point.state.vr, Some(0.0));
        assert!(serde_json::from_value::<TrackPoint>(json!({"lat": 1.0})).is_err());
    }

    #[test]
    fn test_sample_every() {
        let replay = TrackReplay::new(vec![point(0, 0.0, 0.0, None), point(10, 1.0, 1.0, None)]);
        let samples = replay.sample_every(ChronoDuration::seconds(4));
        let times: Vec<_> = samples.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![at(0), at(4), at(8), at(10)]);
        assert!(replay.sample_every(ChronoDuration::zero()).is_empty());
    }

    #[test]
    fn test_replay_event() {
        let mut tracks = HashMap::new();
        tracks.insert(
            "A1".to_string(),
            TrackReplay::new(vec![point(0, 0.0, 0.0, None), point(10, 1.0, 1.0, None)]),
        );
        tracks.insert(
            "B2".to_string(),
            TrackReplay::new(vec![point(0, 5.0, 5.0, None), point(10, 5.0, 6.0, None)]),
        );
        tracks.insert("C3".to_string(), TrackReplay::default());

        let positions = replay_event(&tracks, at(5));
        assert_eq!(positions.len(), 2);
        assert!((positions["B2"].lon - 5.5).abs() < 1e-9);
    }
}
