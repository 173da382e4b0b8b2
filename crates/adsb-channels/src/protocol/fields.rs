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

//! Field alias normalization for aircraft entries.
//!
//! Different feeds name the same field differently (`hex` vs `icao_hex`,
//! `alt_baro` vs `alt`, `vr` vs `baro_rate`, ...). Aliases are tried in
//! order and the first usable value wins.

use serde_json::{Map, Value};

pub const ID_KEYS: &[&str] = &["hex", "icao_hex", "icao"];
pub const LAT_KEYS: &[&str] = &["lat", "latitude"];
pub const LON_KEYS: &[&str] = &["lon", "lng", "longitude"];
pub const ALT_KEYS: &[&str] = &["alt_baro", "alt", "altitude"];
pub const TRACK_KEYS: &[&str] = &["track", "true_heading", "heading"];
pub const GS_KEYS: &[&str] = &["gs", "ground_speed", "speed"];
pub const VR_KEYS: &[&str] = &["vr", "baro_rate", "geom_rate"];
pub const CALLSIGN_KEYS: &[&str] = &["flight", "callsign"];
pub const SQUAWK_KEYS: &[&str] = &["squawk"];

/// Normalize an aircraft id: trimmed, uppercase, non-empty.
#[must_use]
pub fn normalize_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_uppercase())
    }
}

/// Extract the normalized id of an entry.
#[must_use]
pub fn entry_id(map: &Map<String, Value>) -> Option<String> {
    ID_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .find_map(|value| value.as_str().and_then(normalize_id))
}

/// Read a finite number, accepting numeric strings.
#[must_use]
pub fn as_finite_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// First finite number found under any of `keys`.
#[must_use]
pub fn number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find_map(as_finite_f64)
}

/// Altitude in feet; the literal `"ground"` reads as 0.
#[must_use]
pub fn altitude(map: &Map<String, Value>) -> Option<f64> {
    ALT_KEYS.iter().filter_map(|key| map.get(*key)).find_map(|value| {
        if value.as_str().is_some_and(|s| s.eq_ignore_ascii_case("ground")) {
            Some(0.0)
        } else {
            as_finite_f64(value)
        }
    })
}

/// First non-empty trimmed string under any of `keys`.
#[must_use]
pub fn text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Normalized telemetry read from one entry. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub track: Option<f64>,
    pub gs: Option<f64>,
    pub vr: Option<f64>,
    pub callsign: Option<String>,
    pub squawk: Option<String>,
}

impl Telemetry {
    #[must_use]
    pub fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            lat: number(map, LAT_KEYS),
            lon: number(map, LON_KEYS),
            alt: altitude(map),
            track: number(map, TRACK_KEYS),
            gs: number(map, GS_KEYS),
            vr: number(map, VR_KEYS),
            callsign: text(map, CALLSIGN_KEYS),
            squawk: text(map, SQUAWK_KEYS),
        }
    }

    /// Whether the entry carries a finite position.
    #[must_use]
    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }
}
