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

//! Aircraft state types shared by the reconciler, the engine and the query
//! surface.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::protocol::fields;

/// Position and telemetry of one aircraft at one point in time.
///
/// Unknown values are `None`, never zero. Zero is a valid vertical rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionState {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Altitude in feet.
    pub alt: Option<f64>,
    /// Track over ground in degrees, `[0, 360)`.
    pub track: Option<f64>,
    /// Ground speed in knots.
    pub gs: Option<f64>,
    /// Vertical rate in feet per minute.
    pub vr: Option<f64>,
}

impl PositionState {
    /// Build a state from a position, leaving all telemetry unknown.
    #[must_use]
    pub fn at(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            alt: None,
            track: None,
            gs: None,
            vr: None,
        }
    }

    /// Whether both coordinates are finite.
    #[must_use]
    pub fn is_trackable(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// Authoritative record of one aircraft as last reported by the server.
///
/// `fields` keeps every key the server ever sent for this aircraft, so
/// fields this crate does not understand survive a merge untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aircraft {
    /// ICAO 24-bit address, uppercase hex.
    pub hex: String,
    /// Latitude in degrees.
    pub lat: Option<f64>,
    /// Longitude in degrees.
    pub lon: Option<f64>,
    /// Altitude in feet.
    pub alt: Option<f64>,
    /// Track over ground in degrees, `[0, 360)`.
    pub track: Option<f64>,
    /// Ground speed in knots.
    pub gs: Option<f64>,
    /// Vertical rate in feet per minute.
    pub vr: Option<f64>,
    /// Flight callsign, trimmed.
    pub callsign: Option<String>,
    /// Mode A squawk code.
    pub squawk: Option<String>,
    /// Raw merged fields as received.
    pub fields: Map<String, Value>,
}

impl Aircraft {
    /// Create an empty record for the given (already normalized) id.
    #[must_use]
    pub fn new(hex: String) -> Self {
        Self {
            hex,
            lat: None,
            lon: None,
            alt: None,
            track: None,
            gs: None,
            vr: None,
            callsign: None,
            squawk: None,
            fields: Map::new(),
        }
    }

    /// Create a record from one JSON entry.
    ///
    /// Returns `None` if the entry is not an object or carries no id.
    #[must_use]
    pub fn from_entry(entry: &Value) -> Option<Self> {
        let map = entry.as_object()?;
        let hex = fields::entry_id(map)?;
        let mut aircraft = Self::new(hex);
        aircraft.merge(map);
        Some(aircraft)
    }

    /// Merge a partial entry into this record.
    ///
    /// Present, valid values overwrite; absent or non-finite ones keep the
    /// previous value.
    pub fn merge(&mut self, map: &Map<String, Value>) {
        let incoming = fields::Telemetry::from_map(map);

        self.lat = incoming.lat.or(self.lat);
        self.lon = incoming.lon.or(self.lon);
        self.alt = incoming.alt.or(self.alt);
        self.track = incoming.track.or(self.track);
        self.gs = incoming.gs.or(self.gs);
        self.vr = incoming.vr.or(self.vr);
        if incoming.callsign.is_some() {
            self.callsign = incoming.callsign;
        }
        if incoming.squawk.is_some() {
            self.squawk = incoming.squawk;
        }

        for (key, value) in map {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Current position state, if the record has finite coordinates.
    #[must_use]
    pub fn position(&self) -> Option<PositionState> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some(PositionState {
                lat,
                lon,
                alt: self.alt,
                track: self.track,
                gs: self.gs,
                vr: self.vr,
            }),
            _ => None,
        }
    }
}
