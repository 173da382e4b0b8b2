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

//! Angular and scalar interpolation primitives.
//!
//! Everything in here is pure: no clocks, no tables, no I/O. The engine and
//! the track replay both build on these.

/// Return `value` if it is finite, otherwise `fallback`.
#[must_use]
pub fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Keep only finite values.
#[must_use]
pub fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Normalize an angle in degrees to `[0, 360)`.
#[must_use]
pub fn normalize_angle(degrees: f64) -> f64 {
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Ease-out cubic: `1 - (1 - t)^3`, with `t` clamped to `[0, 1]`.
#[must_use]
pub fn ease_out_cubic(t: f64) -> f64 {
    let t = if t.is_nan() { 1.0 } else { t.clamp(0.0, 1.0) };
    1.0 - (1.0 - t).powi(3)
}

/// Linear interpolation between `from` and `to`.
#[must_use]
pub fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

/// Null-safe linear interpolation.
///
/// When one side is unknown the other side is returned as-is; when both
/// are unknown the result is unknown.
#[must_use]
pub fn lerp_option(from: Option<f64>, to: Option<f64>, t: f64) -> Option<f64> {
    match (finite(from), finite(to)) {
        (Some(a), Some(b)) => Some(finite_or(lerp(a, b, t), b)),
        (None, Some(b)) => Some(b),
        (Some(a), None) => Some(a),
        (None, None) => None,
    }
}

/// Interpolate between two bearings along the shortest arc.
///
/// A turn from 350° to 10° goes through north (20°), never the long way
/// round through 180°. Missing or non-finite inputs fall back to the other
/// side, then to 0. The result is always in `[0, 360)`.
#[must_use]
pub fn interpolate_angle(from: Option<f64>, to: Option<f64>, t: f64) -> f64 {
    let (from, to) = match (finite(from), finite(to)) {
        (Some(from), Some(to)) => (from, to),
        (None, Some(to)) => return normalize_angle(to),
        (Some(from), None) => return normalize_angle(from),
        (None, None) => return 0.0,
    };

    let from = normalize_angle(from);
    let to = normalize_angle(to);

    let mut diff = to - from;
    if diff > 180.0 {
        diff -= 360.0;
    } else if diff < -180.0 {
        diff += 360.0;
    }

    let result = normalize_angle(from + diff * t);
    finite_or(result, 0.0)
}
