// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Linear volume to decibel conversion.
//!
//! Decibel values are integers in hundredths of a dB, which is the unit ALSA
//! reports for playback dB ranges.

/// Linear volume as reported by a PipeWire node (1.0 = unity gain).
pub type VolumeLevel = f32;

/// Decibel value in hundredths of a dB.
pub type DecibelValue = i64;

/// Silence. Clamps to the device minimum.
pub const NEG_INFINITY: DecibelValue = DecibelValue::MIN;

const LOG_FACTOR: f32 = 20.0;
const SCALE: f32 = 100.0;

/// Convert a linear volume to hundredths of a dB.
///
/// Non-positive (and NaN) volumes map to [`NEG_INFINITY`]. The result is
/// rounded half away from zero; out of range floats saturate.
pub fn to_decibel(volume: VolumeLevel) -> DecibelValue {
    if !(volume > 0.0) {
        return NEG_INFINITY;
    }
    (LOG_FACTOR * volume.log10() * SCALE).round() as DecibelValue
}

/// Convert hundredths of a dB back to a linear volume.
pub fn from_decibel(value: DecibelValue) -> VolumeLevel {
    if value == NEG_INFINITY {
        return 0.0;
    }
    10.0_f32.powf(value as f32 / (LOG_FACTOR * SCALE))
}
