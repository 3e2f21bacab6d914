// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hardware mixer capability used by the synchronizer.

use crate::decibel::DecibelValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixerError {
    #[error("Failed to open mixer: {0}")]
    Open(String),
    #[error("Failed to attach card '{card}': {reason}")]
    Attach { card: String, reason: String },
    #[error("Failed to register simple elements: {0}")]
    Register(String),
    #[error("Failed to load mixer elements: {0}")]
    Load(String),
    #[error("Mixer control '{name}',{index} not found")]
    ElementNotFound { name: String, index: u32 },
    #[error("Mixer control has no playback dB range")]
    RangeUnavailable,
    #[error("Failed to get mixer poll descriptor: {0}")]
    PollDescriptor(String),
    #[error("Mixer is not initialized")]
    Unavailable,
    #[error("Mixer read failed: {0}")]
    Read(String),
    #[error("Mixer write failed: {0}")]
    Write(String),
    #[error("No playback switch available for mute")]
    NoMuteSwitch,
}

/// Inclusive playback dB range reported by a mixer element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecibelRange {
    pub min: DecibelValue,
    pub max: DecibelValue,
}

impl DecibelRange {
    pub fn new(min: DecibelValue, max: DecibelValue) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: DecibelValue) -> DecibelValue {
        value.clamp(self.min, self.max)
    }
}

/// Result of a hardware write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Value asked for by the caller, before clamping.
    pub requested: DecibelValue,
    /// Value actually written, clamped into the element range.
    pub applied: DecibelValue,
    /// Value read back before the write, if the read succeeded.
    pub before: Option<DecibelValue>,
    /// Value read back after the write, if the read succeeded.
    pub after: Option<DecibelValue>,
}

impl WriteOutcome {
    /// Whether the write produced an observable change.
    ///
    /// A failed read on either side counts as a change.
    pub fn changed(&self) -> bool {
        match (self.before, self.after) {
            (Some(before), Some(after)) => before != after,
            _ => true,
        }
    }

    /// Best known hardware value after the write.
    pub fn current(&self) -> DecibelValue {
        self.after.unwrap_or(self.applied)
    }
}

/// Playback volume control of one hardware mixer element.
pub trait HardwareMixer {
    /// Supported playback dB range.
    fn range(&self) -> DecibelRange;

    /// Read the current playback level on the reference channel.
    fn get_decibel(&self) -> Result<DecibelValue, MixerError>;

    /// Clamp `value` into [`HardwareMixer::range`] and write it to all channels.
    fn set_decibel(&mut self, value: DecibelValue) -> Result<WriteOutcome, MixerError>;

    /// Whether the playback switch is off.
    fn is_muted(&self) -> Result<bool, MixerError>;

    /// Invert the playback switch on all channels.
    fn toggle_mute(&mut self) -> Result<(), MixerError>;
}
