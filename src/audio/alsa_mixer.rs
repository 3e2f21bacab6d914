// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! ALSA simple mixer element control.
//!
//! Wraps one playback element (e.g. `'PCM',1` on the default card) behind the
//! [`HardwareMixer`] trait. The mixer's poll descriptor is exposed so the
//! PipeWire loop can watch it; readiness is handled by [`AlsaMixer::drain_events`].

use crate::config::MixerConfig;
use alsa::mixer::{MilliBel, Mixer, Round, Selem, SelemChannelId, SelemId};
use alsa::PollDescriptors;
use piper_sync::{DecibelRange, DecibelValue, HardwareMixer, MixerError, WriteOutcome};
use std::ffi::CString;
use std::os::fd::{AsRawFd, RawFd};
use tracing::{debug, info, trace};

/// Channel read back for level and switch queries.
const REFERENCE_CHANNEL: SelemChannelId = SelemChannelId::FrontLeft;

/// Raw poll descriptor of the mixer, registered as a loop IO source.
///
/// Only valid while the owning [`AlsaMixer`] is initialized.
pub struct MixerFd(RawFd);

impl AsRawFd for MixerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

pub struct AlsaMixer {
    mixer: Option<Mixer>,
    id: SelemId,
    range: DecibelRange,
}

impl AlsaMixer {
    /// Open the card and resolve the configured element.
    ///
    /// Every failure drops whatever was opened so far.
    pub fn init(config: &MixerConfig) -> Result<Self, MixerError> {
        let mut mixer = Mixer::open(false).map_err(|e| MixerError::Open(e.to_string()))?;

        let card = CString::new(config.card.as_str()).map_err(|e| MixerError::Attach {
            card: config.card.clone(),
            reason: e.to_string(),
        })?;
        mixer.attach(&card).map_err(|e| MixerError::Attach {
            card: config.card.clone(),
            reason: e.to_string(),
        })?;
        Selem::register(&mut mixer).map_err(|e| MixerError::Register(e.to_string()))?;
        mixer.load().map_err(|e| MixerError::Load(e.to_string()))?;

        let id = SelemId::new(&config.control, config.index);
        let range = {
            let selem = mixer.find_selem(&id).ok_or_else(|| MixerError::ElementNotFound {
                name: config.control.clone(),
                index: config.index,
            })?;
            let (MilliBel(min), MilliBel(max)) = selem.get_playback_db_range();
            checked_range(selem.has_playback_volume(), min, max)?
        };

        info!(
            "ALSA mixer control '{}',{} on '{}': dB range {} - {}",
            config.control, config.index, config.card, range.min, range.max
        );

        Ok(Self {
            mixer: Some(mixer),
            id,
            range,
        })
    }

    /// Poll descriptor for mixer event notification.
    pub fn poll_fd(&self) -> Result<MixerFd, MixerError> {
        let mixer = self.mixer.as_ref().ok_or(MixerError::Unavailable)?;
        let fds = PollDescriptors::get(mixer).map_err(|e| MixerError::PollDescriptor(e.to_string()))?;
        match fds.first() {
            Some(pfd) if fds.len() == 1 => Ok(MixerFd(pfd.fd)),
            _ => Err(MixerError::PollDescriptor(format!(
                "expected 1 descriptor, got {}",
                fds.len()
            ))),
        }
    }

    /// Handle every pending mixer event. Returns how many were handled.
    pub fn drain_events(&mut self) -> Result<u32, MixerError> {
        let mixer = self.mixer.as_ref().ok_or(MixerError::Unavailable)?;
        let handled = mixer
            .handle_events()
            .map_err(|e| MixerError::Read(e.to_string()))?;
        trace!("Handled {} mixer events", handled);
        Ok(handled)
    }

    /// Close the mixer. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.mixer.take().is_some() {
            debug!("ALSA mixer closed");
        }
    }

    fn selem(&self) -> Result<Selem<'_>, MixerError> {
        self.mixer
            .as_ref()
            .and_then(|mixer| mixer.find_selem(&self.id))
            .ok_or(MixerError::Unavailable)
    }
}

impl HardwareMixer for AlsaMixer {
    fn range(&self) -> DecibelRange {
        self.range
    }

    fn get_decibel(&self) -> Result<DecibelValue, MixerError> {
        let MilliBel(value) = self
            .selem()?
            .get_playback_vol_db(REFERENCE_CHANNEL)
            .map_err(|e| MixerError::Read(e.to_string()))?;
        Ok(value)
    }

    fn set_decibel(&mut self, value: DecibelValue) -> Result<WriteOutcome, MixerError> {
        let selem = self.selem()?;
        write_level(
            self.range,
            value,
            || self.get_decibel(),
            |level, round| {
                trace!("Setting playback level {:?} (requested {})", level, value);
                selem
                    .set_playback_db_all(level, round)
                    .map_err(|e| MixerError::Write(e.to_string()))
            },
        )
    }

    fn is_muted(&self) -> Result<bool, MixerError> {
        let selem = self.selem()?;
        switch_muted(selem.has_playback_switch(), || {
            selem
                .get_playback_switch(REFERENCE_CHANNEL)
                .map_err(|e| MixerError::Read(e.to_string()))
        })
    }

    fn toggle_mute(&mut self) -> Result<(), MixerError> {
        let selem = self.selem()?;
        toggle_switch(
            selem.has_playback_switch(),
            || {
                selem
                    .get_playback_switch(REFERENCE_CHANNEL)
                    .map_err(|e| MixerError::Read(e.to_string()))
            },
            |toggled| {
                selem
                    .set_playback_switch_all(toggled)
                    .map_err(|e| MixerError::Write(e.to_string()))
            },
        )
    }
}

impl Drop for AlsaMixer {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Validate the dB range reported by an element.
fn checked_range(
    has_volume: bool,
    min: DecibelValue,
    max: DecibelValue,
) -> Result<DecibelRange, MixerError> {
    if !has_volume || min >= max {
        return Err(MixerError::RangeUnavailable);
    }
    Ok(DecibelRange::new(min, max))
}

/// Level and rounding handed to ALSA for a requested value.
///
/// Values between two hardware steps round down, so a write never ends up
/// louder than asked for.
fn playback_target(range: DecibelRange, value: DecibelValue) -> (MilliBel, Round) {
    (MilliBel(range.clamp(value)), Round::Floor)
}

/// Clamp `value`, write it and read the level on both sides of the write.
fn write_level(
    range: DecibelRange,
    value: DecibelValue,
    read: impl Fn() -> Result<DecibelValue, MixerError>,
    write: impl FnOnce(MilliBel, Round) -> Result<(), MixerError>,
) -> Result<WriteOutcome, MixerError> {
    let (level, round) = playback_target(range, value);
    let MilliBel(applied) = level;

    let before = read().ok();
    write(level, round)?;

    Ok(WriteOutcome {
        requested: value,
        applied,
        before,
        after: read().ok(),
    })
}

fn switch_muted(
    has_switch: bool,
    read: impl FnOnce() -> Result<i32, MixerError>,
) -> Result<bool, MixerError> {
    if !has_switch {
        return Err(MixerError::NoMuteSwitch);
    }
    Ok(read()? == 0)
}

/// Invert the playback switch. Nothing is read or written without a switch.
fn toggle_switch(
    has_switch: bool,
    read: impl FnOnce() -> Result<i32, MixerError>,
    write: impl FnOnce(i32) -> Result<(), MixerError>,
) -> Result<(), MixerError> {
    if !has_switch {
        return Err(MixerError::NoMuteSwitch);
    }
    let on = read()?;
    let toggled = i32::from(on == 0);
    write(toggled)?;
    debug!("Playback switch {} -> {}", on, toggled);
    Ok(())
}
