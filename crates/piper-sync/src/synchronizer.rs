// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Volume synchronization between the watched node and the hardware mixer.
//!
//! Both edges run on the PipeWire loop thread, so every event is handled to
//! completion before the next one and no locking is needed.

use crate::decibel::{from_decibel, to_decibel, DecibelValue, VolumeLevel};
use crate::mixer::{HardwareMixer, MixerError, WriteOutcome};
use crate::suppression::{Origin, SuppressionState};
use tracing::{debug, info, trace, warn};

/// Write access to the node's channel volumes.
pub trait VolumeSink {
    fn set_channel_volumes(&self, volumes: &[f32]) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Propagate hardware changes back to the node.
    pub bidirectional: bool,
    /// Follow the node's mute state with the hardware playback switch.
    pub mute: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            bidirectional: true,
            mute: true,
        }
    }
}

pub struct Synchronizer<M: HardwareMixer> {
    hardware: M,
    options: SyncOptions,
    suppression: SuppressionState,
    /// Last hardware level we wrote or observed.
    last_hardware: Option<DecibelValue>,
    /// Clamped level of the last node report.
    last_node: Option<DecibelValue>,
    /// Mute state of the last node report that was applied.
    last_node_mute: Option<bool>,
    /// Channel count of the last node report; 0 until the node reported.
    channels: usize,
    mute_unsupported: bool,
}

impl<M: HardwareMixer> Synchronizer<M> {
    pub fn new(hardware: M, options: SyncOptions) -> Self {
        let last_hardware = hardware.get_decibel().ok();
        Self {
            hardware,
            options,
            suppression: SuppressionState::new(),
            last_hardware,
            last_node: None,
            last_node_mute: None,
            channels: 0,
            mute_unsupported: false,
        }
    }

    pub fn hardware_mut(&mut self) -> &mut M {
        &mut self.hardware
    }

    /// Forget everything learned from the node. Called when it goes away.
    pub fn reset_node(&mut self) {
        self.suppression.clear();
        self.last_node = None;
        self.last_node_mute = None;
        self.channels = 0;
    }

    /// Handle a channel volume report from the node.
    ///
    /// An empty report is ignored. Returns the hardware write, if one happened.
    pub fn on_node_volumes(
        &mut self,
        volumes: &[f32],
    ) -> Result<Option<WriteOutcome>, MixerError> {
        if volumes.is_empty() {
            trace!("Node reported no channel volumes");
            return Ok(None);
        }

        self.channels = volumes.len();
        let average = volumes.iter().sum::<f32>() / volumes.len() as f32;
        self.on_software_volume(average)
    }

    /// Push an averaged node volume to the hardware.
    ///
    /// While writes to the node are in flight, a report matching one of them
    /// is its echo, and a report repeating the previous node level predates
    /// them. Neither reaches the hardware.
    pub fn on_software_volume(
        &mut self,
        volume: VolumeLevel,
    ) -> Result<Option<WriteOutcome>, MixerError> {
        let requested = to_decibel(volume);
        let target = self.hardware.range().clamp(requested);
        let previous = self.last_node.replace(target);

        let origin = if self.suppression.is_engaged() {
            if self.suppression.consume_echo(target) {
                debug!("Node echoed our write ({}), not pushing to hardware", target);
                return Ok(None);
            }
            if previous == Some(target) {
                debug!("Stale node report ({}) while our writes are in flight", target);
                return Ok(None);
            }
            Origin::Internal
        } else {
            Origin::External
        };

        let outcome = match self.hardware.set_decibel(requested) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.suppression.clear();
                return Err(e);
            }
        };
        self.suppression.record_write(origin, &outcome);
        self.last_hardware = Some(outcome.current());

        debug!(
            "Node volume {:.3} -> hardware {} (requested {}, {:?})",
            volume, outcome.applied, outcome.requested, origin
        );
        Ok(Some(outcome))
    }

    /// Follow the node's mute state. Returns true if the switch was toggled.
    ///
    /// Only a change of the node's mute state is applied, so a mute made on
    /// the hardware itself holds until the node's state changes. A missing
    /// playback switch is reported once, later calls are no-ops.
    pub fn on_node_mute(&mut self, muted: bool) -> Result<bool, MixerError> {
        if !self.options.mute || self.mute_unsupported {
            return Ok(false);
        }
        if self.last_node_mute == Some(muted) {
            trace!("Node mute unchanged ({})", muted);
            return Ok(false);
        }

        let result = match self.hardware.is_muted() {
            Ok(hw_muted) if hw_muted == muted => Ok(false),
            Ok(_) => self.hardware.toggle_mute().map(|()| true),
            Err(e) => Err(e),
        };

        match result {
            Ok(toggled) => {
                self.last_node_mute = Some(muted);
                if toggled {
                    info!("Hardware mute set to {}", muted);
                }
                Ok(toggled)
            }
            Err(MixerError::NoMuteSwitch) => {
                self.mute_unsupported = true;
                Err(MixerError::NoMuteSwitch)
            }
            Err(e) => Err(e),
        }
    }

    /// Handle a batch of hardware mixer events.
    ///
    /// Returns true if the new level was written to the node.
    pub fn on_hardware_change(
        &mut self,
        sink: Option<&dyn VolumeSink>,
    ) -> Result<bool, MixerError> {
        let current = self.hardware.get_decibel()?;
        if self.last_hardware == Some(current) {
            trace!("Hardware level unchanged at {}", current);
            return Ok(false);
        }
        self.last_hardware = Some(current);

        if !self.options.bidirectional {
            debug!("Hardware level changed to {}, reverse sync disabled", current);
            return Ok(false);
        }
        let Some(sink) = sink else {
            debug!("Hardware level changed to {}, no node bound", current);
            return Ok(false);
        };
        if self.channels == 0 {
            debug!("Hardware level changed to {}, node channels not known yet", current);
            return Ok(false);
        }

        let volume = from_decibel(current);
        let volumes = vec![volume; self.channels];

        self.suppression.engage(current);
        if let Err(e) = sink.set_channel_volumes(&volumes) {
            self.suppression.clear();
            warn!("Failed to set node volume: {}", e);
            return Ok(false);
        }

        info!("Hardware level {} -> node volume {:.3}", current, volume);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::DecibelRange;
    use std::cell::RefCell;

    struct FakeMixer {
        range: DecibelRange,
        value: DecibelValue,
        /// Playback switch, `None` when the element has none.
        switch: Option<bool>,
        writes: usize,
    }

    impl FakeMixer {
        fn new() -> Self {
            Self {
                range: DecibelRange::new(-5772, -135),
                value: -3000,
                switch: Some(true),
                writes: 0,
            }
        }
    }

    impl HardwareMixer for FakeMixer {
        fn range(&self) -> DecibelRange {
            self.range
        }

        fn get_decibel(&self) -> Result<DecibelValue, MixerError> {
            Ok(self.value)
        }

        fn set_decibel(&mut self, value: DecibelValue) -> Result<WriteOutcome, MixerError> {
            let before = self.value;
            let applied = self.range.clamp(value);
            self.value = applied;
            self.writes += 1;
            Ok(WriteOutcome {
                requested: value,
                applied,
                before: Some(before),
                after: Some(self.value),
            })
        }

        fn is_muted(&self) -> Result<bool, MixerError> {
            self.switch.map(|on| !on).ok_or(MixerError::NoMuteSwitch)
        }

        fn toggle_mute(&mut self) -> Result<(), MixerError> {
            let on = self.switch.ok_or(MixerError::NoMuteSwitch)?;
            self.switch = Some(!on);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSink {
        writes: RefCell<Vec<Vec<f32>>>,
    }

    impl VolumeSink for FakeSink {
        fn set_channel_volumes(&self, volumes: &[f32]) -> Result<(), String> {
            self.writes.borrow_mut().push(volumes.to_vec());
            Ok(())
        }
    }

    fn sync() -> Synchronizer<FakeMixer> {
        Synchronizer::new(FakeMixer::new(), SyncOptions::default())
    }

    #[test]
    fn test_stereo_half_volume() {
        let mut sync = sync();
        let outcome = sync.on_node_volumes(&[0.5, 0.5]).unwrap().unwrap();
        assert_eq!(outcome.requested, -602);
        assert_eq!(outcome.applied, -602);
        assert_eq!(sync.hardware.value, -602);
    }

    #[test]
    fn test_channels_are_averaged() {
        let mut sync = sync();
        sync.on_node_volumes(&[0.25, 0.75]).unwrap();
        assert_eq!(sync.hardware.value, -602);
    }

    #[test]
    fn test_empty_report_ignored() {
        let mut sync = sync();
        assert!(sync.on_node_volumes(&[]).unwrap().is_none());
        assert_eq!(sync.hardware.writes, 0);
        assert_eq!(sync.hardware.value, -3000);
    }

    #[test]
    fn test_request_below_range_clamped() {
        let mut sync = sync();
        let outcome = sync.on_software_volume(0.001).unwrap().unwrap();
        assert_eq!(outcome.requested, -6000);
        assert_eq!(outcome.applied, -5772);
        assert_eq!(sync.hardware.value, -5772);
    }

    #[test]
    fn test_silence_clamps_to_minimum() {
        let mut sync = sync();
        sync.on_node_volumes(&[0.0, 0.0]).unwrap();
        assert_eq!(sync.hardware.value, -5772);
    }

    #[test]
    fn test_rewriting_current_level_keeps_hardware() {
        let mut sync = sync();
        sync.hardware.value = -2000;

        let outcome = sync.on_software_volume(from_decibel(-2000)).unwrap().unwrap();
        assert_eq!(outcome.applied, -2000);
        assert!(!outcome.changed());
        assert_eq!(sync.hardware.value, -2000);
    }

    #[test]
    fn test_own_hardware_write_not_reflected() {
        let mut sync = sync();
        let sink = FakeSink::default();
        sync.on_node_volumes(&[0.5, 0.5]).unwrap();

        assert!(!sync.on_hardware_change(Some(&sink)).unwrap());
        assert!(sink.writes.borrow().is_empty());
    }

    #[test]
    fn test_hardware_change_reaches_node_once() {
        let mut sync = sync();
        let sink = FakeSink::default();
        sync.on_node_volumes(&[0.5, 0.5]).unwrap();
        let writes_before = sync.hardware.writes;

        // Physical knob
        sync.hardware_mut().value = -1200;
        assert!(sync.on_hardware_change(Some(&sink)).unwrap());
        assert!(sync.suppression.is_engaged());

        let written = sink.writes.borrow()[0].clone();
        assert_eq!(written.len(), 2);
        assert!((written[0] - from_decibel(-1200)).abs() < 1e-6);

        // The node reports our write back
        assert!(sync.on_node_volumes(&written).unwrap().is_none());
        assert!(!sync.suppression.is_engaged());
        assert_eq!(sync.hardware.writes, writes_before);

        // A later genuine change goes through
        sync.on_node_volumes(&[0.5, 0.5]).unwrap();
        assert_eq!(sync.hardware.value, -602);
        assert_eq!(sync.hardware.writes, writes_before + 1);
    }

    #[test]
    fn test_two_hardware_changes_before_echoes() {
        let mut sync = sync();
        let sink = FakeSink::default();
        sync.on_node_volumes(&[0.5, 0.5]).unwrap();
        let writes_before = sync.hardware.writes;

        sync.hardware.value = -1200;
        assert!(sync.on_hardware_change(Some(&sink)).unwrap());
        sync.hardware.value = -1300;
        assert!(sync.on_hardware_change(Some(&sink)).unwrap());

        let written = sink.writes.borrow().clone();
        assert_eq!(written.len(), 2);
        for echo in &written {
            assert!(sync.on_node_volumes(echo).unwrap().is_none());
            assert_eq!(sync.hardware.value, -1300);
        }

        assert_eq!(sync.hardware.writes, writes_before);
        assert!(!sync.suppression.is_engaged());
    }

    #[test]
    fn test_coalesced_echo_consumes_earlier_writes() {
        let mut sync = sync();
        let sink = FakeSink::default();
        sync.on_node_volumes(&[0.5, 0.5]).unwrap();

        sync.hardware.value = -1200;
        sync.on_hardware_change(Some(&sink)).unwrap();
        sync.hardware.value = -1300;
        sync.on_hardware_change(Some(&sink)).unwrap();

        // Only the latest state is reported
        let last = sink.writes.borrow()[1].clone();
        assert!(sync.on_node_volumes(&last).unwrap().is_none());
        assert!(!sync.suppression.is_engaged());
        assert_eq!(sync.hardware.value, -1300);
    }

    #[test]
    fn test_stale_report_while_echo_pending_ignored() {
        let mut sync = sync();
        let sink = FakeSink::default();
        sync.on_node_volumes(&[0.5, 0.5]).unwrap();
        let writes_before = sync.hardware.writes;

        sync.hardware.value = -1200;
        sync.on_hardware_change(Some(&sink)).unwrap();

        // Answer to a request sent before our write landed
        assert!(sync.on_node_volumes(&[0.5, 0.5]).unwrap().is_none());
        assert_eq!(sync.hardware.value, -1200);
        assert!(sync.suppression.is_engaged());

        let written = sink.writes.borrow()[0].clone();
        assert!(sync.on_node_volumes(&written).unwrap().is_none());
        assert_eq!(sync.hardware.writes, writes_before);
    }

    #[test]
    fn test_failed_node_write_clears_suppression() {
        struct BrokenSink;

        impl VolumeSink for BrokenSink {
            fn set_channel_volumes(&self, _volumes: &[f32]) -> Result<(), String> {
                Err("node gone".to_string())
            }
        }

        let mut sync = sync();
        sync.on_node_volumes(&[0.5, 0.5]).unwrap();
        sync.hardware.value = -1200;
        assert!(!sync.on_hardware_change(Some(&BrokenSink)).unwrap());
        assert!(!sync.suppression.is_engaged());
    }

    #[test]
    fn test_mismatched_report_while_engaged_is_written() {
        let mut sync = sync();
        let sink = FakeSink::default();
        sync.on_node_volumes(&[0.5]).unwrap();

        sync.hardware_mut().value = -1200;
        sync.on_hardware_change(Some(&sink)).unwrap();

        let outcome = sync.on_node_volumes(&[1.0]).unwrap().unwrap();
        assert_eq!(outcome.applied, -135);
        assert!(!sync.suppression.is_engaged());
    }

    #[test]
    fn test_reverse_sync_disabled() {
        let options = SyncOptions {
            bidirectional: false,
            mute: true,
        };
        let mut sync = Synchronizer::new(FakeMixer::new(), options);
        let sink = FakeSink::default();
        sync.on_node_volumes(&[0.5, 0.5]).unwrap();

        sync.hardware_mut().value = -1200;
        assert!(!sync.on_hardware_change(Some(&sink)).unwrap());
        assert!(sink.writes.borrow().is_empty());
    }

    #[test]
    fn test_hardware_change_without_node() {
        let mut sync = sync();
        sync.hardware_mut().value = -1200;
        assert!(!sync.on_hardware_change(None).unwrap());
        assert!(!sync.suppression.is_engaged());
    }

    #[test]
    fn test_hardware_change_before_channels_known() {
        let mut sync = sync();
        let sink = FakeSink::default();
        sync.hardware_mut().value = -1200;
        assert!(!sync.on_hardware_change(Some(&sink)).unwrap());
        assert!(sink.writes.borrow().is_empty());
    }

    #[test]
    fn test_reset_node_clears_suppression() {
        let mut sync = sync();
        let sink = FakeSink::default();
        sync.on_node_volumes(&[0.5, 0.5]).unwrap();
        sync.hardware_mut().value = -1200;
        sync.on_hardware_change(Some(&sink)).unwrap();

        sync.on_node_mute(false).unwrap();

        sync.reset_node();
        assert!(!sync.suppression.is_engaged());
        assert_eq!(sync.channels, 0);

        // The next node's mute state is applied even if it repeats
        sync.hardware.switch = Some(false);
        assert!(sync.on_node_mute(false).unwrap());
        assert_eq!(sync.hardware.switch, Some(true));
    }

    #[test]
    fn test_mute_follows_node() {
        let mut sync = sync();
        assert!(sync.on_node_mute(true).unwrap());
        assert_eq!(sync.hardware.switch, Some(false));
        assert!(!sync.on_node_mute(true).unwrap());
        assert!(sync.on_node_mute(false).unwrap());
        assert_eq!(sync.hardware.switch, Some(true));
    }

    #[test]
    fn test_hardware_mute_survives_unchanged_node_mute() {
        let mut sync = sync();
        assert!(!sync.on_node_mute(false).unwrap());

        // Muted on the device itself
        sync.hardware.switch = Some(false);

        sync.on_node_volumes(&[0.5, 0.5]).unwrap();
        assert!(!sync.on_node_mute(false).unwrap());
        assert_eq!(sync.hardware.switch, Some(false));

        // The node muting agrees with the device, nothing to toggle
        assert!(!sync.on_node_mute(true).unwrap());
        assert_eq!(sync.hardware.switch, Some(false));

        assert!(sync.on_node_mute(false).unwrap());
        assert_eq!(sync.hardware.switch, Some(true));
    }

    #[test]
    fn test_missing_switch_reported_once() {
        let mut mixer = FakeMixer::new();
        mixer.switch = None;
        let mut sync = Synchronizer::new(mixer, SyncOptions::default());

        assert!(matches!(sync.on_node_mute(true), Err(MixerError::NoMuteSwitch)));
        assert_eq!(sync.hardware.switch, None);
        assert_eq!(sync.hardware.value, -3000);

        assert!(!sync.on_node_mute(false).unwrap());
        assert_eq!(sync.hardware.writes, 0);
    }
}
