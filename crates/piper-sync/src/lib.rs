// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core synchronization logic for piper.
//!
//! This crate holds everything that does not touch PipeWire or ALSA directly:
//! the decibel conversion, the hardware mixer capability trait, the node
//! binding state machine and the synchronizer with its echo suppression.
//! The daemon crate wires these to the real libraries.

pub mod decibel;
pub mod mixer;
pub mod suppression;
pub mod synchronizer;
pub mod watcher;

pub use decibel::{from_decibel, to_decibel, DecibelValue, VolumeLevel, NEG_INFINITY};
pub use mixer::{DecibelRange, HardwareMixer, MixerError, WriteOutcome};
pub use suppression::{Origin, SuppressionState};
pub use synchronizer::{SyncOptions, Synchronizer, VolumeSink};
pub use watcher::{GlobalAction, NodeWatcher};
