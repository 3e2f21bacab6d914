// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Echo suppression between the node and the hardware mixer.
//!
//! When the hardware side changes, the synchronizer writes the new level to
//! the node and records that level as an expected echo. The node then reports
//! its params again; that report is the echo of our own write and must not be
//! pushed back to the hardware. Several writes can be in flight when the knob
//! moves faster than the node answers, so every pending level is queued and
//! each is consumed by at most one node report.

use crate::decibel::DecibelValue;
use crate::mixer::WriteOutcome;
use std::collections::VecDeque;
use tracing::trace;

/// Largest difference, in hundredths of a dB, still treated as an echo.
///
/// Covers the rounding of the dB -> linear -> dB round trip through the node.
pub const ECHO_TOLERANCE: DecibelValue = 1;

/// Echoes kept at most; the oldest is dropped when a node never answers.
const MAX_PENDING: usize = 32;

/// Who caused a hardware write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The node reported a new level.
    External,
    /// The write was caused by our own propagation to the node.
    Internal,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SuppressionState {
    /// Levels written to the node whose echo has not arrived, oldest first.
    pending: VecDeque<DecibelValue>,
}

impl SuppressionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether at least one echo is still awaited.
    pub fn is_engaged(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Expect the node to echo `value` back.
    pub fn engage(&mut self, value: DecibelValue) {
        if self.pending.len() == MAX_PENDING {
            self.pending.pop_front();
        }
        self.pending.push_back(value);
        trace!("Suppression engaged at {} ({} pending)", value, self.pending.len());
    }

    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            self.pending.clear();
            trace!("Suppression cleared");
        }
    }

    /// Consume the awaited echo matching `observed`, if any.
    ///
    /// Echoes queued before the match are dropped with it: the node reports
    /// its current state, so a report of a later write stands for the earlier
    /// ones as well.
    pub fn consume_echo(&mut self, observed: DecibelValue) -> bool {
        let Some(position) = self
            .pending
            .iter()
            .position(|expected| (observed - expected).abs() <= ECHO_TOLERANCE)
        else {
            return false;
        };

        self.pending.drain(..=position);
        trace!(
            "Echo at {} consumed ({} still pending)",
            observed,
            self.pending.len()
        );
        true
    }

    /// Update after a hardware write.
    ///
    /// External writes and writes that changed the hardware value clear
    /// suppression. Only an internal write with no observable change leaves
    /// it engaged.
    pub fn record_write(&mut self, origin: Origin, outcome: &WriteOutcome) {
        if origin == Origin::External || outcome.changed() {
            self.clear();
        }
    }
}
