// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Binding lifecycle of the watched node.

use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Unbound,
    Bound { id: u32 },
}

/// What to do with a registry global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalAction {
    Bind,
    Ignore,
}

/// Tracks which registry global, if any, is the configured node.
///
/// Unbound -> Bound when a node with the exact target name appears, and back
/// to Unbound when that global is removed. While bound, further matches are
/// ignored.
#[derive(Debug)]
pub struct NodeWatcher {
    target: String,
    state: WatchState,
}

impl NodeWatcher {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            state: WatchState::Unbound,
        }
    }

    pub fn bound_id(&self) -> Option<u32> {
        match self.state {
            WatchState::Bound { id } => Some(id),
            WatchState::Unbound => None,
        }
    }

    /// Handle a registry global. `name` is the `node.name` property of node
    /// globals and `None` for everything else.
    pub fn on_global(&mut self, id: u32, name: Option<&str>) -> GlobalAction {
        let Some(name) = name else {
            return GlobalAction::Ignore;
        };
        if name != self.target {
            return GlobalAction::Ignore;
        }

        match self.state {
            WatchState::Unbound => {
                info!("Found node '{}' (id {})", name, id);
                self.state = WatchState::Bound { id };
                GlobalAction::Bind
            }
            WatchState::Bound { id: bound } => {
                debug!("Ignoring node {} named '{}', already bound to {}", id, name, bound);
                GlobalAction::Ignore
            }
        }
    }

    /// Roll back a [`GlobalAction::Bind`] whose bind call failed.
    pub fn bind_failed(&mut self, id: u32) {
        if self.bound_id() == Some(id) {
            self.state = WatchState::Unbound;
        }
    }

    /// Handle a registry removal. Returns true if the bound node went away.
    pub fn on_global_remove(&mut self, id: u32) -> bool {
        if self.bound_id() == Some(id) {
            info!("Node '{}' (id {}) removed", self.target, id);
            self.state = WatchState::Unbound;
            true
        } else {
            false
        }
    }
}
