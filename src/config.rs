// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration loading.

use piper_sync::SyncOptions;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_FILE: &str = "piper.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("No config directory found")]
    NoConfigDir,
}

/// PipeWire node to follow.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeConfig {
    /// Exact `node.name` of the node.
    #[serde(default = "default_node_name")]
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
        }
    }
}

fn default_node_name() -> String {
    "alsa_output.usb-EPOS_EPOS_GSX_1000_Speaker_A004550224704125-00.analog-output-surround71"
        .to_string()
}

/// ALSA simple mixer control to drive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MixerConfig {
    #[serde(default = "default_card")]
    pub card: String,
    #[serde(default = "default_control")]
    pub control: String,
    #[serde(default = "default_index")]
    pub index: u32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            card: default_card(),
            control: default_control(),
            index: default_index(),
        }
    }
}

fn default_card() -> String {
    "default".to_string()
}

fn default_control() -> String {
    "PCM".to_string()
}

fn default_index() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Push hardware changes back to the node.
    #[serde(default = "default_true")]
    pub bidirectional: bool,
    /// Follow the node's mute state with the playback switch.
    #[serde(default = "default_true")]
    pub mute: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bidirectional: true,
            mute: true,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            bidirectional: config.bidirectional,
            mute: config.mute,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub mixer: MixerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load from `path`, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Default config file location in the user's config directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        directories::ProjectDirs::from("", "", "piper")
            .map(|d| d.config_dir().join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }
}
