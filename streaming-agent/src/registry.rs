// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Capture plugin registry
//!
//! Plugins are registered in-process. When streaming starts the registry
//! picks the highest ranked plugin whose codec the client accepts and that
//! manages to create a capture.

use std::cmp::Reverse;

use log::{debug, error, info, warn};

use crate::capture::FrameCapture;
use crate::error::Result;
use crate::protocol::{CodecSet, VideoCodec};

/// Plugin interface version implemented by this agent (major.minor as 8.8 bits)
pub const PLUGIN_VERSION: u32 = 0x0100;

/// Plugin rank. Higher ranks are preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rank(pub u32);

impl Rank {
    /// The plugin must not be used
    pub const DONT_USE: Rank = Rank(0);
    /// Use only as a fallback
    pub const FALLBACK_MIN: Rank = Rank(1);
    /// Software encoding
    pub const SOFTWARE_MIN: Rank = Rank(0x4000_0000);
    /// Hardware encoding
    pub const HARDWARE_MIN: Rank = Rank(0x8000_0000);
    /// Access to specific card hardware, not only for compression
    pub const SPECIFIC_HARDWARE_MIN: Rank = Rank(0xC000_0000);
}

/// Backend factory.
pub trait Plugin: Send + Sync {
    /// Plugin name for logging
    fn name(&self) -> &str;

    /// Create a capture, or `None` if the plugin cannot work right now.
    fn create_capture(&self, options: &[ConfigureOption]) -> Result<Option<Box<dyn FrameCapture>>>;

    /// Current rank; may change between calls as conditions change.
    fn rank(&self) -> Rank;

    /// Codec the captures of this plugin produce
    fn video_codec_type(&self) -> VideoCodec;

    /// Plugin interface version the plugin was built against
    fn version(&self) -> u32 {
        PLUGIN_VERSION
    }
}

/// A `name=value` option passed to plugins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureOption {
    pub name: String,
    pub value: String,
}

impl ConfigureOption {
    /// Parse `name=value`. The value may contain further `=`.
    pub fn parse(arg: &str) -> Option<Self> {
        let (name, value) = arg.split_once('=')?;
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

fn major_version(version: u32) -> u32 {
    version >> 8
}

fn minor_version(version: u32) -> u32 {
    version & 0xff
}

/// Whether a plugin built against `plugin_version` can run on this agent.
pub fn plugin_version_is_compatible(plugin_version: u32) -> bool {
    major_version(PLUGIN_VERSION) == major_version(plugin_version)
        && minor_version(PLUGIN_VERSION) >= minor_version(plugin_version)
}

/// Registered plugins and their options
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
    options: Vec<ConfigureOption>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Incompatible plugins are refused and reported.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> bool {
        let version = plugin.version();
        if !plugin_version_is_compatible(version) {
            error!(
                "plugin '{}' has incompatible version {version:#06x} (agent version {PLUGIN_VERSION:#06x})",
                plugin.name()
            );
            return false;
        }

        info!(
            "registered plugin '{}' ({})",
            plugin.name(),
            plugin.video_codec_type()
        );
        self.plugins.push(plugin);
        true
    }

    pub fn add_option(&mut self, name: &str, value: &str) {
        self.options.push(ConfigureOption {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    pub fn options(&self) -> &[ConfigureOption] {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Create a capture from the best plugin producing one of `codecs`.
    ///
    /// Plugins are tried by descending rank; a plugin ranked
    /// [`Rank::DONT_USE`] ends the search. Plugin failures are logged and
    /// the next plugin is tried.
    pub fn best_capture_for(&self, codecs: &CodecSet) -> Option<Box<dyn FrameCapture>> {
        let mut ranked: Vec<(Rank, &dyn Plugin)> = self
            .plugins
            .iter()
            .map(|plugin| (plugin.rank(), plugin.as_ref()))
            .collect();
        // stable sort keeps registration order among equal ranks
        ranked.sort_by_key(|&(rank, _)| Reverse(rank));

        for (rank, plugin) in ranked {
            if rank == Rank::DONT_USE {
                break;
            }
            if !codecs.contains(&plugin.video_codec_type()) {
                debug!(
                    "skipping plugin '{}': client does not accept {}",
                    plugin.name(),
                    plugin.video_codec_type()
                );
                continue;
            }

            match plugin.create_capture(&self.options) {
                Ok(Some(capture)) => {
                    info!("using plugin '{}' (rank {:#x})", plugin.name(), rank.0);
                    return Some(capture);
                }
                Ok(None) => debug!("plugin '{}' declined to create a capture", plugin.name()),
                Err(e) => warn!("plugin '{}' failed to create a capture: {e}", plugin.name()),
            }
        }

        None
    }
}
