// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Capture loop
//!
//! The agent idles until the peer asks for streaming, then picks a capture
//! from the plugin registry and sends frames until the peer asks to stop.
//! Control messages are polled between frames.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::capture::FrameCapture;
use crate::error::{Error, Result};
use crate::frame_log::FrameLog;
use crate::message::{DeviceDisplayInfoMessage, FormatMessage, FrameMessage};
use crate::port::PortIo;
use crate::protocol::format_codecs;
use crate::quit::QuitFlag;
use crate::registry::{ConfigureOption, PluginRegistry};
use crate::stream::{StreamPort, DEFAULT_PORT_PATH};

/// What to do when no plugin can serve a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingBackendPolicy {
    /// Stop the agent with an error
    #[default]
    Fatal,
    /// Log the error and wait for the peer to send another start request
    AwaitNextStart,
}

impl FromStr for MissingBackendPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fatal" => Ok(MissingBackendPolicy::Fatal),
            "await-next-start" => Ok(MissingBackendPolicy::AwaitNextStart),
            other => Err(format!(
                "unknown missing backend policy '{other}' (expected 'fatal' or 'await-next-start')"
            )),
        }
    }
}

impl fmt::Display for MissingBackendPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissingBackendPolicy::Fatal => "fatal",
            MissingBackendPolicy::AwaitNextStart => "await-next-start",
        })
    }
}

/// Streaming agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Stream device path
    pub port_path: PathBuf,
    /// Frame log file
    pub log_frames: Option<PathBuf>,
    /// Write raw frames to the frame log instead of text
    pub log_binary: bool,
    /// Hexdump frame contents in the text frame log
    pub log_frame_data: bool,
    /// Options passed to plugins
    pub plugin_options: Vec<ConfigureOption>,
    /// Behaviour when no capture fits the requested codecs
    pub missing_backend: MissingBackendPolicy,
    /// Forward cursor shape changes
    pub enable_cursor: bool,
    /// Debug logging
    pub debug: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port_path: PathBuf::from(DEFAULT_PORT_PATH),
            log_frames: None,
            log_binary: false,
            log_frame_data: false,
            plugin_options: Vec::new(),
            missing_backend: MissingBackendPolicy::default(),
            enable_cursor: true,
            debug: false,
        }
    }
}

/// Streaming agent
pub struct Agent {
    registry: PluginRegistry,
    missing_backend: MissingBackendPolicy,
    frame_log: Option<FrameLog>,
    frame_count: u64,
}

impl Agent {
    pub fn new(registry: PluginRegistry, missing_backend: MissingBackendPolicy) -> Self {
        Self {
            registry,
            missing_backend,
            frame_log: None,
            frame_count: 0,
        }
    }

    pub fn with_frame_log(mut self, frame_log: FrameLog) -> Self {
        self.frame_log = Some(frame_log);
        self
    }

    /// Frames sent since the agent was created.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Run until `quit` is requested or an unrecoverable error occurs.
    ///
    /// A write failure while streaming, or a missing capture under
    /// [`MissingBackendPolicy::AwaitNextStart`], returns the agent to idle;
    /// it then waits for a new start request before trying again.
    pub fn capture_loop<D: PortIo>(&mut self, port: &StreamPort<D>, quit: &QuitFlag) -> Result<()> {
        let mut failed_generation = None;

        while !quit.is_requested() {
            if !wait_for_start(port, quit, failed_generation)? {
                break;
            }

            info!("streaming starts now");
            match self.stream(port, quit) {
                Ok(()) => {
                    failed_generation = None;
                    info!("streaming stopped");
                }
                Err(e) if e.is_write_failure() => {
                    error!("{e}, waiting for a new start request");
                    failed_generation = Some(port.start_stop_generation());
                }
                Err(e @ Error::NoCaptureBackend { .. })
                    if self.missing_backend == MissingBackendPolicy::AwaitNextStart =>
                {
                    error!("{e}, waiting for a new start request");
                    failed_generation = Some(port.start_stop_generation());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn stream<D: PortIo>(&mut self, port: &StreamPort<D>, quit: &QuitFlag) -> Result<()> {
        let codecs = port.client_codecs();
        let mut capture =
            self.registry
                .best_capture_for(&codecs)
                .ok_or_else(|| Error::NoCaptureBackend {
                    codecs: format_codecs(&codecs),
                })?;

        send_device_display_info(port, &capture)?;

        let mut time_last: Option<Instant> = None;
        while !quit.is_requested() && port.streaming_requested() {
            self.frame_count += 1;
            if self.frame_count % 100 == 0 {
                debug!("SENT {} frames", self.frame_count);
            }

            let codec = capture.video_codec_type();
            let time_before = Instant::now();
            let frame = capture.capture_frame()?;
            let time_after = Instant::now();
            debug!(
                "got a frame -- size is {} ({} ms) ({} ms from last frame)",
                frame.buffer.len(),
                (time_after - time_before).as_millis(),
                time_last.map_or(0, |last| (time_after - last).as_millis())
            );
            time_last = Some(time_after);

            if frame.stream_start {
                debug!("wXh {}X{}  codec={codec}", frame.width, frame.height);
                port.send(&FormatMessage::new(frame.width, frame.height, codec))?;
                if let Some(log) = &mut self.frame_log {
                    let stat = format!(
                        "Started new stream wXh {}X{} codec={codec}",
                        frame.width, frame.height
                    );
                    if let Err(e) = log.log_stat(&stat) {
                        warn!("failed to write frame log: {e}");
                    }
                }
            }
            if let Some(log) = &mut self.frame_log {
                if let Err(e) = log.log_frame(frame.buffer) {
                    warn!("failed to write frame log: {e}");
                }
            }
            port.send(&FrameMessage::new(frame.buffer))?;

            port.read_command(false, quit)?;
        }

        Ok(())
    }
}

/// Wait in idle until streaming is requested.
///
/// After a failed attempt the start request that caused it is not honoured
/// again; a new START_STOP must arrive first. Returns `false` on quit.
fn wait_for_start<D: PortIo>(
    port: &StreamPort<D>,
    quit: &QuitFlag,
    failed_generation: Option<u64>,
) -> Result<bool> {
    loop {
        if quit.is_requested() {
            return Ok(false);
        }
        let fresh = failed_generation != Some(port.start_stop_generation());
        if fresh && port.streaming_requested() {
            return Ok(true);
        }
        port.read_command(true, quit)?;
    }
}

fn send_device_display_info<D, C>(port: &StreamPort<D>, capture: &C) -> Result<()>
where
    D: PortIo,
    C: FrameCapture + ?Sized,
{
    let infos = match capture.device_display_info() {
        Ok(infos) => infos,
        Err(e) => {
            warn!("failed to get device display info: {e}");
            return Ok(());
        }
    };

    for info in &infos {
        info!(
            "device display info: stream id {}, device address {}, display id {}",
            info.stream_id, info.device_address, info.device_display_id
        );
    }

    let Some(first) = infos.first() else {
        return Ok(());
    };
    if infos.len() > 1 {
        warn!(
            "{} device displays reported, only the first one is sent",
            infos.len()
        );
    }
    port.send(&DeviceDisplayInfoMessage::new(first))
}
