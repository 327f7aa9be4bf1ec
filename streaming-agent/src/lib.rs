// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Streaming Agent
//!
//! This crate implements the guest side of a display streaming channel:
//! encoded frames and cursor shapes are sent to a remote display consumer
//! over a virtio serial port, and control messages come back over the same
//! byte stream.
//!
//! # Overview
//!
//! - **Framing**: whole-message transfers on a non-blocking, interruptible
//!   character device
//! - **Protocol**: versioned little-endian messages with a fixed header
//! - **Session**: codec negotiation and start/stop requests from the peer
//! - **Capture loop**: frames from the best capture plugin for the
//!   negotiated codecs
//! - **Cursor updates**: shape changes forwarded from a second thread
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────┐   ┌───────────────────────────┐
//! │      Capture thread       │   │       Cursor thread       │
//! │  - Agent::capture_loop    │   │  - CursorUpdater          │
//! │  - FrameCapture (plugin)  │   │  - CursorSource (X11)     │
//! └───────────────────────────┘   └───────────────────────────┘
//!       │ FORMAT / DATA    ▲ START_STOP, CAPABILITIES,  │ CURSOR_SET
//!       │                  │ NOTIFY_ERROR               │
//!       ▼                  │                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        StreamPort                           │
//! │  - one lock per complete message read or write              │
//! │  - session: streaming flag, negotiated codecs               │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              /dev/virtio-ports/org.spice-space.stream.0     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use streaming_agent::{Agent, MissingBackendPolicy, PluginRegistry, QuitFlag, StreamPort};
//!
//! let mut registry = PluginRegistry::new();
//! registry.register(Box::new(MyEncoderPlugin::new()));
//!
//! let port = StreamPort::open("/dev/virtio-ports/org.spice-space.stream.0")?;
//! let quit = QuitFlag::new();
//! let mut agent = Agent::new(registry, MissingBackendPolicy::Fatal);
//! agent.capture_loop(&port, &quit)?;
//! ```
//!
//! # Modules
//!
//! - [`port`]: Device access and whole-buffer transfers
//! - [`protocol`]: Wire header, message types and codec ids
//! - [`message`]: Outbound message bodies and inbound decoding
//! - [`stream`]: The shared stream port and its session
//! - [`dispatch`]: Effect of control messages
//! - [`agent`]: Capture loop
//! - [`capture`]: Capture backend contract
//! - [`registry`]: Capture plugins
//! - [`cursor`]: Cursor shape forwarding
//! - [`frame_log`]: Frame log file

pub mod agent;
pub mod capture;
pub mod cursor;
pub mod dispatch;
pub mod error;
pub mod frame_log;
pub mod message;
pub mod port;
pub mod protocol;
pub mod quit;
pub mod registry;
pub mod stream;

#[cfg(test)]
mod test_util;

pub use agent::{Agent, AgentConfig, MissingBackendPolicy};
pub use capture::{DeviceDisplayInfo, Frame, FrameCapture};
pub use cursor::{CursorImage, CursorSource, CursorUpdater};
#[cfg(all(target_os = "linux", feature = "x11"))]
pub use cursor::X11CursorSource;
pub use error::{Error, ErrorKind, Result};
pub use frame_log::FrameLog;
pub use port::{DevicePort, PortIo};
pub use quit::QuitFlag;
pub use registry::{ConfigureOption, Plugin, PluginRegistry, Rank};
pub use stream::{StreamPort, DEFAULT_PORT_PATH};
