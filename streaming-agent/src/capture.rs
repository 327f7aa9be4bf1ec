// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Frame capture backend contract
//!
//! Backends grab and encode frames; the agent only moves the encoded bytes.
//! Concrete backends are provided by plugins registered with
//! [`crate::registry::PluginRegistry`].

use crate::error::Result;
use crate::protocol::VideoCodec;

/// An encoded frame borrowed from the backend.
///
/// The buffer stays valid until the next call on the backend that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Encoded frame data
    pub buffer: &'a [u8],
    /// First frame of a new stream; a format message must precede it
    pub stream_start: bool,
}

/// Identity of the device and display a capture is reading from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceDisplayInfo {
    /// Stream channel id
    pub stream_id: u32,
    /// Hardware address, e.g. `pci/0000/02.0`
    pub device_address: String,
    /// Display index on the device
    pub device_display_id: u32,
}

/// Frame capture trait
pub trait FrameCapture: Send {
    /// Wait for and return the next encoded frame.
    ///
    /// Capture starts on the first call if needed.
    fn capture_frame(&mut self) -> Result<Frame<'_>>;

    /// Return to the initial state; the next frame starts a new stream.
    fn reset(&mut self);

    /// Codec used to encode the frames
    fn video_codec_type(&self) -> VideoCodec;

    /// Device/display pairs the capture covers.
    fn device_display_info(&self) -> Result<Vec<DeviceDisplayInfo>> {
        Ok(Vec::new())
    }
}

impl<T: FrameCapture + ?Sized> FrameCapture for Box<T> {
    fn capture_frame(&mut self) -> Result<Frame<'_>> {
        (**self).capture_frame()
    }

    fn reset(&mut self) {
        (**self).reset();
    }

    fn video_codec_type(&self) -> VideoCodec {
        (**self).video_codec_type()
    }

    fn device_display_info(&self) -> Result<Vec<DeviceDisplayInfo>> {
        (**self).device_display_info()
    }
}
