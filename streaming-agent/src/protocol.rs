// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Stream device wire protocol definitions
//!
//! Every message is an 8 byte [`Header`] followed by `body_size` bytes of
//! body. All multi-byte fields are little-endian.
//!
//! ```text
//! +------------------+---------+----------------+------------------+
//! | protocol_version | padding | message_type   | body_size        |
//! | u8               | u8      | u16            | u32              |
//! +------------------+---------+----------------+------------------+
//! ```

use std::collections::BTreeSet;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

/// The only protocol version understood by the agent
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the message header on the wire
pub const HEADER_SIZE: usize = 8;

/// Maximum size of the capabilities body
pub const MAX_CAPABILITIES_BYTES: usize = 1024;

/// Maximum size of a START_STOP body (count byte plus up to 255 codecs)
pub const MAX_START_STOP_BYTES: usize = 256;

/// Size of the fixed NOTIFY_ERROR part (the error code)
pub const NOTIFY_ERROR_FIXED_BYTES: usize = 4;

/// Maximum length of the text carried by NOTIFY_ERROR
pub const MAX_NOTIFY_ERROR_TEXT: usize = 1024;

/// Cursor images must be strictly narrower than this
pub const MAX_CURSOR_WIDTH: u32 = 1024;

/// Cursor images must be strictly lower than this
pub const MAX_CURSOR_HEIGHT: u32 = 1024;

/// Longest device address sent in DEVICE_DISPLAY_INFO (without the NUL)
pub const MAX_DEVICE_ADDRESS_LEN: usize = 255;

/// Message types carried in the header
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Capability exchange (both directions)
    Capabilities = 1,
    /// Encoded frame (agent -> peer)
    Data = 2,
    /// Stream format announcement (agent -> peer)
    Format = 3,
    /// Start or stop streaming with a codec list (peer -> agent)
    StartStop = 4,
    /// Cursor shape (agent -> peer)
    CursorSet = 5,
    /// Asynchronous error report (peer -> agent)
    NotifyError = 7,
    /// Device address and display id of the stream (agent -> peer)
    DeviceDisplayInfo = 8,
}

impl TryFrom<u16> for MessageType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Capabilities),
            2 => Ok(MessageType::Data),
            3 => Ok(MessageType::Format),
            4 => Ok(MessageType::StartStop),
            5 => Ok(MessageType::CursorSet),
            7 => Ok(MessageType::NotifyError),
            8 => Ok(MessageType::DeviceDisplayInfo),
            other => Err(other),
        }
    }
}

impl MessageType {
    /// Whether the peer may send this type to the agent.
    pub fn is_inbound(&self) -> bool {
        self.max_inbound_body().is_some()
    }

    /// Largest body accepted for an inbound message of this type, `None` for
    /// types only the agent sends.
    pub fn max_inbound_body(&self) -> Option<usize> {
        match self {
            MessageType::Capabilities => Some(MAX_CAPABILITIES_BYTES),
            MessageType::StartStop => Some(MAX_START_STOP_BYTES),
            MessageType::NotifyError => Some(NOTIFY_ERROR_FIXED_BYTES + MAX_NOTIFY_ERROR_TEXT),
            MessageType::Data
            | MessageType::Format
            | MessageType::CursorSet
            | MessageType::DeviceDisplayInfo => None,
        }
    }
}

/// Video codec identifier, one byte on the wire.
///
/// Unknown values are kept as-is so the negotiated set reflects exactly what
/// the peer sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VideoCodec(pub u8);

impl VideoCodec {
    pub const MJPEG: VideoCodec = VideoCodec(1);
    pub const VP8: VideoCodec = VideoCodec(2);
    pub const H264: VideoCodec = VideoCodec(3);
    pub const VP9: VideoCodec = VideoCodec(4);
    pub const H265: VideoCodec = VideoCodec(5);

    /// Short codec name, if the id is known.
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            VideoCodec::MJPEG => Some("mjpeg"),
            VideoCodec::VP8 => Some("vp8"),
            VideoCodec::H264 => Some("h264"),
            VideoCodec::VP9 => Some("vp9"),
            VideoCodec::H265 => Some("h265"),
            _ => None,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "codec#{}", self.0),
        }
    }
}

/// Set of codecs accepted by the peer
pub type CodecSet = BTreeSet<VideoCodec>;

/// Render a codec set as `a, b, c` for log lines.
pub fn format_codecs(codecs: &CodecSet) -> String {
    codecs
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Cursor encodings; the agent only produces ARGB with alpha
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorType {
    /// 32-bit ARGB with alpha channel
    #[default]
    Alpha = 0,
}

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version, must be [`PROTOCOL_VERSION`]
    pub protocol_version: u8,
    /// Raw message type, see [`MessageType`]
    pub message_type: u16,
    /// Body size in bytes, header excluded
    pub body_size: u32,
}

impl Header {
    /// Header for an outbound message of the current protocol version.
    pub fn new(message_type: MessageType, body_size: u32) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            message_type: message_type as u16,
            body_size,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = self.protocol_version;
        // bytes[1] is padding
        LittleEndian::write_u16(&mut bytes[2..4], self.message_type);
        LittleEndian::write_u32(&mut bytes[4..8], self.body_size);
        bytes
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            protocol_version: bytes[0],
            message_type: LittleEndian::read_u16(&bytes[2..4]),
            body_size: LittleEndian::read_u32(&bytes[4..8]),
        }
    }

    /// The message type, if known.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::try_from(self.message_type).ok()
    }
}
