// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Outbound and inbound message bodies
//!
//! Outbound messages know their body size up front so the header can be
//! written before the body. Inbound messages are read whole into an owned
//! buffer and only then interpreted.

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::capture::DeviceDisplayInfo;
use crate::cursor::CursorImage;
use crate::error::{Error, Result};
use crate::port::{write_exact, PortIo};
use crate::protocol::{
    CodecSet, CursorType, Header, MessageType, VideoCodec, MAX_CURSOR_HEIGHT, MAX_CURSOR_WIDTH,
    MAX_DEVICE_ADDRESS_LEN, MAX_NOTIFY_ERROR_TEXT, NOTIFY_ERROR_FIXED_BYTES,
};

/// Bodies up to this size are gathered and written with a single call.
const GATHER_LIMIT: usize = 4096;

/// A message the agent writes to the device.
pub trait OutboundMessage {
    /// Header message type
    const TYPE: MessageType;

    /// Name used in error messages
    const OPERATION: &'static str;

    /// Exact body size in bytes.
    fn size(&self) -> usize;

    /// Write the body, exactly [`OutboundMessage::size`] bytes.
    fn write_body(&self, out: &mut BodyWriter<'_>) -> Result<()>;
}

/// Writes a message body to the device and counts the bytes written.
///
/// Small fields are gathered and flushed together; large slices go straight
/// to the device.
pub struct BodyWriter<'a> {
    device: &'a dyn PortIo,
    operation: &'static str,
    pending: Vec<u8>,
    written: usize,
}

impl<'a> BodyWriter<'a> {
    pub(crate) fn new(device: &'a dyn PortIo, operation: &'static str) -> Self {
        Self {
            device,
            operation,
            pending: Vec::new(),
            written: 0,
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.pending.push(value);
        self.written += 1;
    }

    pub fn put_u16(&mut self, value: u16) {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, value);
        self.pending.extend_from_slice(&bytes);
        self.written += 2;
    }

    pub fn put_u32(&mut self, value: u32) {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.pending.extend_from_slice(&bytes);
        self.written += 4;
    }

    pub fn put_padding(&mut self, count: usize) {
        self.pending.resize(self.pending.len() + count, 0);
        self.written += count;
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.written += bytes.len();
        if self.pending.len() + bytes.len() <= GATHER_LIMIT {
            self.pending.extend_from_slice(bytes);
            return Ok(());
        }
        self.flush()?;
        write_exact(self.device, bytes, self.operation)
    }

    /// Bytes written so far, including gathered bytes not yet flushed.
    pub fn written(&self) -> usize {
        self.written
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        write_exact(self.device, &self.pending, self.operation)?;
        self.pending.clear();
        Ok(())
    }
}

/// Empty capabilities reply; no protocol extensions are supported.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilitiesMessage;

impl OutboundMessage for CapabilitiesMessage {
    const TYPE: MessageType = MessageType::Capabilities;
    const OPERATION: &'static str = "capabilities";

    fn size(&self) -> usize {
        0
    }

    fn write_body(&self, _out: &mut BodyWriter<'_>) -> Result<()> {
        Ok(())
    }
}

/// Announces the dimensions and codec of the frames that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatMessage {
    pub width: u32,
    pub height: u32,
    pub codec: VideoCodec,
}

impl FormatMessage {
    pub fn new(width: u32, height: u32, codec: VideoCodec) -> Self {
        Self {
            width,
            height,
            codec,
        }
    }
}

impl OutboundMessage for FormatMessage {
    const TYPE: MessageType = MessageType::Format;
    const OPERATION: &'static str = "format";

    fn size(&self) -> usize {
        12
    }

    fn write_body(&self, out: &mut BodyWriter<'_>) -> Result<()> {
        out.put_u32(self.width);
        out.put_u32(self.height);
        out.put_u8(self.codec.0);
        out.put_padding(3);
        Ok(())
    }
}

/// One encoded frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameMessage<'a> {
    pub data: &'a [u8],
}

impl<'a> FrameMessage<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl OutboundMessage for FrameMessage<'_> {
    const TYPE: MessageType = MessageType::Data;
    const OPERATION: &'static str = "frame";

    fn size(&self) -> usize {
        self.data.len()
    }

    fn write_body(&self, out: &mut BodyWriter<'_>) -> Result<()> {
        out.put_bytes(self.data)
    }
}

/// Cursor shape with ARGB pixels.
#[derive(Debug, Clone, Copy)]
pub struct CursorMessage<'a> {
    width: u16,
    height: u16,
    hot_x: u16,
    hot_y: u16,
    pixels: &'a [u32],
}

impl<'a> CursorMessage<'a> {
    /// Build the message for `image`.
    ///
    /// Returns `None` when the image is too large for the protocol or its
    /// pixel count does not match its dimensions; such cursors are dropped.
    pub fn new(image: &'a CursorImage) -> Option<Self> {
        if image.width >= MAX_CURSOR_WIDTH || image.height >= MAX_CURSOR_HEIGHT {
            return None;
        }
        if image.pixels.len() != image.width as usize * image.height as usize {
            return None;
        }

        Some(Self {
            width: image.width as u16,
            height: image.height as u16,
            hot_x: image.hotspot_x,
            hot_y: image.hotspot_y,
            pixels: &image.pixels,
        })
    }
}

impl OutboundMessage for CursorMessage<'_> {
    const TYPE: MessageType = MessageType::CursorSet;
    const OPERATION: &'static str = "cursor";

    fn size(&self) -> usize {
        12 + 4 * self.pixels.len()
    }

    fn write_body(&self, out: &mut BodyWriter<'_>) -> Result<()> {
        out.put_u16(self.width);
        out.put_u16(self.height);
        out.put_u16(self.hot_x);
        out.put_u16(self.hot_y);
        out.put_u8(CursorType::Alpha as u8);
        out.put_padding(3);

        let mut pixels = vec![0u8; 4 * self.pixels.len()];
        LittleEndian::write_u32_into(self.pixels, &mut pixels);
        out.put_bytes(&pixels)
    }
}

/// Identifies the device and display the stream is captured from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDisplayInfoMessage {
    pub stream_id: u32,
    pub device_display_id: u32,
    device_address: Vec<u8>,
}

impl DeviceDisplayInfoMessage {
    /// Build the message, truncating the device address if it is too long.
    pub fn new(info: &DeviceDisplayInfo) -> Self {
        let mut device_address = info.device_address.as_bytes().to_vec();
        if device_address.len() > MAX_DEVICE_ADDRESS_LEN {
            warn!(
                "device address of stream id {} is {} bytes long, truncating to {MAX_DEVICE_ADDRESS_LEN}",
                info.stream_id,
                device_address.len()
            );
            device_address.truncate(MAX_DEVICE_ADDRESS_LEN);
        }

        Self {
            stream_id: info.stream_id,
            device_display_id: info.device_display_id,
            device_address,
        }
    }

    /// The (possibly truncated) address, without the terminating NUL.
    pub fn device_address(&self) -> &[u8] {
        &self.device_address
    }
}

impl OutboundMessage for DeviceDisplayInfoMessage {
    const TYPE: MessageType = MessageType::DeviceDisplayInfo;
    const OPERATION: &'static str = "device display info";

    fn size(&self) -> usize {
        12 + self.device_address.len() + 1
    }

    fn write_body(&self, out: &mut BodyWriter<'_>) -> Result<()> {
        out.put_u32(self.stream_id);
        out.put_u32(self.device_display_id);
        // length includes the NUL terminator
        out.put_u32(self.device_address.len() as u32 + 1);
        out.put_bytes(&self.device_address)?;
        out.put_u8(0);
        Ok(())
    }
}

/// A message read from the device, header and complete body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub header: Header,
    pub body: Vec<u8>,
}

/// Interpreted inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPayload {
    /// Peer capabilities; contents are ignored.
    Capabilities(Vec<u8>),
    /// Start (non-empty codec list) or stop (empty list) streaming.
    StartStop(CodecSet),
    /// Error reported by the peer.
    NotifyError { code: u32, message: String },
}

impl InboundMessage {
    pub fn new(header: Header, body: Vec<u8>) -> Self {
        Self { header, body }
    }

    /// Interpret the body according to the header type.
    pub fn decode(&self) -> Result<InboundPayload> {
        match self.header.kind() {
            Some(MessageType::Capabilities) => Ok(InboundPayload::Capabilities(self.body.clone())),
            Some(MessageType::StartStop) => decode_start_stop(&self.body),
            Some(MessageType::NotifyError) => decode_notify_error(&self.body),
            _ => Err(Error::UnknownMessageType {
                operation: "command from device",
                message_type: self.header.message_type,
            }),
        }
    }
}

fn decode_start_stop(body: &[u8]) -> Result<InboundPayload> {
    let (&count, codecs) = body.split_first().ok_or(Error::MessageTooShort {
        operation: "start/stop",
        received: 0,
        min: 1,
    })?;

    let count = count as usize;
    if count > codecs.len() {
        return Err(Error::MalformedMessage {
            operation: "start/stop",
            reason: "codec count exceeds body",
            received: body.len(),
            expected: count + 1,
        });
    }

    Ok(InboundPayload::StartStop(
        codecs[..count].iter().map(|&id| VideoCodec(id)).collect(),
    ))
}

fn decode_notify_error(body: &[u8]) -> Result<InboundPayload> {
    if body.len() < NOTIFY_ERROR_FIXED_BYTES {
        return Err(Error::MessageTooShort {
            operation: "NotifyError",
            received: body.len(),
            min: NOTIFY_ERROR_FIXED_BYTES,
        });
    }
    if body.len() > NOTIFY_ERROR_FIXED_BYTES + MAX_NOTIFY_ERROR_TEXT {
        return Err(Error::MessageTooLong {
            operation: "NotifyError",
            received: body.len(),
            max: NOTIFY_ERROR_FIXED_BYTES + MAX_NOTIFY_ERROR_TEXT,
        });
    }

    let code = LittleEndian::read_u32(&body[..NOTIFY_ERROR_FIXED_BYTES]);
    let text = &body[NOTIFY_ERROR_FIXED_BYTES..];
    let text = match text.iter().position(|&b| b == 0) {
        Some(end) => &text[..end],
        None => text,
    };

    Ok(InboundPayload::NotifyError {
        code,
        message: String::from_utf8_lossy(text).into_owned(),
    })
}

/// Write a complete message (header then body) without any locking.
pub(crate) fn write_message<M: OutboundMessage + ?Sized>(
    device: &dyn PortIo,
    message: &M,
) -> Result<()> {
    let size = message.size();
    let body_size = u32::try_from(size).map_err(|_| Error::BodyTooLarge {
        operation: M::OPERATION,
        size,
    })?;
    let header = Header::new(M::TYPE, body_size);
    write_exact(device, &header.encode(), "header")?;

    let mut out = BodyWriter::new(device, M::OPERATION);
    message.write_body(&mut out)?;
    out.flush()?;
    debug_assert_eq!(
        out.written(),
        size,
        "{} body size does not match its header",
        M::OPERATION
    );
    Ok(())
}
