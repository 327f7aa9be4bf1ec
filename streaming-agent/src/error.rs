// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the streaming agent.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors are
//! grouped by [`ErrorKind`] so callers can decide what is recoverable
//! without matching every variant.

use std::io;
use std::path::PathBuf;

/// Result type for streaming agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport failure on the stream device (open, read, write, poll).
    Io,
    /// The framing can no longer be trusted (bad version, unknown type,
    /// implausible size).
    Protocol,
    /// A well framed message whose fields are inconsistent.
    MessageData,
    /// Capture backend or collaborator failure.
    Backend,
}

/// Streaming agent error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The stream device could not be opened.
    #[error("failed to open streaming device '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading from the device failed at the OS level.
    #[error("reading message from device failed reading {operation}: {source}")]
    Read {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// The peer closed the stream (zero-byte read or hang-up while reading).
    #[error("peer closed the stream reading {operation}")]
    PeerClosed { operation: &'static str },

    /// Writing to the device failed at the OS level.
    #[error("write failed writing {operation}: {source}")]
    Write {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// The device reported a hang-up while waiting to write.
    #[error("peer hung up writing {operation}")]
    WriteHangup { operation: &'static str },

    /// The header carried a protocol version other than the supported one.
    #[error("bad protocol version reading {operation} (received {received}, expected {expected})")]
    ProtocolVersion {
        operation: &'static str,
        received: u8,
        expected: u8,
    },

    /// The header carried a message type the agent does not accept.
    #[error("unknown message type {message_type} reading {operation}")]
    UnknownMessageType {
        operation: &'static str,
        message_type: u16,
    },

    /// A message is longer than allowed for its type.
    #[error("message is too long reading {operation} (length was {received}, should be at most {max})")]
    MessageTooLong {
        operation: &'static str,
        received: usize,
        max: usize,
    },

    /// A message is shorter than its fixed part.
    #[error("message is too short reading {operation} (length was {received}, should be at least {min})")]
    MessageTooShort {
        operation: &'static str,
        received: usize,
        min: usize,
    },

    /// An internal count does not fit inside the received body.
    #[error("malformed message reading {operation}: {reason} (received {received}, expected {expected})")]
    MalformedMessage {
        operation: &'static str,
        reason: &'static str,
        received: usize,
        expected: usize,
    },

    /// An outbound body does not fit the 32-bit size field.
    #[error("message body of {size} bytes is too large writing {operation}")]
    BodyTooLarge { operation: &'static str, size: usize },

    /// No registered plugin can serve any of the requested codecs.
    #[error("cannot find a suitable capture system for codecs [{codecs}]")]
    NoCaptureBackend { codecs: String },

    /// A capture backend failed to start or to produce a frame.
    #[error("capture backend error: {0}")]
    Capture(String),

    /// The cursor source failed.
    #[error("cursor source error: {0}")]
    Cursor(String),
}

impl Error {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Open { .. }
            | Error::Read { .. }
            | Error::PeerClosed { .. }
            | Error::Write { .. }
            | Error::WriteHangup { .. } => ErrorKind::Io,
            Error::ProtocolVersion { .. }
            | Error::UnknownMessageType { .. }
            | Error::MessageTooLong { .. } => ErrorKind::Protocol,
            Error::MessageTooShort { .. }
            | Error::MalformedMessage { .. }
            | Error::BodyTooLarge { .. } => ErrorKind::MessageData,
            Error::NoCaptureBackend { .. } | Error::Capture(_) | Error::Cursor(_) => {
                ErrorKind::Backend
            }
        }
    }

    /// Whether the error happened while writing to the device.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Error::Write { .. } | Error::WriteHangup { .. })
    }

    /// The OS error code carried by the error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Open { source, .. } | Error::Read { source, .. } | Error::Write { source, .. } => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}
