// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Control message dispatch
//!
//! Decides what an inbound message does to the session. The stream port
//! applies the resulting [`ControlAction`] while it still holds the lock the
//! message was read under.

use log::{error, info};

use crate::error::Result;
use crate::message::{InboundMessage, InboundPayload};
use crate::protocol::{format_codecs, CodecSet};

/// Effect of a control message on the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Answer with an empty capabilities message.
    ReplyCapabilities,
    /// Replace the negotiated codecs; streaming runs while the set is non-empty.
    StartStop(CodecSet),
    /// Nothing to change.
    Ignore,
}

/// Decode `message` and decide its effect.
///
/// Decoding errors are returned before any action is produced, so a
/// malformed message never changes the session.
pub fn dispatch(message: &InboundMessage) -> Result<ControlAction> {
    match message.decode()? {
        InboundPayload::Capabilities(caps) => {
            info!(
                "GOT CAPABILITIES message ({} bytes), replying without extensions",
                caps.len()
            );
            Ok(ControlAction::ReplyCapabilities)
        }
        InboundPayload::StartStop(codecs) => {
            info!(
                "GOT START_STOP message -- request to {} streaming (codecs: [{}])",
                if codecs.is_empty() { "STOP" } else { "START" },
                format_codecs(&codecs)
            );
            Ok(ControlAction::StartStop(codecs))
        }
        InboundPayload::NotifyError { code, message } => {
            error!("Received NotifyError message from the server: {code} - {message}");
            Ok(ControlAction::Ignore)
        }
    }
}
