// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Stream port channel
//!
//! [`StreamPort`] owns the device and the session negotiated over it. One
//! mutex covers every complete message write and every complete message
//! read together with its dispatch, so the capture and cursor threads can
//! share the port without interleaving partial messages.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::dispatch::{dispatch, ControlAction};
use crate::error::{Error, Result};
use crate::message::{write_message, CapabilitiesMessage, InboundMessage, OutboundMessage};
use crate::port::{read_exact, DevicePort, PollEvents, PortIo};
use crate::protocol::{CodecSet, Header, MessageType, HEADER_SIZE, PROTOCOL_VERSION};
use crate::quit::QuitFlag;

/// Default device path of the streaming virtio port
pub const DEFAULT_PORT_PATH: &str = "/dev/virtio-ports/org.spice-space.stream.0";

/// How often a blocking wait wakes up to check for a quit request
pub const RECHECK_INTERVAL: Duration = Duration::from_secs(1);

const COMMAND_OPERATION: &str = "command from device";

#[derive(Debug, Default)]
struct Session {
    codecs: CodecSet,
}

/// Channel to the peer over a stream device
pub struct StreamPort<D: PortIo = DevicePort> {
    device: D,
    session: Mutex<Session>,
    streaming: AtomicBool,
    generation: AtomicU64,
    recheck_interval: Duration,
}

impl StreamPort<DevicePort> {
    /// Open the stream device at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(DevicePort::open(path)?))
    }
}

impl<D: PortIo> StreamPort<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            session: Mutex::new(Session::default()),
            streaming: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            recheck_interval: RECHECK_INTERVAL,
        }
    }

    /// Change how long blocking waits sleep between quit checks.
    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval;
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        // The session only holds the codec set, which is replaced wholesale
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the peer asked for streaming.
    pub fn streaming_requested(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Codecs accepted by the peer, as of the last START_STOP.
    pub fn client_codecs(&self) -> CodecSet {
        self.lock().codecs.clone()
    }

    /// Number of START_STOP messages processed so far.
    pub fn start_stop_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Write `message` as one uninterrupted unit.
    pub fn send<M: OutboundMessage>(&self, message: &M) -> Result<()> {
        let _guard = self.lock();
        write_message(&self.device, message)
    }

    /// Read one complete inbound message.
    pub fn receive(&self) -> Result<InboundMessage> {
        let _guard = self.lock();
        self.receive_locked()
    }

    fn receive_locked(&self) -> Result<InboundMessage> {
        let mut raw = [0u8; HEADER_SIZE];
        read_exact(&self.device, &mut raw, COMMAND_OPERATION)?;
        let header = Header::decode(&raw);

        if header.protocol_version != PROTOCOL_VERSION {
            return Err(Error::ProtocolVersion {
                operation: COMMAND_OPERATION,
                received: header.protocol_version,
                expected: PROTOCOL_VERSION,
            });
        }

        let (kind, max) = header
            .kind()
            .and_then(|kind| kind.max_inbound_body().map(|max| (kind, max)))
            .ok_or(Error::UnknownMessageType {
                operation: COMMAND_OPERATION,
                message_type: header.message_type,
            })?;

        let operation = body_operation(kind);
        let size = header.body_size as usize;
        if size > max {
            return Err(Error::MessageTooLong {
                operation,
                received: size,
                max,
            });
        }

        let mut body = vec![0u8; size];
        read_exact(&self.device, &mut body, operation)?;
        trace!("received {kind:?} message with {size} bytes of body");

        Ok(InboundMessage::new(header, body))
    }

    /// Check whether a message is waiting.
    ///
    /// Non-blocking mode returns immediately. Blocking mode waits up to the
    /// recheck interval, so callers can observe a quit request in between.
    pub fn have_something_to_read(&self, blocking: bool) -> Result<bool> {
        let timeout_ms = if blocking {
            i32::try_from(self.recheck_interval.as_millis()).unwrap_or(i32::MAX)
        } else {
            0
        };

        let revents = match self.device.poll(PollEvents::IN, timeout_ms) {
            Ok(revents) => revents,
            // a signal; let the caller check for quit
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(false),
            Err(source) => {
                return Err(Error::Read {
                    operation: "poll",
                    source,
                })
            }
        };

        if revents.contains(PollEvents::IN) {
            return Ok(true);
        }
        if blocking && revents.intersects(PollEvents::HUP | PollEvents::ERR) {
            // disconnected port; poll would return immediately
            thread::sleep(self.recheck_interval);
        }
        Ok(false)
    }

    /// Read and dispatch one control message.
    ///
    /// Returns `Ok(true)` once a message was handled. Returns `Ok(false)`
    /// when nothing was waiting in non-blocking mode, or when `quit` was
    /// requested.
    pub fn read_command(&self, blocking: bool, quit: &QuitFlag) -> Result<bool> {
        while !quit.is_requested() {
            if !self.have_something_to_read(blocking)? {
                if !blocking {
                    return Ok(false);
                }
                continue;
            }

            let mut session = self.lock();
            let message = self.receive_locked()?;
            let action = dispatch(&message)?;
            self.apply(&mut session, action)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn apply(&self, session: &mut Session, action: ControlAction) -> Result<()> {
        match action {
            ControlAction::ReplyCapabilities => write_message(&self.device, &CapabilitiesMessage),
            ControlAction::StartStop(codecs) => {
                self.streaming.store(!codecs.is_empty(), Ordering::SeqCst);
                session.codecs = codecs;
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("start/stop generation {generation}");
                Ok(())
            }
            ControlAction::Ignore => Ok(()),
        }
    }
}

fn body_operation(kind: MessageType) -> &'static str {
    match kind {
        MessageType::Capabilities => "capabilities from device",
        MessageType::StartStop => "start/stop command from device",
        MessageType::NotifyError => "NotifyError message",
        _ => COMMAND_OPERATION,
    }
}
