// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Scripted in-memory stream device for unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::thread;

use crate::port::{PollEvents, PortIo};
use crate::protocol::{Header, MessageType, HEADER_SIZE, PROTOCOL_VERSION};
use crate::quit::QuitFlag;

#[derive(Default)]
struct MockState {
    inbound: VecDeque<u8>,
    staged: Vec<Vec<u8>>,
    read_chunk: usize,
    write_chunk: usize,
    interrupts: usize,
    write_blocks: usize,
    poll_interrupts: usize,
    poll_failure: Option<i32>,
    read_failure: Option<i32>,
    write_failure: Option<i32>,
    closed: bool,
    hangup: bool,
    writes: Vec<Vec<u8>>,
    quit_on_idle: Option<QuitFlag>,
}

/// Stream device whose inbound bytes and failure modes are scripted by the test.
#[derive(Default)]
pub(crate) struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make bytes available to the reader.
    pub(crate) fn push_inbound(&self, bytes: &[u8]) {
        self.state().inbound.extend(bytes.iter().copied());
    }

    /// Bytes delivered the next time the reader waits on an empty device.
    pub(crate) fn release_on_poll(&self, bytes: &[u8]) {
        self.state().staged.push(bytes.to_vec());
    }

    pub(crate) fn set_read_chunk(&self, chunk: usize) {
        self.state().read_chunk = chunk;
    }

    pub(crate) fn set_write_chunk(&self, chunk: usize) {
        self.state().write_chunk = chunk;
    }

    /// The next `count` read or write calls fail with `EINTR`.
    pub(crate) fn inject_interrupts(&self, count: usize) {
        self.state().interrupts = count;
    }

    /// The next `count` write calls fail with `EAGAIN`.
    pub(crate) fn inject_write_blocks(&self, count: usize) {
        self.state().write_blocks = count;
    }

    /// The next `count` poll calls fail with `EINTR`.
    pub(crate) fn inject_poll_interrupts(&self, count: usize) {
        self.state().poll_interrupts = count;
    }

    pub(crate) fn fail_next_poll(&self, errno: i32) {
        self.state().poll_failure = Some(errno);
    }

    pub(crate) fn fail_next_read(&self, errno: i32) {
        self.state().read_failure = Some(errno);
    }

    pub(crate) fn fail_writes(&self, errno: i32) {
        self.state().write_failure = Some(errno);
    }

    /// Reads return end of stream once the inbound bytes are drained.
    pub(crate) fn close_peer(&self) {
        self.state().closed = true;
    }

    /// Polls report `POLLHUP`.
    pub(crate) fn hang_up(&self) {
        self.state().hangup = true;
    }

    /// Request `quit` when a timed wait finds nothing to read.
    pub(crate) fn quit_when_idle(&self, quit: QuitFlag) {
        self.state().quit_on_idle = Some(quit);
    }

    /// All bytes written so far.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.state().writes.concat()
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.state().writes.len()
    }

    pub(crate) fn unread(&self) -> usize {
        self.state().inbound.len()
    }
}

impl PortIo for MockDevice {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.interrupts > 0 {
            state.interrupts -= 1;
            return Err(io::Error::from_raw_os_error(libc::EINTR));
        }
        if let Some(errno) = state.read_failure.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if state.inbound.is_empty() {
            if state.closed {
                return Ok(0);
            }
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }

        let mut n = buf.len().min(state.inbound.len());
        if state.read_chunk > 0 {
            n = n.min(state.read_chunk);
        }
        for (dst, src) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let written = {
            let mut state = self.state();
            if state.interrupts > 0 {
                state.interrupts -= 1;
                return Err(io::Error::from_raw_os_error(libc::EINTR));
            }
            if state.write_blocks > 0 {
                state.write_blocks -= 1;
                return Err(io::Error::from_raw_os_error(libc::EAGAIN));
            }
            if let Some(errno) = state.write_failure {
                return Err(io::Error::from_raw_os_error(errno));
            }

            let mut n = buf.len();
            if state.write_chunk > 0 {
                n = n.min(state.write_chunk);
            }
            state.writes.push(buf[..n].to_vec());
            n
        };
        // Give concurrent writers a chance to run between partial writes
        thread::yield_now();
        Ok(written)
    }

    fn poll(&self, events: PollEvents, timeout_ms: i32) -> io::Result<PollEvents> {
        let mut state = self.state();
        if state.poll_interrupts > 0 {
            state.poll_interrupts -= 1;
            return Err(io::Error::from_raw_os_error(libc::EINTR));
        }
        if let Some(errno) = state.poll_failure.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if events.contains(PollEvents::IN) && state.inbound.is_empty() && !state.staged.is_empty()
        {
            let bytes = state.staged.remove(0);
            state.inbound.extend(bytes);
        }

        let mut revents = PollEvents::empty();
        if events.contains(PollEvents::IN) && !state.inbound.is_empty() {
            revents |= PollEvents::IN;
        }
        if events.contains(PollEvents::OUT) && !state.hangup {
            revents |= PollEvents::OUT;
        }
        if state.hangup || (state.closed && state.inbound.is_empty()) {
            revents |= PollEvents::HUP;
        }

        if revents.is_empty() {
            if timeout_ms != 0 {
                if let Some(quit) = &state.quit_on_idle {
                    quit.request();
                }
            }
            if timeout_ms < 0 {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "mock device would block forever",
                ));
            }
        }
        Ok(revents)
    }
}

/// Encode a raw inbound message with an arbitrary header.
pub(crate) fn raw_message(message_type: u16, body_size: u32, body: &[u8]) -> Vec<u8> {
    let header = Header {
        protocol_version: PROTOCOL_VERSION,
        message_type,
        body_size,
    };
    let mut bytes = header.encode().to_vec();
    bytes.extend_from_slice(body);
    bytes
}

/// Encode a well-formed START_STOP message.
pub(crate) fn start_stop(codecs: &[u8]) -> Vec<u8> {
    let mut body = vec![codecs.len() as u8];
    body.extend_from_slice(codecs);
    raw_message(MessageType::StartStop as u16, body.len() as u32, &body)
}

/// Split a byte stream into `(header, body)` pairs.
pub(crate) fn split_messages(mut bytes: &[u8]) -> Vec<(Header, Vec<u8>)> {
    let mut messages = Vec::new();
    while !bytes.is_empty() {
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = Header::decode(&raw);
        let end = HEADER_SIZE + header.body_size as usize;
        messages.push((header, bytes[HEADER_SIZE..end].to_vec()));
        bytes = &bytes[end..];
    }
    messages
}
