// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Low-level access to the streaming port device
//!
//! The port is opened non-blocking. [`read_exact`] and [`write_exact`] turn
//! the partial, interruptible transfers of the character device into whole
//! buffer transfers, waiting with `poll(2)` whenever the device would block.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Readiness events as used by `poll(2)`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollEvents: i16 {
        /// Data may be read without blocking
        const IN = libc::POLLIN;
        /// Data may be written without blocking
        const OUT = libc::POLLOUT;
        /// Error condition
        const ERR = libc::POLLERR;
        /// The other end hung up
        const HUP = libc::POLLHUP;
        /// The descriptor is not open
        const NVAL = libc::POLLNVAL;
    }
}

/// Raw transfer operations on a stream device.
///
/// Implementations perform a single system call per method and report
/// `EINTR`/`EAGAIN` as [`io::ErrorKind::Interrupted`] and
/// [`io::ErrorKind::WouldBlock`]; retrying is left to the framing helpers.
pub trait PortIo: Send + Sync {
    /// Read at most `buf.len()` bytes. `Ok(0)` means the peer closed.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write at most `buf.len()` bytes.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Wait up to `timeout_ms` (`-1` waits forever) for `events`.
    fn poll(&self, events: PollEvents, timeout_ms: i32) -> io::Result<PollEvents>;
}

impl<T: PortIo + ?Sized> PortIo for Arc<T> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn poll(&self, events: PollEvents, timeout_ms: i32) -> io::Result<PollEvents> {
        (**self).poll(events, timeout_ms)
    }
}

/// A stream device backed by a file descriptor.
#[derive(Debug)]
pub struct DevicePort {
    file: File,
}

impl DevicePort {
    /// Open the device read/write and non-blocking.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self { file })
    }
}

impl From<OwnedFd> for DevicePort {
    fn from(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }
}

impl AsRawFd for DevicePort {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl PortIo for DevicePort {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (&self.file).write(buf)
    }

    fn poll(&self, events: PollEvents, timeout_ms: i32) -> io::Result<PollEvents> {
        let mut pollfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: events.bits(),
            revents: 0,
        };

        // SAFETY: `pollfd` is a valid array of one element that outlives the call,
        // and the descriptor is owned by `self.file`.
        let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(PollEvents::from_bits_truncate(pollfd.revents))
    }
}

/// Read exactly `buf.len()` bytes from `device`.
///
/// `operation` names what is being read and ends up in the error.
pub fn read_exact<D: PortIo + ?Sized>(
    device: &D,
    buf: &mut [u8],
    operation: &'static str,
) -> Result<()> {
    let mut done = 0;
    while done < buf.len() {
        match device.read(&mut buf[done..]) {
            Ok(0) => return Err(Error::PeerClosed { operation }),
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => wait_readable(device, operation)?,
            Err(source) => return Err(Error::Read { operation, source }),
        }
    }
    Ok(())
}

/// Write all of `buf` to `device`.
pub fn write_exact<D: PortIo + ?Sized>(
    device: &D,
    buf: &[u8],
    operation: &'static str,
) -> Result<()> {
    let mut done = 0;
    while done < buf.len() {
        match device.write(&buf[done..]) {
            Ok(0) => {
                return Err(Error::Write {
                    operation,
                    source: io::Error::from(io::ErrorKind::WriteZero),
                })
            }
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => wait_writable(device, operation)?,
            Err(source) => return Err(Error::Write { operation, source }),
        }
    }
    log::trace!("write_exact -- {done} bytes written ({operation})");
    Ok(())
}

fn wait_readable<D: PortIo + ?Sized>(device: &D, operation: &'static str) -> Result<()> {
    loop {
        match device.poll(PollEvents::IN, -1) {
            Ok(revents) => {
                // Drain buffered data before honouring a hang-up
                if revents.contains(PollEvents::IN) {
                    return Ok(());
                }
                if revents.contains(PollEvents::HUP) {
                    return Err(Error::PeerClosed { operation });
                }
                if revents.intersects(PollEvents::ERR | PollEvents::NVAL) {
                    return Err(Error::Read {
                        operation,
                        source: io::Error::new(
                            io::ErrorKind::Other,
                            format!("poll reported {revents:?}"),
                        ),
                    });
                }
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(Error::Read { operation, source }),
        }
    }
}

fn wait_writable<D: PortIo + ?Sized>(device: &D, operation: &'static str) -> Result<()> {
    loop {
        match device.poll(PollEvents::OUT, -1) {
            Ok(revents) => {
                if revents.contains(PollEvents::HUP) {
                    return Err(Error::WriteHangup { operation });
                }
                if revents.intersects(PollEvents::ERR | PollEvents::NVAL) {
                    return Err(Error::Write {
                        operation,
                        source: io::Error::new(
                            io::ErrorKind::Other,
                            format!("poll reported {revents:?}"),
                        ),
                    });
                }
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(Error::Write { operation, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::MockDevice;

    #[test]
    fn test_read_exact_survives_interrupts_and_short_reads() {
        let device = MockDevice::new();
        device.push_inbound(b"brekeke");
        device.set_read_chunk(2);
        device.inject_interrupts(3);

        let mut buf = [0u8; 7];
        read_exact(&device, &mut buf, "test data").unwrap();
        assert_eq!(&buf, b"brekeke");
    }

    #[test]
    fn test_read_exact_waits_when_device_would_block() {
        let device = MockDevice::new();
        device.push_inbound(b"bre");
        device.release_on_poll(b"keke");

        let mut buf = [0u8; 7];
        read_exact(&device, &mut buf, "test data").unwrap();
        assert_eq!(&buf, b"brekeke");
    }

    #[test]
    fn test_read_exact_reports_peer_closed_after_buffered_data() {
        let device = MockDevice::new();
        device.push_inbound(b"keke");
        device.close_peer();

        let mut buf = [0u8; 4];
        read_exact(&device, &mut buf, "test data").unwrap();
        assert_eq!(&buf, b"keke");

        let mut one = [0u8; 1];
        let err = read_exact(&device, &mut one, "test data").unwrap_err();
        assert!(matches!(err, Error::PeerClosed { operation: "test data" }));
    }

    #[test]
    fn test_read_exact_hangup_while_waiting() {
        let device = MockDevice::new();
        device.hang_up();

        let mut buf = [0u8; 4];
        let err = read_exact(&device, &mut buf, "header").unwrap_err();
        assert!(matches!(err, Error::PeerClosed { .. }));
    }

    #[test]
    fn test_write_exact_survives_interrupts_and_backpressure() {
        let device = MockDevice::new();
        device.set_write_chunk(3);
        device.inject_interrupts(2);
        device.inject_write_blocks(2);

        write_exact(&device, b"brekeke", "test data").unwrap();
        assert_eq!(device.written(), b"brekeke");
    }

    #[test]
    fn test_write_exact_hangup_is_write_failure() {
        let device = MockDevice::new();
        device.inject_write_blocks(1);
        device.hang_up();

        let err = write_exact(&device, b"brekeke", "frame").unwrap_err();
        assert!(matches!(err, Error::WriteHangup { operation: "frame" }));
        assert!(err.is_write_failure());
    }

    #[test]
    fn test_interrupted_poll_is_retried() {
        let device = MockDevice::new();
        device.push_inbound(b"bre");
        device.release_on_poll(b"keke");
        device.inject_poll_interrupts(3);

        let mut buf = [0u8; 7];
        read_exact(&device, &mut buf, "test data").unwrap();
        assert_eq!(&buf, b"brekeke");

        device.inject_write_blocks(1);
        device.inject_poll_interrupts(2);
        write_exact(&device, b"keke", "test data").unwrap();
        assert_eq!(device.written(), b"keke");
    }

    #[test]
    fn test_poll_failure_while_reading() {
        let device = MockDevice::new();
        device.fail_next_poll(libc::EBADF);

        let mut buf = [0u8; 4];
        match read_exact(&device, &mut buf, "header").unwrap_err() {
            Error::Read { operation, source } => {
                assert_eq!(operation, "header");
                assert_eq!(source.raw_os_error(), Some(libc::EBADF));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_poll_failure_while_writing() {
        let device = MockDevice::new();
        device.inject_write_blocks(1);
        device.fail_next_poll(libc::ENOMEM);

        let err = write_exact(&device, b"brekeke", "frame").unwrap_err();
        assert!(err.is_write_failure());
        match err {
            Error::Write { operation, source } => {
                assert_eq!(operation, "frame");
                assert_eq!(source.raw_os_error(), Some(libc::ENOMEM));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_os_error_is_wrapped_with_operation() {
        let device = MockDevice::new();
        device.fail_next_read(libc::EIO);

        let mut buf = [0u8; 1];
        let err = read_exact(&device, &mut buf, "header").unwrap_err();
        match err {
            Error::Read { operation, source } => {
                assert_eq!(operation, "header");
                assert_eq!(source.raw_os_error(), Some(libc::EIO));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
