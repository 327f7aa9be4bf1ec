// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Optional per-frame log file
//!
//! In text mode every entry is a line prefixed with a microsecond timestamp,
//! optionally followed by a hexdump of the frame. In binary mode only the raw
//! frame bytes are written, back to back.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const BYTES_PER_LINE: usize = 16;

/// Frame log writer
pub struct FrameLog {
    out: Box<dyn Write + Send>,
    binary: bool,
    frame_data: bool,
}

impl FrameLog {
    /// Create (truncate) the log file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, binary: bool, frame_data: bool) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file)), binary, frame_data))
    }

    pub fn new(out: Box<dyn Write + Send>, binary: bool, frame_data: bool) -> Self {
        Self {
            out,
            binary,
            frame_data,
        }
    }

    /// Write a timestamped line. Ignored in binary mode.
    pub fn log_stat(&mut self, message: &str) -> io::Result<()> {
        if self.binary {
            return Ok(());
        }
        writeln!(self.out, "{}: {message}", timestamp_us())?;
        self.out.flush()
    }

    /// Record one frame.
    pub fn log_frame(&mut self, buffer: &[u8]) -> io::Result<()> {
        if self.binary {
            self.out.write_all(buffer)?;
            return self.out.flush();
        }

        writeln!(self.out, "{}: Frame of {} bytes", timestamp_us(), buffer.len())?;
        if self.frame_data {
            hexdump(buffer, &mut self.out)?;
        }
        self.out.flush()
    }
}

fn timestamp_us() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_micros())
}

/// Write `data` as offset, hex bytes and printable characters, 16 bytes per
/// line, followed by the byte sum.
pub fn hexdump<W: Write + ?Sized>(data: &[u8], out: &mut W) -> io::Result<()> {
    let mut sum: u64 = 0;
    for (line, chunk) in data.chunks(BYTES_PER_LINE).enumerate() {
        let mut hex = String::with_capacity(BYTES_PER_LINE * 3);
        let mut text = String::with_capacity(BYTES_PER_LINE);
        for &byte in chunk {
            sum += u64::from(byte);
            hex.push_str(&format!("{byte:02X} "));
            text.push(if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            });
        }
        writeln!(
            out,
            "{:04X}  {hex:<width$}\t{text}",
            line * BYTES_PER_LINE,
            width = BYTES_PER_LINE * 3
        )?;
    }
    writeln!(out, "sum = {sum}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_hexdump_format() {
        let mut out = Vec::new();
        hexdump(b"Hello, world!\n\x00\x01ABC", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("0000  48 65 6C 6C 6F 2C 20 77 "));
        assert!(lines[0].ends_with("\tHello, world!..."));
        assert!(lines[1].starts_with("0010  41 42 43 "));
        assert!(lines[1].ends_with("\tABC"));
        let sum: u64 = b"Hello, world!\n\x00\x01ABC".iter().map(|&b| u64::from(b)).sum();
        assert_eq!(lines[2], format!("sum = {sum}"));
    }

    #[test]
    fn test_text_mode() {
        let sink = Shared::default();
        let mut log = FrameLog::new(Box::new(sink.clone()), false, false);
        log.log_stat("stream started").unwrap();
        log.log_frame(&[1, 2, 3]).unwrap();

        let text = sink.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(": stream started"));
        assert!(lines[1].ends_with(": Frame of 3 bytes"));
    }

    #[test]
    fn test_text_mode_with_frame_data() {
        let sink = Shared::default();
        let mut log = FrameLog::new(Box::new(sink.clone()), false, true);
        log.log_frame(b"AB").unwrap();

        let text = sink.text();
        assert!(text.contains("Frame of 2 bytes"));
        assert!(text.contains("0000  41 42 "));
        assert!(text.ends_with("sum = 131\n"));
    }

    #[test]
    fn test_binary_mode() {
        let sink = Shared::default();
        let mut log = FrameLog::new(Box::new(sink.clone()), true, true);
        log.log_stat("ignored").unwrap();
        log.log_frame(&[0xde, 0xad]).unwrap();
        log.log_frame(&[0xbe, 0xef]).unwrap();

        assert_eq!(*sink.0.lock().unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }
}
