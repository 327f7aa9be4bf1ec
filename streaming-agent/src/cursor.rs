// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Cursor shape forwarding
//!
//! A [`CursorSource`] reports cursor shape changes; [`CursorUpdater`] runs it
//! on its own thread and sends every new shape over the shared stream port.

use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::message::CursorMessage;
use crate::port::PortIo;
use crate::quit::QuitFlag;
use crate::stream::StreamPort;

/// Cursor shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorImage {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Hotspot X offset
    pub hotspot_x: u16,
    /// Hotspot Y offset
    pub hotspot_y: u16,
    /// ARGB pixels, row major, `width * height` entries
    pub pixels: Vec<u32>,
}

/// Cursor capture trait
pub trait CursorSource: Send {
    /// Wait briefly for a cursor change.
    ///
    /// Returns `Ok(None)` when the shape did not change within the source's
    /// wait slice, so the caller can check for a quit request.
    fn next_image(&mut self) -> Result<Option<CursorImage>>;
}

/// Send `image` to the peer.
///
/// Returns `Ok(false)` without writing anything when the image cannot be
/// represented on the wire.
pub fn send_cursor_image<D: PortIo>(port: &StreamPort<D>, image: &CursorImage) -> Result<bool> {
    match CursorMessage::new(image) {
        Some(message) => {
            port.send(&message)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Background thread forwarding cursor changes
pub struct CursorUpdater {
    handle: thread::JoinHandle<()>,
}

impl CursorUpdater {
    /// Start forwarding shapes from `source` until `quit` is requested.
    ///
    /// Cursor updates are best-effort: send failures are logged and do not
    /// stop the thread. A failing source ends it.
    pub fn spawn<D>(
        port: Arc<StreamPort<D>>,
        mut source: Box<dyn CursorSource>,
        quit: QuitFlag,
    ) -> Result<Self>
    where
        D: PortIo + 'static,
    {
        let handle = thread::Builder::new()
            .name("cursor".to_string())
            .spawn(move || {
                info!("cursor updater started");
                while !quit.is_requested() {
                    let image = match source.next_image() {
                        Ok(Some(image)) => image,
                        Ok(None) => continue,
                        Err(e) => {
                            error!("cursor updates stopped: {e}");
                            break;
                        }
                    };

                    match send_cursor_image(&port, &image) {
                        Ok(true) => debug!(
                            "sent cursor {}x{} hotspot ({}, {})",
                            image.width, image.height, image.hotspot_x, image.hotspot_y
                        ),
                        Ok(false) => debug!(
                            "dropping cursor {}x{}: too large",
                            image.width, image.height
                        ),
                        Err(e) => warn!("failed to send cursor: {e}"),
                    }
                }
                debug!("cursor updater exiting");
            })
            .map_err(|e| Error::Cursor(format!("failed to start cursor thread: {e}")))?;

        Ok(Self { handle })
    }

    /// Wait for the thread to finish.
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("cursor updater thread panicked");
        }
    }
}

#[cfg(all(target_os = "linux", feature = "x11"))]
pub use x11_cursor::X11CursorSource;

/// X11 cursor source using the XFixes extension
#[cfg(all(target_os = "linux", feature = "x11"))]
pub mod x11_cursor {
    use std::thread;
    use std::time::Duration;

    use x11rb::connection::Connection;
    use x11rb::protocol::xfixes::{ConnectionExt as XfixesExt, CursorNotifyMask};
    use x11rb::protocol::Event;
    use x11rb::rust_connection::RustConnection;

    use super::{CursorImage, CursorSource};
    use crate::error::{Error, Result};

    /// Wait between event polls when nothing happened
    const POLL_SLICE: Duration = Duration::from_millis(50);

    /// Watches cursor changes on the root window of the default display
    pub struct X11CursorSource {
        display: RustConnection,
        last_cursor_serial: Option<u32>,
        initial_sent: bool,
    }

    impl X11CursorSource {
        /// Connect to the display named by `$DISPLAY`.
        pub fn new() -> Result<Self> {
            let (display, screen_num) = x11rb::connect(None)
                .map_err(|e| Error::Cursor(format!("failed to open X display: {e}")))?;

            let root = display
                .setup()
                .roots
                .get(screen_num)
                .map(|screen| screen.root)
                .ok_or_else(|| Error::Cursor(format!("screen {screen_num} not found")))?;

            // XFixes requires version negotiation before any other request
            let version = display
                .xfixes_query_version(5, 0)
                .map_err(|e| Error::Cursor(e.to_string()))?
                .reply()
                .map_err(|e| Error::Cursor(format!("XFixes extension not available: {e}")))?;
            if version.major_version < 2 {
                return Err(Error::Cursor(format!(
                    "XFixes {}.{} does not report cursor changes",
                    version.major_version, version.minor_version
                )));
            }

            display
                .xfixes_select_cursor_input(root, CursorNotifyMask::DISPLAY_CURSOR)
                .map_err(|e| Error::Cursor(e.to_string()))?
                .check()
                .map_err(|e| Error::Cursor(e.to_string()))?;

            Ok(Self {
                display,
                last_cursor_serial: None,
                initial_sent: false,
            })
        }

        fn fetch_image(&mut self) -> Result<Option<CursorImage>> {
            let reply = self
                .display
                .xfixes_get_cursor_image()
                .map_err(|e| Error::Cursor(e.to_string()))?
                .reply()
                .map_err(|e| Error::Cursor(e.to_string()))?;

            if self.last_cursor_serial == Some(reply.cursor_serial) {
                return Ok(None);
            }
            self.last_cursor_serial = Some(reply.cursor_serial);

            Ok(Some(CursorImage {
                width: u32::from(reply.width),
                height: u32::from(reply.height),
                hotspot_x: reply.xhot,
                hotspot_y: reply.yhot,
                pixels: reply.cursor_image,
            }))
        }
    }

    impl CursorSource for X11CursorSource {
        fn next_image(&mut self) -> Result<Option<CursorImage>> {
            if !self.initial_sent {
                self.initial_sent = true;
                return self.fetch_image();
            }

            let mut changed = false;
            while let Some(event) = self
                .display
                .poll_for_event()
                .map_err(|e| Error::Cursor(e.to_string()))?
            {
                changed |= matches!(event, Event::XfixesCursorNotify(_));
            }

            if changed {
                return self.fetch_image();
            }
            thread::sleep(POLL_SLICE);
            Ok(None)
        }
    }
}
