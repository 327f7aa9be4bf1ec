// Copyright 2024 streaming-agent Authors
// SPDX-License-Identifier: Apache-2.0

//! Cooperative cancellation shared by the capture and cursor threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flag set once when the agent should shut down.
///
/// Clones share the same flag. Loops poll [`QuitFlag::is_requested`] between
/// blocking waits.
#[derive(Debug, Clone, Default)]
pub struct QuitFlag {
    requested: Arc<AtomicBool>,
}

impl QuitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of the flag to stop.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
