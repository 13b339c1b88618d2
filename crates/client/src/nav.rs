// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Navigation side effects requested by the session core.

/// Receives "go to login" instructions when a session ends.
///
/// Fire-and-forget: implementations must not block.
pub trait Navigator: Send + Sync {
    fn go_to_login(&self);
}

/// Navigator that only records the instruction in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn go_to_login(&self) {
        tracing::info!("session ended, login required");
    }
}
