//! Capability check run before any network I/O.
//!
//! Some platforms forbid network access from the UI thread. Instead of
//! blocking (and deadlocking the UI) the fetcher asks its guard first and
//! fails fast with [`ResolveError::NetworkForbidden`].

use crate::{ResolveError, Result};
use std::thread::ThreadId;

/// Decides whether the current context may perform network I/O.
pub trait NetworkGuard: Send + Sync + std::fmt::Debug {
    fn check(&self) -> Result<()>;
}

/// Allows network access everywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unrestricted;

impl NetworkGuard for Unrestricted {
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

/// Forbids network access from one designated (foreground) thread.
#[derive(Debug, Clone)]
pub struct ForegroundThreadGuard {
    thread: ThreadId,
    label: String,
}

impl ForegroundThreadGuard {
    /// Treat the calling thread as the foreground thread.
    pub fn for_current_thread() -> Self {
        let current = std::thread::current();
        Self {
            thread: current.id(),
            label: current.name().unwrap_or("unnamed").to_string(),
        }
    }
}

impl NetworkGuard for ForegroundThreadGuard {
    fn check(&self) -> Result<()> {
        if std::thread::current().id() == self.thread {
            return Err(ResolveError::NetworkForbidden {
                reason: format!("network I/O on foreground thread '{}'", self.label),
            });
        }
        Ok(())
    }
}
