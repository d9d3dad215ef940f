//! Cooperative shutdown and child-process bookkeeping.
//!
//! One [`ShutdownController`] exists per run. Its token is handed to every
//! component explicitly; once cancelled it stays cancelled. Every spawned
//! encoder/downloader registers its pid for as long as it is being waited
//! on, so an interrupt can terminate whatever is still running.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Default time a child gets between the termination request and the kill.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Process-wide cancellation primitive plus the registry of live children.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    token: CancellationToken,
    pids: Arc<Mutex<BTreeSet<u32>>>,
    grace: Duration,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

impl ShutdownController {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            pids: Arc::new(Mutex::new(BTreeSet::new())),
            grace,
        }
    }

    /// Ask every component to stop. Idempotent.
    pub fn request_shutdown(&self) {
        if !self.token.is_cancelled() {
            tracing::warn!(
                live_processes = self.active_pids().len(),
                "Shutdown requested"
            );
        }
        self.token.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token to pass to components and `select!` on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Grace period between the termination request and the kill.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Register a live child. The pid is removed when the guard drops.
    pub fn register(&self, pid: u32) -> PidGuard {
        if let Ok(mut pids) = self.pids.lock() {
            pids.insert(pid);
        }
        tracing::trace!(pid, "Registered child process");
        PidGuard {
            pid,
            pids: Arc::clone(&self.pids),
        }
    }

    /// Pids of children currently being waited on.
    pub fn active_pids(&self) -> Vec<u32> {
        self.pids
            .lock()
            .map(|pids| pids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Wait for every registered child to exit.
    ///
    /// Children still registered after `grace` are force-killed. Returns
    /// the number of children that had to be killed.
    pub async fn drain(&self, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let live = self.active_pids();
            if live.is_empty() {
                return 0;
            }
            if tokio::time::Instant::now() >= deadline {
                for pid in &live {
                    tracing::warn!(pid, "Force-killing child process after grace period");
                    kill_pid(*pid);
                }
                return live.len();
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}

/// Keeps a pid registered while alive.
#[derive(Debug)]
pub struct PidGuard {
    pid: u32,
    pids: Arc<Mutex<BTreeSet<u32>>>,
}

impl PidGuard {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        if let Ok(mut pids) = self.pids.lock() {
            pids.remove(&self.pid);
        }
    }
}

/// Politely ask a process to exit. Returns whether the signal was sent.
#[cfg(unix)]
pub fn terminate_pid(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
pub fn terminate_pid(_pid: u32) -> bool {
    false
}

/// Forcefully kill a process. Returns whether the signal was sent.
#[cfg(unix)]
pub fn kill_pid(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe { libc::kill(pid, libc::SIGKILL) == 0 }
}

#[cfg(not(unix))]
pub fn kill_pid(_pid: u32) -> bool {
    false
}
