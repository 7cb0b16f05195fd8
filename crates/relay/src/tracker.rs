//! Active session accounting
//!
//! Upgraded connections leave hyper's connection tracking, so the server
//! counts relay tasks itself to be able to drain them on shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct ActiveSessions {
    count: AtomicUsize,
    idle: Notify,
}

impl ActiveSessions {
    /// Register a session until the guard is dropped.
    ///
    /// The guard is owned so it can be taken before the upgrade and moved
    /// into the relay task.
    pub fn enter(self: &Arc<Self>) -> SessionGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        SessionGuard {
            sessions: Arc::clone(self),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolve once no session is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug)]
pub struct SessionGuard {
    sessions: Arc<ActiveSessions>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.sessions.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.sessions.idle.notify_waiters();
        }
    }
}
