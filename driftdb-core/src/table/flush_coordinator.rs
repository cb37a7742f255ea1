//! Flush rate limiting with request batching
//!
//! If flushes are requested faster than the configured period, the first
//! caller after a recent flush waits out the rest of the period and then
//! flushes once on behalf of everyone who arrived in the meantime.

use crate::{DriftError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of a shared flush, published to every waiter
#[derive(Default)]
struct PendingFlush {
    result: Mutex<Option<std::result::Result<(), String>>>,
    done: Condvar,
}

impl PendingFlush {
    fn publish(&self, result: &Result<()>) {
        let mut slot = self.result.lock();
        *slot = Some(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        self.done.notify_all();
    }

    fn wait(&self) -> Result<()> {
        let mut slot = self.result.lock();
        while slot.is_none() {
            self.done.wait(&mut slot);
        }
        match slot.as_ref() {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(DriftError::Internal(format!("shared flush failed: {}", e))),
            None => Err(DriftError::Internal("shared flush produced no result".into())),
        }
    }
}

#[derive(Default)]
struct CoordinatorState {
    last_flush: Option<Instant>,
    pending: Option<Arc<PendingFlush>>,
}

enum Role {
    /// Flush right away
    Direct,
    /// Wait until the deadline, then flush for the whole batch
    Leader(Arc<PendingFlush>, Instant),
    /// Wait for the leader's result
    Follower(Arc<PendingFlush>),
}

pub struct FlushCoordinator {
    min_interval: Duration,
    state: Mutex<CoordinatorState>,
}

impl FlushCoordinator {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    /// Run `flush`, or share a flush with other callers if one ran too recently
    pub fn flush_with<F>(&self, flush: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let role = {
            let mut state = self.state.lock();
            let now = Instant::now();
            match (&state.pending, state.last_flush) {
                (Some(pending), _) => Role::Follower(pending.clone()),
                (None, Some(last)) if now < last + self.min_interval => {
                    let pending = Arc::new(PendingFlush::default());
                    state.pending = Some(pending.clone());
                    Role::Leader(pending, last + self.min_interval)
                }
                (None, _) => {
                    state.last_flush = Some(now);
                    Role::Direct
                }
            }
        };

        match role {
            Role::Direct => flush(),
            Role::Follower(pending) => pending.wait(),
            Role::Leader(pending, deadline) => {
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                }
                {
                    // Later arrivals start a new batch from here on.
                    let mut state = self.state.lock();
                    state.pending = None;
                    state.last_flush = Some(Instant::now());
                }
                let result = flush();
                pending.publish(&result);
                result
            }
        }
    }
}
