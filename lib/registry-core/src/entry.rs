//! Service entry management
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Heartbeat bookkeeping for an entry.
///
/// `seq` grows by one on every refresh, so a back-reference that remembers
/// the sequence it was taken at can tell whether a newer one exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Touch {
    pub(crate) at: Instant,
    pub(crate) seq: u64,
}

/// A registered service and its liveness metadata.
///
/// The registry owns every live entry behind an `Arc`; clones handed out to
/// callers are detached snapshots.
#[derive(Debug)]
pub struct ServiceEntry {
    pub id: String,
    pub host: String,
    pub port: u16,
    touch: Mutex<Touch>,
}

impl ServiceEntry {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            touch: Mutex::new(Touch {
                at: Instant::now(),
                seq: 0,
            }),
        }
    }

    /// Time of the registration or of the last heartbeat
    pub fn last_update_time(&self) -> Instant {
        self.touch().at
    }

    /// `host:port`, with IPv6 hosts bracketed
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Whether the entry has gone longer than `expire_time` without a heartbeat
    pub fn is_expired(&self, expire_time: Duration, now: Instant) -> bool {
        self.last_update_time() + expire_time < now
    }

    pub(crate) fn touch(&self) -> Touch {
        *self.touch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn refresh(&self, now: Instant) -> Touch {
        let mut touch = self.touch.lock().unwrap_or_else(PoisonError::into_inner);
        touch.at = now;
        touch.seq += 1;
        *touch
    }
}

impl Clone for ServiceEntry {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            touch: Mutex::new(self.touch()),
        }
    }
}
