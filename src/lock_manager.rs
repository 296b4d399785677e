//! The Group Lock Manager (§4.5): advisory named leases with a
//! client-requested TTL, letting clients coordinate consumer-group
//! ownership externally. The server never preempts work — it only answers
//! acquire attempts against the current holder's lease expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, instrument};

struct Lease {
    holder: u64,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct LockRequest {
    pub acquire: bool,
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockResponse {
    pub locked: bool,
}

/// One bidirectional lock session is identified by an opaque session id
/// issued at stream start; every request on that stream is attributed to
/// the same holder.
pub struct LockManager {
    leases: DashMap<String, Lease>,
    next_session_id: AtomicU64,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            leases: DashMap::new(),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn new_session(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    #[instrument(skip(self))]
    pub fn handle(&self, session: u64, group: &str, request: LockRequest) -> LockResponse {
        if request.acquire {
            LockResponse {
                locked: self.try_acquire(group, session, Duration::from_millis(request.ttl_ms)),
            }
        } else {
            self.release(group, session);
            LockResponse { locked: false }
        }
    }

    fn try_acquire(&self, group: &str, holder: u64, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.leases.entry(group.to_string()) {
            Entry::Occupied(mut entry) => {
                let lease = entry.get();
                if lease.holder == holder || lease.expires_at <= now {
                    debug!(group, holder, "lease acquired");
                    entry.insert(Lease {
                        holder,
                        expires_at: now + ttl,
                    });
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                debug!(group, holder, "lease acquired on unheld group");
                entry.insert(Lease {
                    holder,
                    expires_at: now + ttl,
                });
                true
            }
        }
    }

    /// Releases the lease if `holder` currently owns it; a release by a
    /// non-holder (or of a nonexistent lease) is a harmless no-op.
    fn release(&self, group: &str, holder: u64) {
        if let Entry::Occupied(entry) = self.leases.entry(group.to_string()) {
            if entry.get().holder == holder {
                debug!(group, holder, "lease released");
                entry.remove();
            }
        }
    }
}
