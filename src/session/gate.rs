//! Per-session state gate.
//!
//! At most one `fetch_state` runs per session: the poller skips a tick when
//! the gate is taken, explicit refreshes wait for it. The gate also carries a
//! stage epoch, bumped on every explicit stage set, so a snapshot fetched
//! before a stage change can be recognised as stale when it lands.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct StateGate {
    fetch: Arc<Mutex<()>>,
    epoch: AtomicU64,
}

/// Held for the duration of one state fetch and the handling of its result.
/// Released on drop, including on unwind.
#[derive(Debug)]
pub struct FetchPermit {
    _guard: OwnedMutexGuard<()>,
    issued_epoch: u64,
}

impl FetchPermit {
    /// Stage epoch observed when the fetch was issued.
    pub fn issued_epoch(&self) -> u64 {
        self.issued_epoch
    }
}

impl StateGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait until no other fetch is in flight.
    pub async fn acquire(&self) -> FetchPermit {
        let guard = Arc::clone(&self.fetch).lock_owned().await;
        FetchPermit {
            _guard: guard,
            issued_epoch: self.epoch(),
        }
    }

    /// `None` when a fetch is already in flight.
    pub fn try_acquire(&self) -> Option<FetchPermit> {
        let guard = Arc::clone(&self.fetch).try_lock_owned().ok()?;
        Some(FetchPermit {
            _guard: guard,
            issued_epoch: self.epoch(),
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Record an explicit stage set. Snapshots issued earlier become stale.
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_stale(&self, issued_epoch: u64) -> bool {
        issued_epoch != self.epoch()
    }
}
