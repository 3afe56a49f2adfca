//! The single active session, with a generation counter for invalidation.
//!
//! Every request captures a [`SessionLease`] when issued. At completion the
//! lease is checked against the current one; a session switch or dispose in
//! between makes the completion a no-op.

use std::sync::{Arc, Mutex};

use super::gate::StateGate;
use crate::client::SessionId;

/// Snapshot of the active session at the moment a request was issued.
#[derive(Debug, Clone)]
pub struct SessionLease {
    pub session_id: SessionId,
    pub generation: u64,
    /// State gate of this session; shared by every lease on the same id.
    pub gate: Arc<StateGate>,
}

impl PartialEq for SessionLease {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id && self.generation == other.generation
    }
}

impl Eq for SessionLease {}

#[derive(Debug, Default)]
struct Inner {
    current: Option<(SessionId, Arc<StateGate>)>,
    generation: u64,
}

/// Owner of the client-side session id.
#[derive(Debug, Default)]
pub struct ActiveSession {
    inner: Mutex<Inner>,
}

impl ActiveSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session_id` the active session. Outstanding leases go stale.
    ///
    /// Re-activating the current id keeps its gate, so a fetch still in
    /// flight from before keeps excluding new ones.
    pub fn create(&self, session_id: SessionId) -> SessionLease {
        let mut inner = self.lock();
        inner.generation += 1;
        let gate = match &inner.current {
            Some((id, gate)) if *id == session_id => Arc::clone(gate),
            _ => StateGate::new(),
        };
        inner.current = Some((session_id.clone(), Arc::clone(&gate)));
        SessionLease {
            session_id,
            generation: inner.generation,
            gate,
        }
    }

    /// Release the active session. Outstanding leases go stale.
    pub fn dispose(&self) -> Option<SessionId> {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.current.take().map(|(id, _)| id)
    }

    /// Lease on the current session, if any.
    pub fn lease(&self) -> Option<SessionLease> {
        let inner = self.lock();
        inner.current.as_ref().map(|(session_id, gate)| SessionLease {
            session_id: session_id.clone(),
            generation: inner.generation,
            gate: Arc::clone(gate),
        })
    }

    /// Whether `lease` still refers to the active session.
    pub fn is_current(&self, lease: &SessionLease) -> bool {
        let inner = self.lock();
        inner.generation == lease.generation
            && inner.current.as_ref().is_some_and(|(id, _)| *id == lease.session_id)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.lock().current.as_ref().map(|(id, _)| id.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
