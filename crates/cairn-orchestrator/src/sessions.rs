//! Per-session execution guard and execution-record locks
//!
//! At most one stage of a session runs at a time. Claims are released when
//! the returned [`SessionClaim`] is dropped, including on early return.
//!
//! Pause and resume do not claim the session, so every read-modify-write of
//! the execution record goes through [`ExecutionLocks`] instead.

use cairn_core::{CairnError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SessionGuard {
    active: Arc<Mutex<HashSet<String>>>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a session, failing with `SessionBusy` if it is already claimed
    pub fn claim(&self, session_id: &str) -> Result<SessionClaim> {
        let mut active = lock(&self.active);
        if !active.insert(session_id.to_string()) {
            return Err(CairnError::SessionBusy(session_id.to_string()));
        }
        debug!(session_id, "Claimed session");
        Ok(SessionClaim {
            session_id: session_id.to_string(),
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_claimed(&self, session_id: &str) -> bool {
        lock(&self.active).contains(session_id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }
}

/// Holds a session until dropped
#[derive(Debug)]
pub struct SessionClaim {
    session_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl SessionClaim {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.session_id);
        debug!(session_id = %self.session_id, "Released session");
    }
}

/// Serializes writes to each session's execution record
///
/// Held across the await points of a read-modify-write, so the per-session
/// locks are async. Idle locks are pruned on the next acquire.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ExecutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a session's execution record
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let session_lock = {
            let mut locks = lock(&self.locks);
            // Only the map holds an idle lock
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };
        session_lock.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        lock(&self.locks).len()
    }
}

// The map stays consistent even if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive() {
        let guard = SessionGuard::new();
        let claim = guard.claim("s1").unwrap();
        assert_eq!(claim.session_id(), "s1");
        assert!(guard.is_claimed("s1"));

        let err = guard.claim("s1").unwrap_err();
        assert!(matches!(err, CairnError::SessionBusy(_)));

        // Other sessions are independent
        let other = guard.claim("s2").unwrap();
        assert_eq!(guard.active_count(), 2);

        drop(claim);
        drop(other);
        assert_eq!(guard.active_count(), 0);
        assert!(guard.claim("s1").is_ok());
    }

    #[tokio::test]
    async fn test_execution_lock_is_exclusive_per_session() {
        let locks = ExecutionLocks::new();
        let held = locks.acquire("s1").await;

        // Another session is not blocked
        let other = locks.acquire("s2").await;
        drop(other);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("s1").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_execution_locks_are_pruned() {
        let locks = ExecutionLocks::new();
        drop(locks.acquire("s1").await);
        drop(locks.acquire("s2").await);
        let _held = locks.acquire("s3").await;
        assert_eq!(locks.tracked(), 1);
    }

    #[test]
    fn test_clones_share_claims() {
        let guard = SessionGuard::new();
        let clone = guard.clone();
        let _claim = guard.claim("s1").unwrap();
        assert!(clone.claim("s1").is_err());
    }
}
