use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::errors::{DeskAgentError, DeskAgentResult};
use crate::executor::handle::{DesktopHandle, DesktopResolver};

/// Resolves desktop handles and guarantees at most one action pipeline per session
/// mutates its desktop at a time.
pub struct DesktopSessions {
    resolver: Arc<dyn DesktopResolver>,
    locks: LockMap,
}

type LockMap = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Exclusive access to one session's desktop for the lifetime of the lease.
pub struct SessionLease {
    pub session_id: String,
    pub handle: Arc<dyn DesktopHandle>,
    _slot: SessionSlot,
}

/// Holds a session's lock; the map entry goes away with the last holder.
struct SessionSlot {
    session_id: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let idle = match locks.get(&self.session_id) {
            // The map and this slot are the only owners: nobody holds or waits.
            Some(entry) => Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(&self.lock) == 2,
            None => false,
        };
        if idle {
            locks.remove(&self.session_id);
        }
    }
}

impl DesktopSessions {
    pub fn new(resolver: Arc<dyn DesktopResolver>) -> Self {
        Self {
            resolver,
            locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Waits for the session to be free, then re-resolves its handle.
    pub async fn acquire(&self, session_id: &str) -> DeskAgentResult<SessionLease> {
        let lock = self.lock_for(session_id);
        let guard = lock.clone().lock_owned().await;
        let slot = SessionSlot {
            session_id: session_id.to_string(),
            lock,
            guard: Some(guard),
            locks: self.locks.clone(),
        };
        let handle = self
            .resolver
            .resolve(session_id)
            .await
            .map_err(|e| match e {
                unavailable @ DeskAgentError::DesktopUnavailable { .. } => unavailable,
                other => DeskAgentError::DesktopUnavailable {
                    session_id: session_id.to_string(),
                    reason: other.to_string(),
                },
            })?;
        tracing::debug!(session = %session_id, "desktop session acquired");
        Ok(SessionLease {
            session_id: session_id.to_string(),
            handle,
            _slot: slot,
        })
    }

    /// Tears the remote desktop down and forgets the session's lock.
    pub async fn teardown(&self, session_id: &str) {
        if let Err(e) = self.resolver.teardown(session_id).await {
            tracing::warn!(session = %session_id, error = %e, "desktop teardown failed");
        } else {
            tracing::info!(session = %session_id, "desktop session torn down");
        }
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session_id);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::executor::handle::testing::FakeResolver;

    #[tokio::test]
    async fn unreachable_desktop_is_reported_as_unavailable() {
        let sessions = DesktopSessions::new(Arc::new(FakeResolver::unavailable()));
        let err = sessions.acquire("sbx-1").await.err().unwrap();
        assert!(err.is_fatal_for_session());
        assert_eq!(sessions.tracked(), 0);
    }

    #[tokio::test]
    async fn same_session_is_serialized() {
        let sessions = Arc::new(DesktopSessions::new(Arc::new(FakeResolver::new())));
        let lease = sessions.acquire("sbx-1").await.unwrap();

        let contender = {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.acquire("sbx-1").await.map(|l| l.session_id) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        // other sessions are unaffected
        let other = sessions.acquire("sbx-2").await.unwrap();
        assert_eq!(other.session_id, "sbx-2");

        drop(other);
        assert_eq!(sessions.tracked(), 1);

        // the waiter still needs the lock
        drop(lease);
        assert_eq!(contender.await.unwrap().unwrap(), "sbx-1");
        assert_eq!(sessions.tracked(), 0);
    }

    #[tokio::test]
    async fn lock_is_forgotten_once_lease_drops() {
        let sessions = DesktopSessions::new(Arc::new(FakeResolver::new()));
        for i in 0..100 {
            let lease = sessions.acquire(&format!("sbx-{i}")).await.unwrap();
            assert_eq!(sessions.tracked(), 1);
            drop(lease);
        }
        assert_eq!(sessions.tracked(), 0);
    }

    #[tokio::test]
    async fn teardown_reaches_resolver() {
        let resolver = Arc::new(FakeResolver::new());
        let sessions = DesktopSessions::new(resolver.clone());
        sessions.teardown("sbx-9").await;
        assert_eq!(*resolver.teardowns.lock().unwrap(), vec!["sbx-9".to_string()]);
    }
}
