use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::Session;

/// Keyed in-memory session store.
///
/// Each subject gets its own async mutex, so events for one subject are
/// handled one at a time while different subjects proceed in parallel. The
/// outer map is sharded and only held long enough to clone the entry.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<i64, Arc<Mutex<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Waits for exclusive access to `subject`'s session, creating a blank one
    /// on first use. Hold the guard for the whole event.
    pub async fn lock(&self, subject: i64) -> OwnedMutexGuard<Session> {
        let cell = self
            .sessions
            .entry(subject)
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(subject))))
            .clone();
        cell.lock_owned().await
    }

    /// Drops the entry for `subject` if it is blank and nobody else holds or
    /// waits on it. Call after releasing the guard.
    pub fn release(&self, subject: i64) {
        self.sessions.remove_if(&subject, |_, cell| {
            Arc::strong_count(cell) == 1
                && cell
                    .try_lock()
                    .map(|session| session.is_blank())
                    .unwrap_or(false)
        });
    }

    /// Snapshot of a subject's session, if one is live.
    pub async fn snapshot(&self, subject: i64) -> Option<Session> {
        let cell = self.sessions.get(&subject).map(|entry| entry.value().clone())?;
        let session = cell.lock().await;
        Some(session.clone())
    }

    /// Subjects with a conversation in progress.
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::Stage;

    #[tokio::test]
    async fn test_lock_creates_blank_session() {
        let store = SessionStore::new();
        let session = store.lock(7).await;
        assert_eq!(session.subject_id, 7);
        assert!(session.is_blank());
    }

    #[tokio::test]
    async fn test_release_keeps_sessions_in_progress() {
        let store = SessionStore::new();
        {
            let mut session = store.lock(7).await;
            session.stage = Stage::AwaitingPhone;
        }
        store.release(7);
        assert_eq!(store.active_count(), 1);
        assert_eq!(store.snapshot(7).await.unwrap().stage, Stage::AwaitingPhone);

        {
            let mut session = store.lock(7).await;
            session.clear();
        }
        store.release(7);
        assert_eq!(store.active_count(), 0);
    }

    #[tokio::test]
    async fn test_same_subject_is_serialized() {
        let store = Arc::new(SessionStore::new());
        let guard = store.lock(1).await;

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let session = store.lock(1).await;
                session.stage.clone()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let mut guard = guard;
        guard.stage = Stage::AwaitingFullName;
        drop(guard);

        assert_eq!(waiter.await.unwrap(), Stage::AwaitingFullName);
    }

    #[tokio::test]
    async fn test_different_subjects_do_not_block() {
        let store = SessionStore::new();
        let _first = store.lock(1).await;
        let second = tokio::time::timeout(Duration::from_millis(100), store.lock(2)).await;
        assert!(second.is_ok());
    }
}
