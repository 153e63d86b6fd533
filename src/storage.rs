use anyhow::Result;
use async_trait::async_trait;

use crate::models::{FocusSession, Subject};

/// Everything that survives a restart. Loaded once at startup and handed to
/// the timer and presence controllers as inert seed values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    pub session: FocusSession,
    pub subjects: Vec<Subject>,
    pub last_room: Option<String>,
}

/// Storage collaborator injected into the controllers: load at start, save on
/// change. The SQLite `Database` is the production implementation.
#[async_trait]
pub trait FocusStorage: Send + Sync {
    async fn load_state(&self) -> Result<PersistedState>;

    async fn save_session(&self, session: &FocusSession) -> Result<()>;

    async fn save_subject(&self, subject: &Subject) -> Result<()>;

    async fn save_last_room(&self, room_id: Option<&str>) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod memory {
    use std::sync::Mutex;

    use super::*;

    /// In-memory storage for controller tests; no worker thread, so it plays
    /// nicely with a paused tokio clock.
    #[derive(Default)]
    pub(crate) struct MemoryStorage {
        pub(crate) state: Mutex<PersistedState>,
    }

    impl MemoryStorage {
        pub(crate) fn snapshot(&self) -> PersistedState {
            self.state.lock().expect("lock memory storage").clone()
        }
    }

    #[async_trait]
    impl FocusStorage for MemoryStorage {
        async fn load_state(&self) -> Result<PersistedState> {
            Ok(self.snapshot())
        }

        async fn save_session(&self, session: &FocusSession) -> Result<()> {
            self.state.lock().expect("lock memory storage").session = session.clone();
            Ok(())
        }

        async fn save_subject(&self, subject: &Subject) -> Result<()> {
            let mut state = self.state.lock().expect("lock memory storage");
            match state.subjects.iter_mut().find(|s| s.id == subject.id) {
                Some(existing) => *existing = subject.clone(),
                None => state.subjects.push(subject.clone()),
            }
            Ok(())
        }

        async fn save_last_room(&self, room_id: Option<&str>) -> Result<()> {
            self.state.lock().expect("lock memory storage").last_room =
                room_id.map(str::to_string);
            Ok(())
        }
    }
}
