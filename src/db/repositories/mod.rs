mod focus_session;
mod subjects;

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    db::Database,
    models::{FocusSession, Subject},
    storage::{FocusStorage, PersistedState},
};

#[async_trait]
impl FocusStorage for Database {
    async fn load_state(&self) -> Result<PersistedState> {
        let session = self.get_focus_session().await?.unwrap_or_default();
        let subjects = self.list_subjects().await?;
        let last_room = self.get_last_room_id().await?;

        Ok(PersistedState {
            session,
            subjects,
            last_room,
        })
    }

    async fn save_session(&self, session: &FocusSession) -> Result<()> {
        self.save_focus_session(session).await
    }

    async fn save_subject(&self, subject: &Subject) -> Result<()> {
        self.upsert_subject(subject).await
    }

    async fn save_last_room(&self, room_id: Option<&str>) -> Result<()> {
        self.save_last_room_id(room_id.map(str::to_string)).await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("studyhall.sqlite3");

        {
            let db = Database::new(path.clone()).expect("open db");
            let mut physics = Subject::new("PHYSICS", "Physics");
            physics.total_accumulated_seconds = 65;
            db.save_subject(&physics).await.expect("save subject");
            db.save_subject(&Subject::new("CHEM", "Chemistry"))
                .await
                .expect("save subject");
            db.save_session(&FocusSession {
                active_subject_id: Some("PHYSICS".into()),
                elapsed_seconds: 65,
                running: true,
            })
            .await
            .expect("save session");
            db.save_last_room(Some("AB12CD")).await.expect("save room");
        }

        let db = Database::new(path).expect("reopen db");
        let state = db.load_state().await.expect("load state");

        assert_eq!(state.session.elapsed_seconds, 65);
        assert_eq!(state.session.active_subject_id.as_deref(), Some("PHYSICS"));
        assert_eq!(state.subjects.len(), 2);
        assert_eq!(state.subjects[0].id, "PHYSICS");
        assert_eq!(state.subjects[0].total_accumulated_seconds, 65);
        assert_eq!(state.last_room.as_deref(), Some("AB12CD"));
    }

    #[tokio::test]
    async fn subject_total_never_moves_backwards() {
        let dir = tempdir().expect("tempdir");
        let db = Database::new(dir.path().join("db.sqlite3")).expect("open db");

        let mut subject = Subject::new("MATH", "Math");
        subject.total_accumulated_seconds = 120;
        db.save_subject(&subject).await.expect("save");

        subject.total_accumulated_seconds = 30;
        subject.display_name = "Mathematics".into();
        db.save_subject(&subject).await.expect("save stale");

        let subjects = db.list_subjects().await.expect("list");
        assert_eq!(subjects[0].total_accumulated_seconds, 120);
        assert_eq!(subjects[0].display_name, "Mathematics");
    }

    #[tokio::test]
    async fn empty_database_loads_defaults() {
        let dir = tempdir().expect("tempdir");
        let db = Database::new(dir.path().join("fresh.sqlite3")).expect("open db");

        let state = db.load_state().await.expect("load");
        assert_eq!(state, PersistedState::default());

        db.save_last_room(Some("GLOBAL")).await.expect("save room");
        db.save_last_room(None).await.expect("clear room");
        assert_eq!(db.get_last_room_id().await.expect("room"), None);
    }
}
