use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::{
    db::{
        helpers::{to_i64, to_u64},
        Database,
    },
    models::FocusSession,
};

impl Database {
    pub async fn save_focus_session(&self, session: &FocusSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO focus_session (id, active_subject_id, elapsed_seconds, running, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     active_subject_id = excluded.active_subject_id,
                     elapsed_seconds = excluded.elapsed_seconds,
                     running = excluded.running,
                     updated_at = excluded.updated_at",
                params![
                    record.active_subject_id,
                    to_i64(record.elapsed_seconds)?,
                    record.running,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_focus_session(&self) -> Result<Option<FocusSession>> {
        self.execute(|conn| {
            let row = conn
                .query_row(
                    "SELECT active_subject_id, elapsed_seconds, running
                     FROM focus_session
                     WHERE id = 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, bool>(2)?,
                        ))
                    },
                )
                .optional()?;

            match row {
                Some((active_subject_id, elapsed, running)) => Ok(Some(FocusSession {
                    active_subject_id,
                    elapsed_seconds: to_u64(elapsed, "elapsed_seconds")?,
                    running,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn save_last_room_id(&self, room_id: Option<String>) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO presence_state (id, last_room_id, updated_at)
                 VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET
                     last_room_id = excluded.last_room_id,
                     updated_at = excluded.updated_at",
                params![room_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_last_room_id(&self) -> Result<Option<String>> {
        self.execute(|conn| {
            let room: Option<Option<String>> = conn
                .query_row(
                    "SELECT last_room_id FROM presence_state WHERE id = 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(room.flatten())
        })
        .await
    }
}
