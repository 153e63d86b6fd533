use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Row};

use crate::{
    db::{
        helpers::{to_i64, to_u64},
        Database,
    },
    models::Subject,
};

fn row_to_subject(row: &Row) -> Result<Subject> {
    let total: i64 = row.get("total_accumulated_seconds")?;

    Ok(Subject {
        id: row.get("id")?,
        display_name: row.get("display_name")?,
        total_accumulated_seconds: to_u64(total, "total_accumulated_seconds")?,
    })
}

impl Database {
    /// Insert or update a subject. The stored total never moves backwards, so a
    /// late write from an older snapshot cannot undo accumulated time.
    pub async fn upsert_subject(&self, subject: &Subject) -> Result<()> {
        let record = subject.clone();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO subjects (id, display_name, total_accumulated_seconds, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     display_name = excluded.display_name,
                     total_accumulated_seconds = MAX(subjects.total_accumulated_seconds, excluded.total_accumulated_seconds),
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.display_name,
                    to_i64(record.total_accumulated_seconds)?,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_subjects(&self) -> Result<Vec<Subject>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, display_name, total_accumulated_seconds
                 FROM subjects
                 ORDER BY rowid ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut subjects = Vec::new();
            while let Some(row) = rows.next()? {
                subjects.push(row_to_subject(row)?);
            }

            Ok(subjects)
        })
        .await
    }
}
