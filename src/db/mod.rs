use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

mod helpers;
mod migrations;
mod repositories;

use migrations::run_migrations;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

struct Worker {
    jobs: mpsc::Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let mut thread = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(handle) = thread.take() {
            if let Err(err) = self.jobs.send(Message::Stop) {
                error!("Failed to stop DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

/// SQLite handle for subjects, the focus session and the last room. Every
/// statement runs on one dedicated thread; `execute` hops onto it and awaits
/// the reply.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Message>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let thread_path = db_path.clone();

        let thread = thread::Builder::new()
            .name("studyhall-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&thread_path) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if ready_tx.send(Ok(())).is_err() {
                    error!("DB opener went away before the ready signal");
                    return;
                }

                while let Ok(message) = jobs_rx.recv() {
                    match message {
                        Message::Run(job) => job(&mut conn),
                        Message::Stop => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .context("failed to spawn database thread")?;

        ready_rx
            .recv()
            .context("database thread exited before signaling readiness")??;

        info!("Database ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: Job = Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                error!("DB caller dropped before receiving result");
            }
        });

        self.worker
            .jobs
            .send(Message::Run(job))
            .map_err(|err| anyhow!("failed to send job to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path).context("failed to open SQLite database")?;

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Failed to enable WAL mode: {err}");
    }

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_runs_on_the_worker_thread() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(dir.path().join("worker.sqlite3")).expect("open db");

        let name = db
            .execute(|_conn| Ok(thread::current().name().map(str::to_string)))
            .await
            .expect("execute");
        assert_eq!(name.as_deref(), Some("studyhall-db"));

        let err = db
            .execute::<_, ()>(|_conn| Err(anyhow!("boom")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
