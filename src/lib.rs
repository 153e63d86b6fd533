pub mod commands;
pub mod db;
pub mod models;
pub mod presence;
pub mod settings;
pub mod storage;
pub mod timer;
mod utils;

use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use commands::Command;
use db::Database;
use presence::{
    HttpPresenceStore, MemoryPresenceStore, PresenceController, PresenceStore, SessionIdentity,
};
use settings::SettingsStore;
use storage::FocusStorage;
use timer::TimerController;

pub struct AppState {
    pub(crate) timer: TimerController,
    pub(crate) presence: PresenceController,
    pub(crate) identity: Arc<SessionIdentity>,
    pub(crate) settings: SettingsStore,
}

pub async fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("studyhall starting up...");

    let data_dir = settings::resolve_data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;
    let database = Database::new(data_dir.join("studyhall.sqlite3"))?;
    let storage: Arc<dyn FocusStorage> = Arc::new(database);

    // Restored values are inert: a session that was running when the process
    // died comes back paused, and nothing goes online by itself.
    let persisted = storage
        .load_state()
        .await
        .context("Failed to load saved focus state")?;
    if persisted.session.running {
        warn!(
            "Previous run ended while focusing on {:?}; resume to continue",
            persisted.session.active_subject_id
        );
    }
    let timer = TimerController::restored(storage.clone(), &persisted);

    let presence_settings = settings_store.presence();
    let store: Arc<dyn PresenceStore> = match presence_settings.store_url.as_deref() {
        Some(url) => {
            info!("Using presence store at {url}");
            Arc::new(HttpPresenceStore::new(url, presence_settings.request_timeout())?)
        }
        None => {
            info!("No presence store configured; rooms are local to this process");
            Arc::new(MemoryPresenceStore::with_retention(
                presence_settings.stale_after(),
            ))
        }
    };

    let identity = Arc::new(SessionIdentity::from_profile(&settings_store.profile()));
    let presence = PresenceController::new(
        timer.clone(),
        store,
        identity.clone(),
        storage,
        &presence_settings,
    );
    presence.restore_room(persisted.last_room.as_deref()).await;

    let state = AppState {
        timer,
        presence,
        identity,
        settings: settings_store,
    };

    let result = shell(&state).await;

    state.presence.shutdown().await;
    state.timer.shutdown().await;
    if let Err(err) = state.timer.flush().await {
        warn!("Failed to save focus state on exit: {err:#}");
    }
    info!("studyhall stopped");

    result
}

async fn shell(state: &AppState) -> anyhow::Result<()> {
    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                println!("{err} (try `help`)");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        match commands::execute(state, command).await {
            Ok(output) => println!("{output}"),
            Err(err) => println!("error: {err}"),
        }
    }

    Ok(())
}
