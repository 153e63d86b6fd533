use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

pub const ENV_DATA_DIR: &str = "STUDYHALL_DATA_DIR";
pub const ENV_STORE_URL: &str = "STUDYHALL_STORE_URL";
pub const ENV_USER_ID: &str = "STUDYHALL_USER_ID";
pub const ENV_DISPLAY_NAME: &str = "STUDYHALL_DISPLAY_NAME";
pub const ENV_DEBUG: &str = "STUDYHALL_DEBUG";

// A week. Larger values are clamped so the chrono conversion cannot overflow.
const MAX_STALE_AFTER_SECS: u64 = 7 * 24 * 60 * 60;

/// Cadence and endpoint of the shared presence store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PresenceSettings {
    /// Base URL of the presence store. `None` runs against an in-process store.
    pub store_url: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Peers whose last heartbeat is older than this drop off the roster.
    pub stale_after_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            store_url: None,
            heartbeat_interval_secs: 5,
            poll_interval_secs: 3,
            request_timeout_secs: 5,
            stale_after_secs: 15,
        }
    }
}

impl PresenceSettings {
    // tokio intervals panic on a zero period
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn stale_after(&self) -> chrono::Duration {
        let floor = self.poll_interval_secs.clamp(1, MAX_STALE_AFTER_SECS) + 1;
        let secs = self.stale_after_secs.clamp(floor, MAX_STALE_AFTER_SECS + 1);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProfileSettings {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    presence: PresenceSettings,
    profile: ProfileSettings,
}

impl UserSettings {
    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = non_empty(ENV_STORE_URL) {
            self.presence.store_url = Some(url);
        }
        if let Some(user_id) = non_empty(ENV_USER_ID) {
            self.profile.user_id = Some(user_id);
        }
        if let Some(name) = non_empty(ENV_DISPLAY_NAME) {
            self.profile.display_name = Some(name);
        }
        self
    }
}

/// `settings.json` in the data directory. Values from the environment win over
/// the file but are never written back to it.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring malformed settings at {}: {err}",
                    path.display()
                );
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn presence(&self) -> PresenceSettings {
        self.effective(|key| std::env::var(key).ok()).presence
    }

    pub fn profile(&self) -> ProfileSettings {
        self.effective(|key| std::env::var(key).ok()).profile
    }

    pub fn update_presence(&self, settings: PresenceSettings) -> Result<()> {
        let mut guard = self.write();
        guard.presence = settings;
        self.persist(&guard)
    }

    pub fn update_profile(&self, profile: ProfileSettings) -> Result<()> {
        let mut guard = self.write();
        guard.profile = profile;
        self.persist(&guard)
    }

    fn effective(&self, lookup: impl Fn(&str) -> Option<String>) -> UserSettings {
        self.read().clone().with_overrides(lookup)
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

/// Where the database and settings live: `$STUDYHALL_DATA_DIR`, else the
/// platform data directory, else `./.studyhall`.
pub fn resolve_data_dir() -> PathBuf {
    std::env::var(ENV_DATA_DIR)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::data_dir().map(|dir| dir.join("studyhall")))
        .unwrap_or_else(|| PathBuf::from(".studyhall"))
}

pub fn debug_mode() -> bool {
    std::env::var(ENV_DEBUG)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
