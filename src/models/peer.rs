use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PeerStatus {
    Focusing,
    #[default]
    Idle,
    Break,
}

impl PeerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerStatus::Focusing => "focusing",
            PeerStatus::Idle => "idle",
            PeerStatus::Break => "break",
        }
    }

    /// Lenient parse for remote data; anything unrecognised reads as idle.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "focusing" | "focus" | "studying" => PeerStatus::Focusing,
            "break" | "paused" => PeerStatus::Break,
            _ => PeerStatus::Idle,
        }
    }
}

/// A peer as shown to the presentation layer, already normalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub peer_id: String,
    pub owner_user_id: String,
    pub display_name: String,
    pub status: PeerStatus,
    pub subject_label: String,
    pub elapsed_seconds: u64,
    pub last_seen_at: Option<DateTime<Utc>>,
}
