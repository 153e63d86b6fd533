use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::models::{PeerRecord, PeerStatus};

use super::{
    error::{with_timeout, StoreError},
    identity::CallerIdentity,
    room::RoomId,
    store::{PresenceStore, RawPeerRecord},
};

pub struct RosterPoller {
    store: Arc<dyn PresenceStore>,
    request_timeout: Duration,
    stale_after: chrono::Duration,
}

impl RosterPoller {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        request_timeout: Duration,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            store,
            request_timeout,
            stale_after,
        }
    }

    /// One fetch of the room's roster, without the caller and without stale
    /// peers. On error the caller keeps whatever roster it already shows.
    pub async fn poll(
        &self,
        room: &RoomId,
        caller: &CallerIdentity,
    ) -> Result<Vec<PeerRecord>, StoreError> {
        let raw = with_timeout(self.request_timeout, self.store.list_peers(caller, room)).await?;
        Ok(materialize_roster(
            raw,
            &caller.user_id,
            Utc::now(),
            self.stale_after,
        ))
    }
}

pub fn materialize_roster(
    raw: Vec<RawPeerRecord>,
    self_user_id: &str,
    now: DateTime<Utc>,
    stale_after: chrono::Duration,
) -> Vec<PeerRecord> {
    // A user who rejoined leaves the old record behind until it goes stale;
    // keep only the freshest record per owner.
    let mut by_owner: HashMap<String, PeerRecord> = HashMap::new();
    let mut anonymous = Vec::new();

    for peer in raw.into_iter().map(normalize_peer) {
        if peer.owner_user_id == self_user_id {
            continue;
        }
        if let Some(seen) = peer.last_seen_at {
            if now.signed_duration_since(seen) > stale_after {
                continue;
            }
        }
        if peer.owner_user_id.is_empty() {
            anonymous.push(peer);
            continue;
        }
        match by_owner.get(&peer.owner_user_id) {
            Some(existing) if existing.last_seen_at >= peer.last_seen_at => {}
            _ => {
                by_owner.insert(peer.owner_user_id.clone(), peer);
            }
        }
    }

    let mut roster: Vec<PeerRecord> = by_owner.into_values().chain(anonymous).collect();
    roster.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then_with(|| a.peer_id.cmp(&b.peer_id))
    });
    roster
}

/// Defensive mapping of one remote record. Never fails.
pub fn normalize_peer(raw: RawPeerRecord) -> PeerRecord {
    let peer_id = non_blank(raw.peer_id).unwrap_or_default();
    let owner_user_id = non_blank(raw.owner_user_id).unwrap_or_default();
    let display_name = non_blank(raw.display_name)
        .unwrap_or_else(|| fallback_initial(&[owner_user_id.as_str(), peer_id.as_str()]));

    PeerRecord {
        peer_id: if peer_id.is_empty() {
            owner_user_id.clone()
        } else {
            peer_id
        },
        owner_user_id,
        display_name,
        status: raw
            .status
            .as_deref()
            .map(PeerStatus::parse_lenient)
            .unwrap_or_default(),
        subject_label: raw.subject_label.unwrap_or_default().trim().to_string(),
        elapsed_seconds: raw
            .elapsed_seconds
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(|secs| secs.round() as u64)
            .unwrap_or(0),
        last_seen_at: raw.last_seen_at.as_deref().and_then(parse_timestamp),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn fallback_initial(fragments: &[&str]) -> String {
    fragments
        .iter()
        .flat_map(|fragment| fragment.chars())
        .find(|c| c.is_alphanumeric())
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "?".to_string())
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::testing::{raw_peer, ScriptedStore};

    fn stale_after() -> chrono::Duration {
        chrono::Duration::seconds(15)
    }

    #[test]
    fn own_records_never_reach_the_roster() {
        let now = Utc::now();
        let raw = vec![
            raw_peer("p-self", "u-me", "Me", now),
            raw_peer("p-old-self", "u-me", "Me", now - chrono::Duration::seconds(3)),
            raw_peer("p-a", "u-a", "Ada", now),
        ];

        let roster = materialize_roster(raw, "u-me", now, stale_after());
        assert_eq!(roster.len(), 1);
        assert!(roster.iter().all(|peer| peer.owner_user_id != "u-me"));
    }

    #[test]
    fn stale_records_are_dropped_and_undated_ones_kept() {
        let now = Utc::now();
        let mut undated = raw_peer("p-c", "u-c", "Cy", now);
        undated.last_seen_at = None;
        let raw = vec![
            raw_peer("p-a", "u-a", "Ada", now - chrono::Duration::seconds(14)),
            raw_peer("p-b", "u-b", "Bob", now - chrono::Duration::seconds(16)),
            undated,
        ];

        let roster = materialize_roster(raw, "u-me", now, stale_after());
        let names: Vec<_> = roster.iter().map(|p| p.display_name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Cy"]);
    }

    #[test]
    fn newest_record_wins_per_owner() {
        let now = Utc::now();
        let raw = vec![
            raw_peer("p-old", "u-a", "Ada", now - chrono::Duration::seconds(10)),
            raw_peer("p-new", "u-a", "Ada", now - chrono::Duration::seconds(1)),
        ];

        let roster = materialize_roster(raw, "u-me", now, stale_after());
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].peer_id, "p-new");
    }

    #[test]
    fn blank_fields_get_defensive_defaults() {
        let peer = normalize_peer(RawPeerRecord {
            peer_id: Some("p9".into()),
            owner_user_id: Some("  zoe-22".into()),
            display_name: Some("   ".into()),
            status: Some("SOMETHING_NEW".into()),
            subject_label: None,
            elapsed_seconds: Some(-4.0),
            last_seen_at: Some("yesterday-ish".into()),
        });

        assert_eq!(peer.display_name, "Z");
        assert_eq!(peer.owner_user_id, "zoe-22");
        assert_eq!(peer.status, PeerStatus::Idle);
        assert_eq!(peer.subject_label, "");
        assert_eq!(peer.elapsed_seconds, 0);
        assert_eq!(peer.last_seen_at, None);

        let empty = normalize_peer(RawPeerRecord::default());
        assert_eq!(empty.display_name, "?");
        assert_eq!(empty.peer_id, "");
    }

    #[test]
    fn roster_is_sorted_by_display_name() {
        let now = Utc::now();
        let raw = vec![
            raw_peer("p1", "u1", "zed", now),
            raw_peer("p2", "u2", "Amy", now),
            raw_peer("p3", "u3", "bea", now),
        ];
        let roster = materialize_roster(raw, "u-me", now, stale_after());
        let names: Vec<_> = roster.iter().map(|p| p.display_name.as_str()).collect();
        assert_eq!(names, vec!["Amy", "bea", "zed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_times_out_instead_of_hanging() {
        let store = Arc::new(ScriptedStore::default());
        store.hang_lists(true);
        let poller = RosterPoller::new(store.clone(), Duration::from_secs(5), stale_after());

        let err = poller
            .poll(&RoomId::global(), &CallerIdentity::new("u-me", "Me"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
        assert_eq!(store.list_calls().len(), 1);
    }
}
