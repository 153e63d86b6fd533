use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{models::PeerStatus, timer::FocusSnapshot, timer::TimerStatus};

use super::{
    error::{with_timeout, StoreError},
    identity::CallerIdentity,
    room::RoomId,
    store::{HeartbeatMessage, PresenceStore},
};

/// Why a heartbeat goes out. Elapsed time alone is never a reason; it only
/// rides along on the periodic tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTrigger {
    Connect,
    PeriodicTick,
    StateChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatAck {
    pub peer_id: String,
    /// True when this publish was the join that assigned `peer_id`.
    pub joined: bool,
}

pub fn presence_status(snapshot: &FocusSnapshot) -> PeerStatus {
    match (snapshot.status, snapshot.active_subject_id.is_some()) {
        (TimerStatus::Running, _) => PeerStatus::Focusing,
        (TimerStatus::Idle, true) => PeerStatus::Break,
        (TimerStatus::Idle, false) => PeerStatus::Idle,
    }
}

pub fn build_message(
    peer_id: Option<&str>,
    room: &RoomId,
    caller: &CallerIdentity,
    snapshot: &FocusSnapshot,
) -> HeartbeatMessage {
    HeartbeatMessage {
        peer_id: peer_id.map(str::to_string),
        room_id: room.clone(),
        display_name: caller.display_name.clone(),
        status: presence_status(snapshot),
        subject_label: snapshot.subject_label.clone().unwrap_or_default(),
        elapsed_seconds: snapshot.elapsed_seconds,
        sent_at: Utc::now(),
    }
}

pub struct HeartbeatPublisher {
    store: Arc<dyn PresenceStore>,
    request_timeout: Duration,
}

impl HeartbeatPublisher {
    pub fn new(store: Arc<dyn PresenceStore>, request_timeout: Duration) -> Self {
        Self {
            store,
            request_timeout,
        }
    }

    /// Push the local state. Without a peer id this is the join, and the ack
    /// carries the id the store assigned; the caller caches it.
    pub async fn publish(
        &self,
        trigger: HeartbeatTrigger,
        peer_id: Option<&str>,
        room: &RoomId,
        caller: &CallerIdentity,
        snapshot: &FocusSnapshot,
    ) -> Result<HeartbeatAck, StoreError> {
        let message = build_message(peer_id, room, caller, snapshot);
        log::debug!(
            "publishing {:?} heartbeat to {}: {} {}s",
            trigger,
            room,
            message.status.as_str(),
            message.elapsed_seconds
        );

        match peer_id {
            None => {
                let response =
                    with_timeout(self.request_timeout, self.store.join(caller, &message)).await?;
                Ok(HeartbeatAck {
                    peer_id: response.peer_id,
                    joined: true,
                })
            }
            Some(peer_id) => {
                with_timeout(self.request_timeout, self.store.heartbeat(caller, &message)).await?;
                Ok(HeartbeatAck {
                    peer_id: peer_id.to_string(),
                    joined: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::testing::ScriptedStore;

    fn focusing() -> FocusSnapshot {
        FocusSnapshot {
            status: TimerStatus::Running,
            active_subject_id: Some("PHYSICS".into()),
            subject_label: Some("Physics".into()),
            elapsed_seconds: 42,
            subject_total_seconds: 600,
        }
    }

    #[test]
    fn status_follows_timer() {
        assert_eq!(presence_status(&focusing()), PeerStatus::Focusing);

        let paused = FocusSnapshot {
            status: TimerStatus::Idle,
            ..focusing()
        };
        assert_eq!(presence_status(&paused), PeerStatus::Break);
        assert_eq!(presence_status(&FocusSnapshot::default()), PeerStatus::Idle);
    }

    #[tokio::test]
    async fn first_publish_joins_and_later_ones_heartbeat() {
        let store = Arc::new(ScriptedStore::default());
        store.queue_peer_ids(["p1"]);
        let publisher = HeartbeatPublisher::new(store.clone(), Duration::from_secs(5));
        let caller = CallerIdentity::new("u-me", "Me");
        let room = RoomId::global();

        let ack = publisher
            .publish(HeartbeatTrigger::Connect, None, &room, &caller, &focusing())
            .await
            .unwrap();
        assert_eq!(
            ack,
            HeartbeatAck {
                peer_id: "p1".into(),
                joined: true
            }
        );

        let ack = publisher
            .publish(
                HeartbeatTrigger::PeriodicTick,
                Some("p1"),
                &room,
                &caller,
                &focusing(),
            )
            .await
            .unwrap();
        assert!(!ack.joined);

        let joins = store.joins();
        let beats = store.heartbeats();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].peer_id, None);
        assert_eq!(joins[0].subject_label, "Physics");
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].peer_id.as_deref(), Some("p1"));
        assert_eq!(beats[0].elapsed_seconds, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_request_times_out() {
        let store = Arc::new(ScriptedStore::default());
        store.hang_heartbeats(true);
        let publisher = HeartbeatPublisher::new(store, Duration::from_secs(5));

        let err = publisher
            .publish(
                HeartbeatTrigger::StateChanged,
                Some("p1"),
                &RoomId::global(),
                &CallerIdentity::new("u-me", "Me"),
                &focusing(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout(limit) if limit == Duration::from_secs(5)));
    }
}
