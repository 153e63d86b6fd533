//! Scriptable presence store for controller and loop tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::{
    error::StoreError,
    identity::CallerIdentity,
    room::RoomId,
    store::{HeartbeatMessage, JoinResponse, PresenceStore, RawPeerRecord},
};

pub(crate) fn raw_peer(
    peer_id: &str,
    owner_user_id: &str,
    display_name: &str,
    last_seen_at: DateTime<Utc>,
) -> RawPeerRecord {
    RawPeerRecord {
        peer_id: Some(peer_id.into()),
        owner_user_id: Some(owner_user_id.into()),
        display_name: Some(display_name.into()),
        status: Some("focusing".into()),
        subject_label: Some("Physics".into()),
        elapsed_seconds: Some(10.0),
        last_seen_at: Some(last_seen_at.to_rfc3339()),
    }
}

#[derive(Default)]
struct Script {
    peer_ids: VecDeque<String>,
    issued: usize,
    join_failure: Option<u16>,
    heartbeat_failures: VecDeque<u16>,
    hang_joins: bool,
    join_gate: Option<Arc<Notify>>,
    hang_heartbeats: bool,
    hang_lists: bool,
    peers: HashMap<RoomId, Vec<RawPeerRecord>>,
    joins: Vec<HeartbeatMessage>,
    heartbeats: Vec<HeartbeatMessage>,
    list_calls: Vec<RoomId>,
}

#[derive(Default)]
pub(crate) struct ScriptedStore {
    script: Mutex<Script>,
}

impl ScriptedStore {
    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("lock scripted store")
    }

    /// Peer ids handed out by the next joins, in order. Once drained, ids are
    /// generated as `peer-N`.
    pub(crate) fn queue_peer_ids<const N: usize>(&self, ids: [&str; N]) {
        self.script()
            .peer_ids
            .extend(ids.iter().map(|id| id.to_string()));
    }

    pub(crate) fn fail_joins(&self, status: Option<u16>) {
        self.script().join_failure = status;
    }

    pub(crate) fn fail_next_heartbeat(&self, status: u16) {
        self.script().heartbeat_failures.push_back(status);
    }

    pub(crate) fn hang_joins(&self, hang: bool) {
        self.script().hang_joins = hang;
    }

    /// From now on every join waits for one `notify_one` on the returned gate.
    pub(crate) fn gate_joins(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.script().join_gate = Some(gate.clone());
        gate
    }

    pub(crate) fn hang_heartbeats(&self, hang: bool) {
        self.script().hang_heartbeats = hang;
    }

    pub(crate) fn hang_lists(&self, hang: bool) {
        self.script().hang_lists = hang;
    }

    pub(crate) fn set_peers(&self, room: &RoomId, peers: Vec<RawPeerRecord>) {
        self.script().peers.insert(room.clone(), peers);
    }

    pub(crate) fn joins(&self) -> Vec<HeartbeatMessage> {
        self.script().joins.clone()
    }

    pub(crate) fn heartbeats(&self) -> Vec<HeartbeatMessage> {
        self.script().heartbeats.clone()
    }

    pub(crate) fn list_calls(&self) -> Vec<RoomId> {
        self.script().list_calls.clone()
    }
}

#[async_trait]
impl PresenceStore for ScriptedStore {
    async fn join(
        &self,
        _caller: &CallerIdentity,
        message: &HeartbeatMessage,
    ) -> Result<JoinResponse, StoreError> {
        let (hang, gate) = {
            let mut script = self.script();
            script.joins.push(message.clone());
            (script.hang_joins, script.join_gate.clone())
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut script = self.script();
        if let Some(status) = script.join_failure {
            return Err(StoreError::Status(status));
        }
        script.issued += 1;
        let issued = script.issued;
        let peer_id = script
            .peer_ids
            .pop_front()
            .unwrap_or_else(|| format!("peer-{issued}"));
        Ok(JoinResponse { peer_id })
    }

    async fn heartbeat(
        &self,
        _caller: &CallerIdentity,
        message: &HeartbeatMessage,
    ) -> Result<(), StoreError> {
        let (hang, failure) = {
            let mut script = self.script();
            script.heartbeats.push(message.clone());
            (script.hang_heartbeats, script.heartbeat_failures.pop_front())
        };
        if hang {
            std::future::pending::<()>().await;
        }
        match failure {
            Some(status) => Err(StoreError::Status(status)),
            None => Ok(()),
        }
    }

    async fn list_peers(
        &self,
        _caller: &CallerIdentity,
        room: &RoomId,
    ) -> Result<Vec<RawPeerRecord>, StoreError> {
        let (hang, peers) = {
            let mut script = self.script();
            script.list_calls.push(room.clone());
            (
                script.hang_lists,
                script.peers.get(room).cloned().unwrap_or_default(),
            )
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(peers)
    }
}
