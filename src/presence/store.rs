//! The shared presence store: the only thing clients talk to.
//!
//! Three operations, all plain request/response: join a room (the store hands
//! back a peer id), refresh our record with a heartbeat, and list the peers of
//! a room. `HttpPresenceStore` speaks JSON over HTTP; `MemoryPresenceStore`
//! keeps everything in-process for offline runs.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::models::PeerStatus;

use super::{error::StoreError, identity::CallerIdentity, room::RoomId};

const ENABLE_LOGS: bool = true;

const DEFAULT_RETENTION_SECS: i64 = 15;

use crate::log_warn;

/// What we publish about ourselves. `peer_id` is absent on the join.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    pub room_id: RoomId,
    pub display_name: String,
    pub status: PeerStatus,
    pub subject_label: String,
    pub elapsed_seconds: u64,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub peer_id: String,
}

/// A peer exactly as the store sent it. Every field may be missing; the roster
/// poller turns this into a `PeerRecord`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPeerRecord {
    pub peer_id: Option<String>,
    pub owner_user_id: Option<String>,
    pub display_name: Option<String>,
    pub status: Option<String>,
    pub subject_label: Option<String>,
    pub elapsed_seconds: Option<f64>,
    pub last_seen_at: Option<String>,
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn join(
        &self,
        caller: &CallerIdentity,
        message: &HeartbeatMessage,
    ) -> Result<JoinResponse, StoreError>;

    async fn heartbeat(
        &self,
        caller: &CallerIdentity,
        message: &HeartbeatMessage,
    ) -> Result<(), StoreError>;

    async fn list_peers(
        &self,
        caller: &CallerIdentity,
        room: &RoomId,
    ) -> Result<Vec<RawPeerRecord>, StoreError>;
}

pub struct HttpPresenceStore {
    client: Client,
    base_url: Url,
}

impl HttpPresenceStore {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|err| StoreError::Malformed(format!("store url {base_url:?}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Malformed(format!(
                "store url {base_url} cannot carry a path"
            )));
        }
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, base_url })
    }

    // Room codes and peer ids are user or server supplied; each one goes in
    // as a single escaped path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn peers_url(&self, room: &RoomId) -> Url {
        self.endpoint(&["rooms", room.as_str(), "peers"])
    }

    fn peer_url(&self, room: &RoomId, peer_id: &str) -> Url {
        self.endpoint(&["rooms", room.as_str(), "peers", peer_id])
    }

    async fn send(
        &self,
        request: RequestBuilder,
        caller: &CallerIdentity,
    ) -> Result<Response, StoreError> {
        let request = match caller.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

/// Decode a response body. A body that arrived but does not parse is the
/// store's fault, not the transport's.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(body).map_err(|err| StoreError::Malformed(err.to_string()))
}

#[async_trait]
impl PresenceStore for HttpPresenceStore {
    async fn join(
        &self,
        caller: &CallerIdentity,
        message: &HeartbeatMessage,
    ) -> Result<JoinResponse, StoreError> {
        let request = self.client.post(self.peers_url(&message.room_id)).json(message);
        let body = self.send(request, caller).await?.bytes().await?;
        let response: JoinResponse = parse_body(&body)?;
        if response.peer_id.trim().is_empty() {
            return Err(StoreError::Malformed("join response carried an empty peerId".into()));
        }
        Ok(response)
    }

    async fn heartbeat(
        &self,
        caller: &CallerIdentity,
        message: &HeartbeatMessage,
    ) -> Result<(), StoreError> {
        let peer_id = message
            .peer_id
            .as_deref()
            .ok_or_else(|| StoreError::Malformed("heartbeat without a peerId".into()))?;
        let request = self
            .client
            .put(self.peer_url(&message.room_id, peer_id))
            .json(message);
        self.send(request, caller).await?;
        Ok(())
    }

    async fn list_peers(
        &self,
        caller: &CallerIdentity,
        room: &RoomId,
    ) -> Result<Vec<RawPeerRecord>, StoreError> {
        let request = self.client.get(self.peers_url(room));
        let body = self.send(request, caller).await?.bytes().await?;
        let values: Vec<serde_json::Value> = parse_body(&body)?;
        Ok(decode_peer_list(values))
    }
}

/// Decode records one by one so a single bad entry does not sink the roster.
pub fn decode_peer_list(values: Vec<serde_json::Value>) -> Vec<RawPeerRecord> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawPeerRecord>(value) {
            Ok(record) => Some(record),
            Err(err) => {
                log_warn!("dropping malformed peer record: {err}");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
struct StoredPeer {
    room_id: RoomId,
    owner_user_id: String,
    display_name: String,
    status: PeerStatus,
    subject_label: String,
    elapsed_seconds: u64,
    last_seen_at: DateTime<Utc>,
}

impl StoredPeer {
    fn apply(&mut self, caller: &CallerIdentity, message: &HeartbeatMessage) {
        self.room_id = message.room_id.clone();
        self.owner_user_id = caller.user_id.clone();
        self.display_name = message.display_name.clone();
        self.status = message.status;
        self.subject_label = message.subject_label.clone();
        self.elapsed_seconds = message.elapsed_seconds;
        self.last_seen_at = Utc::now();
    }
}

/// Process-local store. Used when no store URL is configured, so a single
/// client can still go through the whole online flow. Records that have not
/// been refreshed within `retention` are evicted on every join and list.
#[derive(Debug)]
pub struct MemoryPresenceStore {
    peers: Mutex<HashMap<String, StoredPeer>>,
    retention: chrono::Duration,
}

impl Default for MemoryPresenceStore {
    fn default() -> Self {
        Self::with_retention(chrono::Duration::seconds(DEFAULT_RETENTION_SECS))
    }
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: chrono::Duration) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            retention,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers().len()
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<String, StoredPeer>> {
        self.peers.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn evict_stale(&self, peers: &mut HashMap<String, StoredPeer>) {
        let now = Utc::now();
        peers.retain(|_, peer| now.signed_duration_since(peer.last_seen_at) <= self.retention);
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn join(
        &self,
        caller: &CallerIdentity,
        message: &HeartbeatMessage,
    ) -> Result<JoinResponse, StoreError> {
        let peer_id = Uuid::new_v4().to_string();
        let mut peer = StoredPeer {
            room_id: message.room_id.clone(),
            owner_user_id: String::new(),
            display_name: String::new(),
            status: PeerStatus::Idle,
            subject_label: String::new(),
            elapsed_seconds: 0,
            last_seen_at: Utc::now(),
        };
        peer.apply(caller, message);

        let mut peers = self.peers();
        self.evict_stale(&mut peers);
        peers.insert(peer_id.clone(), peer);
        Ok(JoinResponse { peer_id })
    }

    async fn heartbeat(
        &self,
        caller: &CallerIdentity,
        message: &HeartbeatMessage,
    ) -> Result<(), StoreError> {
        let peer_id = message
            .peer_id
            .as_deref()
            .ok_or_else(|| StoreError::Malformed("heartbeat without a peerId".into()))?;
        let mut peers = self.peers();
        let peer = peers.get_mut(peer_id).ok_or(StoreError::Status(404))?;
        peer.apply(caller, message);
        Ok(())
    }

    async fn list_peers(
        &self,
        _caller: &CallerIdentity,
        room: &RoomId,
    ) -> Result<Vec<RawPeerRecord>, StoreError> {
        let mut peers = self.peers();
        self.evict_stale(&mut peers);
        Ok(peers
            .iter()
            .filter(|(_, peer)| &peer.room_id == room)
            .map(|(peer_id, peer)| RawPeerRecord {
                peer_id: Some(peer_id.clone()),
                owner_user_id: Some(peer.owner_user_id.clone()),
                display_name: Some(peer.display_name.clone()),
                status: Some(peer.status.as_str().to_string()),
                subject_label: Some(peer.subject_label.clone()),
                elapsed_seconds: Some(peer.elapsed_seconds as f64),
                last_seen_at: Some(peer.last_seen_at.to_rfc3339()),
            })
            .collect())
    }
}
