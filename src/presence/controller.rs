//! Connection state machine for going online.
//!
//! `Disconnected -> Connecting -> Connected`, with every connection attempt
//! tagged by an epoch. The join and all loop work carry the epoch they were
//! started under and drop their results once it no longer matches, so a slow
//! response from a previous room can never overwrite the current one.
//!
//! While connected three tasks run: the periodic heartbeat, the roster poll and
//! a watcher that turns timer transitions into immediate heartbeats.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch, Mutex, MutexGuard,
    },
    task::{AbortHandle, JoinHandle},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    models::PeerRecord,
    settings::PresenceSettings,
    storage::FocusStorage,
    timer::{TimerController, TimerEvent},
};

use super::{
    error::{PresenceError, StoreError},
    identity::{CallerIdentity, IdentityProvider},
    poller::RosterPoller,
    publisher::{HeartbeatAck, HeartbeatPublisher, HeartbeatTrigger},
    room::{self, RoomId},
    store::PresenceStore,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected { peer_id: String },
    AlreadyConnecting,
    AlreadyConnected,
    /// A disconnect or room change happened while the join was in flight.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceStatus {
    pub phase: ConnectionPhase,
    pub room: RoomId,
    pub peer_id: Option<String>,
    pub epoch: u64,
}

struct SessionTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl SessionTasks {
    fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            handle.abort();
        }
    }
}

struct Inner {
    phase: ConnectionPhase,
    epoch: u64,
    room: RoomId,
    peer_id: Option<String>,
    caller: Option<CallerIdentity>,
    pending_join: Option<AbortHandle>,
    rejoining: bool,
    tasks: Option<SessionTasks>,
}

/// What the loops need for one request, read under the lock.
struct SessionTarget {
    peer_id: Option<String>,
    room: RoomId,
    caller: CallerIdentity,
}

#[derive(Clone)]
pub struct PresenceController {
    inner: Arc<Mutex<Inner>>,
    timer: TimerController,
    identity: Arc<dyn IdentityProvider>,
    storage: Arc<dyn FocusStorage>,
    publisher: Arc<HeartbeatPublisher>,
    poller: Arc<RosterPoller>,
    roster: Arc<watch::Sender<Vec<PeerRecord>>>,
    heartbeat_interval: Duration,
    poll_interval: Duration,
}

impl PresenceController {
    pub fn new(
        timer: TimerController,
        store: Arc<dyn PresenceStore>,
        identity: Arc<dyn IdentityProvider>,
        storage: Arc<dyn FocusStorage>,
        settings: &PresenceSettings,
    ) -> Self {
        let (roster, _) = watch::channel(Vec::new());

        Self {
            inner: Arc::new(Mutex::new(Inner {
                phase: ConnectionPhase::Disconnected,
                epoch: 0,
                room: RoomId::global(),
                peer_id: None,
                caller: None,
                pending_join: None,
                rejoining: false,
                tasks: None,
            })),
            timer,
            identity,
            storage,
            publisher: Arc::new(HeartbeatPublisher::new(
                store.clone(),
                settings.request_timeout(),
            )),
            poller: Arc::new(RosterPoller::new(
                store,
                settings.request_timeout(),
                settings.stale_after(),
            )),
            roster: Arc::new(roster),
            heartbeat_interval: settings.heartbeat_interval(),
            poll_interval: settings.poll_interval(),
        }
    }

    /// Seed the room remembered from the previous run. Never connects.
    pub async fn restore_room(&self, last_room: Option<&str>) {
        let mut inner = self.inner.lock().await;
        if inner.phase != ConnectionPhase::Disconnected {
            return;
        }
        inner.room = room::normalize(last_room.unwrap_or_default());
        log_info!("Restored room {}", inner.room);
    }

    pub async fn status(&self) -> PresenceStatus {
        let inner = self.inner.lock().await;
        PresenceStatus {
            phase: inner.phase,
            room: inner.room.clone(),
            peer_id: inner.peer_id.clone(),
            epoch: inner.epoch,
        }
    }

    pub fn roster(&self) -> Vec<PeerRecord> {
        self.roster.borrow().clone()
    }

    pub fn subscribe_roster(&self) -> watch::Receiver<Vec<PeerRecord>> {
        self.roster.subscribe()
    }

    pub async fn connect(&self) -> Result<ConnectOutcome, PresenceError> {
        let caller = self
            .identity
            .current()
            .ok_or(PresenceError::Unauthenticated)?;
        // Transitions after this point reach the watcher even if they land
        // while the join is in flight.
        let events = self.timer.subscribe();
        let snapshot = self.timer.snapshot().await;

        let join = {
            let mut inner = self.inner.lock().await;
            match inner.phase {
                ConnectionPhase::Connecting => return Ok(ConnectOutcome::AlreadyConnecting),
                ConnectionPhase::Connected => return Ok(ConnectOutcome::AlreadyConnected),
                ConnectionPhase::Disconnected => {}
            }

            inner.epoch += 1;
            inner.phase = ConnectionPhase::Connecting;
            inner.peer_id = None;
            inner.caller = Some(caller.clone());
            let epoch = inner.epoch;
            let room = inner.room.clone();
            log_info!("Joining room {room} (epoch {epoch})");

            // The join runs detached so a disconnect can abort it and a dropped
            // caller cannot leave the phase stuck at Connecting.
            let this = self.clone();
            let join = tokio::spawn(async move {
                let result = this
                    .publisher
                    .publish(HeartbeatTrigger::Connect, None, &room, &caller, &snapshot)
                    .await;
                this.finish_join(epoch, room, events, result).await
            });
            inner.pending_join = Some(join.abort_handle());
            join
        };

        match join.await {
            Ok(outcome) => outcome,
            Err(_) => Ok(ConnectOutcome::Superseded),
        }
    }

    async fn finish_join(
        &self,
        epoch: u64,
        room: RoomId,
        events: broadcast::Receiver<TimerEvent>,
        result: Result<HeartbeatAck, StoreError>,
    ) -> Result<ConnectOutcome, PresenceError> {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            log_info!("Discarding join response for superseded epoch {epoch}");
            return Ok(ConnectOutcome::Superseded);
        }
        inner.pending_join = None;

        match result {
            Ok(ack) => {
                inner.phase = ConnectionPhase::Connected;
                inner.peer_id = Some(ack.peer_id.clone());
                inner.tasks = Some(self.start_session(epoch, events));
                drop(inner);

                log_info!("Online in room {room} as peer {}", ack.peer_id);
                self.remember_room(&room).await;
                Ok(ConnectOutcome::Connected {
                    peer_id: ack.peer_id,
                })
            }
            Err(source) => {
                inner.phase = ConnectionPhase::Disconnected;
                inner.caller = None;
                log_warn!("Join of room {room} failed: {source}");
                Err(PresenceError::JoinFailed { room, source })
            }
        }
    }

    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        let was_offline = inner.phase == ConnectionPhase::Disconnected;
        self.reset_connection(&mut inner);
        if !was_offline {
            log_info!("Went offline from room {}", inner.room);
        }
    }

    pub async fn create_room(&self) -> Result<RoomId, PresenceError> {
        let room = room::create_room();
        self.switch_room(room.clone()).await?;
        Ok(room)
    }

    pub async fn join_room(&self, code: &str) -> Result<RoomId, PresenceError> {
        let room = room::normalize(code);
        self.switch_room(room.clone()).await?;
        Ok(room)
    }

    pub async fn leave_room(&self) -> Result<RoomId, PresenceError> {
        let room = RoomId::global();
        self.switch_room(room.clone()).await?;
        Ok(room)
    }

    pub async fn shutdown(&self) {
        self.disconnect().await;
    }

    async fn switch_room(&self, room: RoomId) -> Result<(), PresenceError> {
        let reconnect = {
            let mut inner = self.inner.lock().await;
            if inner.room == room {
                return Ok(());
            }
            let online = inner.phase != ConnectionPhase::Disconnected;
            self.reset_connection(&mut inner);
            inner.room = room.clone();
            online
        };
        log_info!("Room set to {room}");
        self.remember_room(&room).await;

        if reconnect {
            self.connect().await?;
        }
        Ok(())
    }

    /// Back to Disconnected: the peer id goes first so no loop can publish
    /// with it, then the epoch moves on and everything in flight is dropped.
    fn reset_connection(&self, inner: &mut MutexGuard<'_, Inner>) {
        inner.peer_id = None;
        inner.epoch += 1;
        inner.phase = ConnectionPhase::Disconnected;
        inner.caller = None;
        inner.rejoining = false;
        if let Some(join) = inner.pending_join.take() {
            join.abort();
        }
        if let Some(tasks) = inner.tasks.take() {
            tasks.stop();
        }
        self.roster.send_replace(Vec::new());
    }

    async fn remember_room(&self, room: &RoomId) {
        let stored = (!room.is_global()).then(|| room.as_str());
        if let Err(err) = self.storage.save_last_room(stored).await {
            log_warn!("Failed to remember room {room}: {err:#}");
        }
    }

    fn start_session(&self, epoch: u64, events: broadcast::Receiver<TimerEvent>) -> SessionTasks {
        let cancel = CancellationToken::new();

        let handles = vec![
            tokio::spawn(self.clone().heartbeat_loop(epoch, cancel.clone())),
            tokio::spawn(self.clone().poll_loop(epoch, cancel.clone())),
            tokio::spawn(self.clone().watch_transitions(epoch, events, cancel.clone())),
        ];

        SessionTasks { cancel, handles }
    }

    async fn heartbeat_loop(self, epoch: u64, cancel: CancellationToken) {
        let period = self.heartbeat_interval;
        // The join was the first heartbeat.
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.publish_current(epoch, HeartbeatTrigger::PeriodicTick)
                .await;
        }
    }

    async fn poll_loop(self, epoch: u64, cancel: CancellationToken) {
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.poll_once(epoch).await;
        }
    }

    async fn watch_transitions(
        self,
        epoch: u64,
        mut events: broadcast::Receiver<TimerEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(TimerEvent::Transition { transition, .. }) => {
                    log_debug!("Timer {transition:?}, publishing now");
                    self.publish_current(epoch, HeartbeatTrigger::StateChanged)
                        .await;
                }
                Ok(TimerEvent::Tick(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log_warn!("Transition watcher lagged by {skipped} events");
                    self.publish_current(epoch, HeartbeatTrigger::StateChanged)
                        .await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn session_target(&self, epoch: u64) -> Option<SessionTarget> {
        let inner = self.inner.lock().await;
        if inner.epoch != epoch || inner.phase != ConnectionPhase::Connected {
            return None;
        }
        Some(SessionTarget {
            peer_id: inner.peer_id.clone(),
            room: inner.room.clone(),
            caller: inner.caller.clone()?,
        })
    }

    async fn publish_current(&self, epoch: u64, trigger: HeartbeatTrigger) {
        let snapshot = self.timer.snapshot().await;
        let Some(target) = self.session_target(epoch).await else {
            return;
        };
        let Some(peer_id) = target.peer_id else {
            // No id means a rejoin is pending or has failed. Only a periodic
            // tick retries, and only once the previous attempt is over.
            if trigger == HeartbeatTrigger::PeriodicTick {
                self.rejoin(epoch, None).await;
            }
            return;
        };

        match self
            .publisher
            .publish(
                trigger,
                Some(&peer_id),
                &target.room,
                &target.caller,
                &snapshot,
            )
            .await
        {
            Ok(_) => log_debug!("{trigger:?} heartbeat acknowledged for {peer_id}"),
            Err(err) if err.is_unknown_peer() => {
                log_warn!("Store no longer knows peer {peer_id}; joining again");
                self.rejoin(epoch, Some(&peer_id)).await;
            }
            Err(err) => log_warn!("{trigger:?} heartbeat to {} failed: {err}", target.room),
        }
    }

    /// Fresh join within the same epoch after the store dropped our record.
    /// The dead id is cleared before the join goes out, so nothing publishes
    /// with it again. On failure the id stays empty until a later tick retries.
    async fn rejoin(&self, epoch: u64, dead_peer_id: Option<&str>) {
        let (room, caller) = {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch
                || inner.phase != ConnectionPhase::Connected
                || inner.rejoining
                || inner.peer_id.as_deref() != dead_peer_id
            {
                return;
            }
            let Some(caller) = inner.caller.clone() else {
                return;
            };
            inner.peer_id = None;
            inner.rejoining = true;
            (inner.room.clone(), caller)
        };

        let snapshot = self.timer.snapshot().await;
        let result = self
            .publisher
            .publish(HeartbeatTrigger::Connect, None, &room, &caller, &snapshot)
            .await;

        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            return;
        }
        inner.rejoining = false;
        match result {
            Ok(ack) => {
                log_info!("Rejoined room {room} as peer {}", ack.peer_id);
                inner.peer_id = Some(ack.peer_id);
            }
            Err(err) => log_warn!("Rejoin of room {room} failed: {err}"),
        }
    }

    async fn poll_once(&self, epoch: u64) {
        let Some(target) = self.session_target(epoch).await else {
            return;
        };

        match self.poller.poll(&target.room, &target.caller).await {
            Ok(roster) => {
                let inner = self.inner.lock().await;
                if inner.epoch == epoch {
                    log_debug!("Roster for {}: {} peers", target.room, roster.len());
                    self.roster.send_replace(roster);
                }
            }
            Err(err) => log_warn!("Roster poll for {} failed: {err}", target.room),
        }
    }
}
