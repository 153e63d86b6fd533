use std::{sync::Arc, time::Duration};

use anyhow::Result;
use log::{error, info};
use tokio::{
    sync::{broadcast, Mutex, MutexGuard},
    task::JoinHandle,
    time::{self, Instant},
};

use crate::{
    models::Subject,
    storage::{FocusStorage, PersistedState},
};

use super::{FocusSnapshot, TimerState, TimerTransition};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Transition {
        transition: TimerTransition,
        snapshot: FocusSnapshot,
    },
    Tick(FocusSnapshot),
}

/// The local timer authority. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct TimerController {
    state: Arc<Mutex<TimerState>>,
    storage: Arc<dyn FocusStorage>,
    events: broadcast::Sender<TimerEvent>,
    // Also serializes user actions so ticker restarts happen in action order.
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
    persist_every_ticks: u32,
}

impl TimerController {
    pub fn new(storage: Arc<dyn FocusStorage>) -> Self {
        Self::with_state(storage, TimerState::new())
    }

    /// Build from what was on disk. Nothing starts ticking until the user acts.
    pub fn restored(storage: Arc<dyn FocusStorage>, persisted: &PersistedState) -> Self {
        let state = TimerState::restore(persisted.session.clone(), persisted.subjects.clone());
        if persisted.session.running {
            info!(
                "Restored session for {:?} at {}s; timer stays paused until resumed",
                state.session().active_subject_id,
                state.session().elapsed_seconds
            );
        }
        Self::with_state(storage, state)
    }

    fn with_state(storage: Arc<dyn FocusStorage>, state: TimerState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            state: Arc::new(Mutex::new(state)),
            storage,
            events,
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: Duration::from_secs(1),
            persist_every_ticks: if crate::settings::debug_mode() { 1 } else { 10 },
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> FocusSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn subjects(&self) -> Vec<Subject> {
        self.state.lock().await.subjects().to_vec()
    }

    pub async fn add_subject(&self, id: &str, display_name: &str) -> Result<Subject> {
        let subject = self.state.lock().await.add_subject(id, display_name);
        self.storage.save_subject(&subject).await?;
        Ok(subject)
    }

    pub async fn select_subject(&self, id: &str) -> Result<FocusSnapshot> {
        let mut ticker = self.ticker.lock().await;
        let transition = self.state.lock().await.select_subject(id)?;
        Ok(self.finish_action(&mut ticker, transition).await)
    }

    pub async fn pause(&self) -> FocusSnapshot {
        let mut ticker = self.ticker.lock().await;
        let transition = self.state.lock().await.pause();
        self.finish_action(&mut ticker, transition).await
    }

    pub async fn resume(&self) -> FocusSnapshot {
        let mut ticker = self.ticker.lock().await;
        let transition = self.state.lock().await.resume();
        self.finish_action(&mut ticker, transition).await
    }

    /// Write the current session and active subject, e.g. before exit.
    pub async fn flush(&self) -> Result<()> {
        let guard = self.state.lock().await;
        persist(self.storage.as_ref(), &guard).await
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }

    async fn finish_action(
        &self,
        ticker: &mut MutexGuard<'_, Option<JoinHandle<()>>>,
        transition: Option<TimerTransition>,
    ) -> FocusSnapshot {
        let snapshot = self.snapshot().await;
        let Some(transition) = transition else {
            return snapshot;
        };

        match transition {
            TimerTransition::Started | TimerTransition::Switched | TimerTransition::Resumed => {
                self.spawn_ticker(ticker)
            }
            TimerTransition::Paused => {
                if let Some(handle) = ticker.take() {
                    handle.abort();
                }
            }
        }

        info!(
            "Timer {:?}: subject={:?} elapsed={}s",
            transition, snapshot.active_subject_id, snapshot.elapsed_seconds
        );

        if let Err(err) = self.flush().await {
            error!("Failed to persist timer transition {transition:?}: {err:#}");
        }

        let _ = self.events.send(TimerEvent::Transition {
            transition,
            snapshot: snapshot.clone(),
        });

        snapshot
    }

    fn spawn_ticker(&self, ticker: &mut MutexGuard<'_, Option<JoinHandle<()>>>) {
        if let Some(handle) = ticker.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let storage = self.storage.clone();
        let events = self.events.clone();
        let tick_interval = self.tick_interval;
        let persist_every = self.persist_every_ticks.max(1);

        let handle = tokio::spawn(async move {
            // First tick lands one full period after (re)start.
            let mut interval = time::interval_at(Instant::now() + tick_interval, tick_interval);
            let mut ticks: u32 = 0;
            loop {
                interval.tick().await;

                let snapshot = {
                    let mut guard = state.lock().await;
                    if !guard.tick() {
                        break;
                    }
                    ticks = ticks.wrapping_add(1);
                    // Saved under the state lock so a later flush always lands after it.
                    if ticks % persist_every == 0 {
                        if let Err(err) = persist(storage.as_ref(), &guard).await {
                            error!("Failed to persist session progress: {err:#}");
                        }
                    }
                    guard.snapshot()
                };

                let _ = events.send(TimerEvent::Tick(snapshot));
            }
        });

        **ticker = Some(handle);
    }
}

async fn persist(storage: &dyn FocusStorage, state: &TimerState) -> Result<()> {
    storage.save_session(state.session()).await?;
    if let Some(subject) = state.active_subject() {
        storage.save_subject(subject).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::{storage::memory::MemoryStorage, timer::TimerStatus};

    async fn controller_with_subjects() -> (TimerController, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::default());
        let controller = TimerController::new(storage.clone());
        controller.add_subject("PHYSICS", "Physics").await.unwrap();
        controller.add_subject("CHEM", "Chemistry").await.unwrap();
        (controller, storage)
    }

    #[tokio::test(start_paused = true)]
    async fn physics_for_sixty_five_seconds() {
        let (controller, storage) = controller_with_subjects().await;

        controller.select_subject("PHYSICS").await.unwrap();
        time::sleep(Duration::from_millis(65_500)).await;

        let snapshot = controller.pause().await;
        assert_eq!(snapshot.elapsed_seconds, 65);
        assert_eq!(snapshot.subject_total_seconds, 65);

        let persisted = storage.snapshot();
        assert_eq!(persisted.session.elapsed_seconds, 65);
        assert!(!persisted.session.running);
        let physics = persisted.subjects.iter().find(|s| s.id == "PHYSICS").unwrap();
        assert_eq!(physics.total_accumulated_seconds, 65);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_timer_does_not_advance() {
        let (controller, _) = controller_with_subjects().await;

        controller.select_subject("CHEM").await.unwrap();
        time::sleep(Duration::from_millis(3_500)).await;
        controller.pause().await;
        time::sleep(Duration::from_secs(30)).await;

        let snapshot = controller.resume().await;
        assert_eq!(snapshot.status, TimerStatus::Running);
        assert_eq!(snapshot.elapsed_seconds, 3);

        time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(controller.snapshot().await.elapsed_seconds, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_are_broadcast_and_ticks_are_separate() {
        let (controller, _) = controller_with_subjects().await;
        let mut events = controller.subscribe();

        controller.select_subject("PHYSICS").await.unwrap();
        controller.select_subject("CHEM").await.unwrap();

        match events.try_recv().unwrap() {
            TimerEvent::Transition { transition, .. } => {
                assert_eq!(transition, TimerTransition::Started)
            }
            other => panic!("expected transition, got {other:?}"),
        }
        match events.try_recv().unwrap() {
            TimerEvent::Transition {
                transition,
                snapshot,
            } => {
                assert_eq!(transition, TimerTransition::Switched);
                assert_eq!(snapshot.elapsed_seconds, 0);
                assert_eq!(snapshot.subject_label.as_deref(), Some("Chemistry"));
            }
            other => panic!("expected transition, got {other:?}"),
        }
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        time::sleep(Duration::from_millis(1_500)).await;
        assert!(matches!(events.try_recv().unwrap(), TimerEvent::Tick(s) if s.elapsed_seconds == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_on_a_persisting_tick_leaves_the_paused_row() {
        let (mut controller, storage) = controller_with_subjects().await;
        controller.persist_every_ticks = 1;

        controller.select_subject("PHYSICS").await.unwrap();
        // Lands on the same instant as the third tick.
        time::sleep(Duration::from_secs(3)).await;
        let paused = controller.pause().await;
        time::sleep(Duration::from_millis(50)).await;

        let persisted = storage.snapshot();
        assert!(!persisted.session.running);
        assert_eq!(persisted.session.elapsed_seconds, paused.elapsed_seconds);
        let physics = persisted.subjects.iter().find(|s| s.id == "PHYSICS").unwrap();
        assert_eq!(physics.total_accumulated_seconds, paused.subject_total_seconds);
    }

    #[tokio::test(start_paused = true)]
    async fn restored_state_stays_idle() {
        let storage = Arc::new(MemoryStorage::default());
        let persisted = PersistedState {
            session: crate::models::FocusSession {
                active_subject_id: Some("PHYSICS".into()),
                elapsed_seconds: 12,
                running: true,
            },
            subjects: vec![Subject::new("PHYSICS", "Physics")],
            last_room: None,
        };

        let controller = TimerController::restored(storage, &persisted);
        time::sleep(Duration::from_secs(10)).await;

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.status, TimerStatus::Idle);
        assert_eq!(snapshot.elapsed_seconds, 12);

        let resumed = controller.resume().await;
        assert_eq!(resumed.elapsed_seconds, 12);
        assert_eq!(resumed.status, TimerStatus::Running);
    }
}
