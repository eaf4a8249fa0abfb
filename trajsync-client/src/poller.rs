//! Periodic trajectory polling for the selected floor
//!
//! One poll task runs per selected floor. It issues a single trajectory
//! request per period and publishes the result to the per-floor store, the
//! `watch` subscription, and any registered observers. Results that arrive
//! after the floor was deselected or switched are discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use trajsync_protocol::{Conflict, Trajectory, TrajectoryParam, TrajectoryResponse};
use trajsync_utils::{Result, TrajsyncError};

use crate::manager::TrajectoryManager;

/// Shortest period a poll timer will run at
const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Timing of the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Time between trajectory requests
    pub period: Duration,
    /// Lookahead window sent as the request `duration`
    pub lookahead_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(2000),
            lookahead_ms: 60_000,
        }
    }
}

/// Whether the poller is currently driving requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling { map_name: String },
}

/// The latest trajectory set received for one floor
#[derive(Debug, Clone)]
pub struct TrajectorySnapshot {
    pub map_name: String,
    pub response: TrajectoryResponse,
    pub received_at: Instant,
    /// Selection this snapshot was produced under
    pub generation: u64,
}

impl TrajectorySnapshot {
    pub fn trajectories(&self) -> &[Trajectory] {
        &self.response.values
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.response.conflicts
    }
}

/// Latest snapshot per floor
pub type FloorTrajectories = HashMap<String, Arc<TrajectorySnapshot>>;

/// Receives poll results as they are applied
pub trait TrajectoryObserver: Send + Sync {
    fn on_update(&self, snapshot: &TrajectorySnapshot);

    /// A poll failed; the previous trajectories for the floor are kept
    fn on_error(&self, _map_name: &str, _error: &TrajsyncError) {}
}

struct Control {
    state: PollerState,
    generation: u64,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl Control {
    fn is_current(&self, map_name: &str, generation: u64) -> bool {
        self.generation == generation
            && matches!(&self.state, PollerState::Polling { map_name: m } if m == map_name)
    }

    /// Cancel the running timer, if any. Returns true if one was running.
    fn stop(&mut self) -> bool {
        if let Some(tx) = self.cancel_tx.take() {
            // Receiver is gone if the task already exited
            let _ = tx.send(());
        }
        let was_polling = matches!(self.state, PollerState::Polling { .. });
        self.state = PollerState::Idle;
        was_polling
    }
}

struct Shared<M> {
    manager: M,
    settings: PollSettings,
    control: Mutex<Control>,
    floors: RwLock<FloorTrajectories>,
    updates: watch::Sender<Option<Arc<TrajectorySnapshot>>>,
    observers: RwLock<Vec<Arc<dyn TrajectoryObserver>>>,
}

/// Drives periodic trajectory requests for the selected floor
pub struct TrajectoryPoller<M: TrajectoryManager> {
    shared: Arc<Shared<M>>,
}

impl<M: TrajectoryManager> Clone for TrajectoryPoller<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: TrajectoryManager> TrajectoryPoller<M> {
    pub fn new(manager: M, settings: PollSettings) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                manager,
                settings,
                control: Mutex::new(Control {
                    state: PollerState::Idle,
                    generation: 0,
                    cancel_tx: None,
                }),
                floors: RwLock::new(HashMap::new()),
                updates,
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn manager(&self) -> &M {
        &self.shared.manager
    }

    pub fn settings(&self) -> PollSettings {
        self.shared.settings
    }

    /// Start polling `map_name`
    ///
    /// Any other floor being polled is stopped first. Selecting the floor
    /// that is already being polled leaves its timer alone. Fails with
    /// `ChannelClosed` when the manager cannot issue requests.
    pub async fn select_floor(&self, map_name: impl Into<String>) -> Result<()> {
        let map_name = map_name.into();
        if !self.shared.manager.is_available() {
            return Err(TrajsyncError::ChannelClosed);
        }

        let mut control = self.shared.control.lock().await;
        if matches!(&control.state, PollerState::Polling { map_name: m } if *m == map_name) {
            return Ok(());
        }

        control.stop();
        control.generation += 1;
        let generation = control.generation;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        control.state = PollerState::Polling {
            map_name: map_name.clone(),
        };
        control.cancel_tx = Some(cancel_tx);

        tokio::spawn(poll_task(
            Arc::clone(&self.shared),
            map_name.clone(),
            generation,
            cancel_rx,
        ));

        tracing::info!(
            map_name = %map_name,
            generation = generation,
            period_ms = self.shared.settings.period.as_millis() as u64,
            "Trajectory polling started"
        );
        Ok(())
    }

    /// Stop polling. Returns true if a floor was being polled.
    pub async fn deselect(&self) -> bool {
        let mut control = self.shared.control.lock().await;
        let was_polling = control.stop();
        if was_polling {
            tracing::info!(generation = control.generation, "Trajectory polling stopped");
        }
        was_polling
    }

    pub async fn state(&self) -> PollerState {
        self.shared.control.lock().await.state.clone()
    }

    /// Latest snapshot received for `map_name`
    pub async fn trajectories(&self, map_name: &str) -> Option<Arc<TrajectorySnapshot>> {
        self.shared.floors.read().await.get(map_name).cloned()
    }

    /// Watch the most recently applied snapshot
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<TrajectorySnapshot>>> {
        self.shared.updates.subscribe()
    }

    pub async fn add_observer(&self, observer: Arc<dyn TrajectoryObserver>) {
        self.shared.observers.write().await.push(observer);
    }
}

impl<M: TrajectoryManager> Shared<M> {
    /// Apply one poll result. Returns false when the poll task should exit.
    async fn apply(
        &self,
        map_name: &str,
        generation: u64,
        result: Result<TrajectoryResponse>,
    ) -> bool {
        let mut control = self.control.lock().await;
        if !control.is_current(map_name, generation) {
            tracing::debug!(
                map_name = %map_name,
                generation = generation,
                "Discarding trajectory result for a stale selection"
            );
            return false;
        }

        match result {
            Ok(response) => {
                let snapshot = Arc::new(TrajectorySnapshot {
                    map_name: map_name.to_string(),
                    response,
                    received_at: Instant::now(),
                    generation,
                });
                self.floors
                    .write()
                    .await
                    .insert(map_name.to_string(), Arc::clone(&snapshot));
                self.updates.send_replace(Some(Arc::clone(&snapshot)));

                for observer in self.observers.read().await.iter() {
                    observer.on_update(&snapshot);
                }
                true
            }
            Err(e) => {
                tracing::warn!(
                    map_name = %map_name,
                    error = %e,
                    "Trajectory poll failed, keeping previous trajectories"
                );
                for observer in self.observers.read().await.iter() {
                    observer.on_error(map_name, &e);
                }

                let retry = e.is_retryable();
                if !retry {
                    control.stop();
                    tracing::info!(map_name = %map_name, "Trajectory polling stopped after unrecoverable error");
                }
                retry
            }
        }
    }
}

/// Background task issuing one trajectory request per period
async fn poll_task<M: TrajectoryManager>(
    shared: Arc<Shared<M>>,
    map_name: String,
    generation: u64,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let period = shared.settings.period.max(MIN_PERIOD);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(map_name = %map_name, generation = generation, "Poll task cancelled");
                break;
            }
            _ = ticker.tick() => {
                let param = TrajectoryParam {
                    map_name: map_name.clone(),
                    duration: shared.settings.lookahead_ms,
                    trim: true,
                };
                // An in-flight request runs to completion; apply() drops
                // the result if the selection changed meanwhile
                let result = shared.manager.latest_trajectory(param).await;
                if !shared.apply(&map_name, generation, result).await {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;
    use trajsync_protocol::{RawKnot, TimeParam, TimeResponse};

    #[derive(Default)]
    struct FakeManager {
        responses: std::sync::Mutex<VecDeque<Result<TrajectoryResponse>>>,
        requests: std::sync::Mutex<Vec<TrajectoryParam>>,
        unavailable: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    impl FakeManager {
        fn scripted(responses: Vec<Result<TrajectoryResponse>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into()),
                ..Default::default()
            }
        }

        fn requests(&self) -> Vec<TrajectoryParam> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl TrajectoryManager for FakeManager {
        async fn server_time(&self, _param: TimeParam) -> Result<TimeResponse> {
            Ok(TimeResponse { values: [0.0] })
        }

        async fn latest_trajectory(&self, param: TrajectoryParam) -> Result<TrajectoryResponse> {
            self.requests.lock().unwrap().push(param);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(TrajectoryResponse::default()))
        }

        fn is_available(&self) -> bool {
            !self.unavailable.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        updates: std::sync::Mutex<Vec<(String, usize)>>,
        errors: std::sync::Mutex<Vec<String>>,
    }

    impl TrajectoryObserver for RecordingObserver {
        fn on_update(&self, snapshot: &TrajectorySnapshot) {
            self.updates
                .lock()
                .unwrap()
                .push((snapshot.map_name.clone(), snapshot.trajectories().len()));
        }

        fn on_error(&self, map_name: &str, error: &TrajsyncError) {
            self.errors
                .lock()
                .unwrap()
                .push(format!("{}: {}", map_name, error));
        }
    }

    fn response_with(ids: &[u64]) -> TrajectoryResponse {
        TrajectoryResponse {
            values: ids
                .iter()
                .map(|&id| Trajectory {
                    id,
                    shape: "circle".into(),
                    dimensions: 3,
                    segments: vec![RawKnot::new(0.0, [0.0, 0.0, 0.0], [0.0, 0.0, 0.0])],
                })
                .collect(),
            conflicts: vec![],
        }
    }

    fn sleep_ms(ms: u64) -> tokio::time::Sleep {
        tokio::time::sleep(Duration::from_millis(ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_after_one_period() {
        let poller = TrajectoryPoller::new(
            FakeManager::scripted(vec![Ok(response_with(&[1, 2]))]),
            PollSettings::default(),
        );
        let mut updates = poller.subscribe();

        poller.select_floor("L1").await.unwrap();
        sleep_ms(1900).await;
        assert!(poller.manager().requests().is_empty());

        sleep_ms(200).await;
        assert_eq!(
            poller.manager().requests(),
            vec![TrajectoryParam {
                map_name: "L1".into(),
                duration: 60_000,
                trim: true,
            }]
        );

        let snapshot = poller.trajectories("L1").await.unwrap();
        assert_eq!(snapshot.trajectories().len(), 2);
        assert_eq!(snapshot.generation, 1);

        assert!(updates.has_changed().unwrap());
        let latest = updates.borrow_and_update().clone().unwrap();
        assert_eq!(latest.map_name, "L1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_request_per_period() {
        let settings = PollSettings {
            period: Duration::from_millis(1000),
            lookahead_ms: 30_000,
        };
        let poller = TrajectoryPoller::new(FakeManager::default(), settings);

        poller.select_floor("L2").await.unwrap();
        sleep_ms(3500).await;

        let requests = poller.manager().requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.duration == 30_000 && r.trim));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_previous_trajectories() {
        let poller = TrajectoryPoller::new(
            FakeManager::scripted(vec![
                Ok(response_with(&[7])),
                Err(TrajsyncError::protocol("response/request tag mismatch")),
                Ok(response_with(&[7, 8])),
            ]),
            PollSettings::default(),
        );
        let observer = Arc::new(RecordingObserver::default());
        poller.add_observer(observer.clone()).await;

        poller.select_floor("L1").await.unwrap();
        sleep_ms(4100).await;

        // Second poll failed: first result is still in place
        let snapshot = poller.trajectories("L1").await.unwrap();
        assert_eq!(snapshot.trajectories()[0].id, 7);
        assert_eq!(snapshot.trajectories().len(), 1);
        assert_eq!(observer.errors.lock().unwrap().len(), 1);
        assert!(observer.errors.lock().unwrap()[0].contains("tag mismatch"));

        // Polling continues after the failure
        sleep_ms(2000).await;
        assert_eq!(poller.trajectories("L1").await.unwrap().trajectories().len(), 2);
        assert_eq!(
            *observer.updates.lock().unwrap(),
            vec![("L1".to_string(), 1), ("L1".to_string(), 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deselect_stops_polling() {
        let poller = TrajectoryPoller::new(FakeManager::default(), PollSettings::default());

        poller.select_floor("L1").await.unwrap();
        sleep_ms(2100).await;
        assert_eq!(poller.manager().requests().len(), 1);

        assert!(poller.deselect().await);
        assert_eq!(poller.state().await, PollerState::Idle);
        assert!(!poller.deselect().await);

        sleep_ms(10_000).await;
        assert_eq!(poller.manager().requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_result_discarded_after_deselect() {
        let gate = Arc::new(Notify::new());
        let manager = FakeManager {
            responses: std::sync::Mutex::new(vec![Ok(response_with(&[1]))].into()),
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let poller = TrajectoryPoller::new(manager, PollSettings::default());
        let updates = poller.subscribe();

        poller.select_floor("L1").await.unwrap();
        sleep_ms(2100).await;
        assert_eq!(poller.manager().requests().len(), 1);

        poller.deselect().await;
        gate.notify_one();
        sleep_ms(100).await;

        assert!(poller.trajectories("L1").await.is_none());
        assert!(updates.borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_floor_replaces_timer() {
        let poller = TrajectoryPoller::new(FakeManager::default(), PollSettings::default());

        poller.select_floor("L1").await.unwrap();
        poller.select_floor("L2").await.unwrap();
        assert_eq!(
            poller.state().await,
            PollerState::Polling {
                map_name: "L2".into()
            }
        );

        sleep_ms(2100).await;
        let requests = poller.manager().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].map_name, "L2");
        assert_eq!(poller.trajectories("L2").await.unwrap().generation, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reselecting_same_floor_keeps_timer() {
        let poller = TrajectoryPoller::new(FakeManager::default(), PollSettings::default());

        poller.select_floor("L1").await.unwrap();
        sleep_ms(1000).await;
        poller.select_floor("L1").await.unwrap();
        sleep_ms(1100).await;

        assert_eq!(poller.manager().requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_closed_goes_idle() {
        let poller = TrajectoryPoller::new(
            FakeManager::scripted(vec![Err(TrajsyncError::ChannelClosed)]),
            PollSettings::default(),
        );

        poller.select_floor("L1").await.unwrap();
        sleep_ms(2100).await;
        assert_eq!(poller.state().await, PollerState::Idle);

        sleep_ms(6000).await;
        assert_eq!(poller.manager().requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecoverable_error_goes_idle() {
        let poller = TrajectoryPoller::new(
            FakeManager::scripted(vec![Err(TrajsyncError::internal("manager state lost"))]),
            PollSettings::default(),
        );
        let observer = Arc::new(RecordingObserver::default());
        poller.add_observer(observer.clone()).await;

        poller.select_floor("L1").await.unwrap();
        sleep_ms(2100).await;
        assert_eq!(poller.state().await, PollerState::Idle);
        assert_eq!(observer.errors.lock().unwrap().len(), 1);

        sleep_ms(6000).await;
        assert_eq!(poller.manager().requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_next_tick() {
        let poller = TrajectoryPoller::new(
            FakeManager::scripted(vec![
                Err(TrajsyncError::ConnectionTimeout { millis: 10_000 }),
                Ok(response_with(&[3])),
            ]),
            PollSettings::default(),
        );

        poller.select_floor("L1").await.unwrap();
        sleep_ms(4100).await;

        assert_eq!(poller.manager().requests().len(), 2);
        assert_eq!(poller.trajectories("L1").await.unwrap().trajectories()[0].id, 3);
        assert_eq!(
            poller.state().await,
            PollerState::Polling {
                map_name: "L1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_select_requires_available_manager() {
        let manager = FakeManager::default();
        manager.unavailable.store(true, Ordering::SeqCst);
        let poller = TrajectoryPoller::new(manager, PollSettings::default());

        let err = poller.select_floor("L1").await.unwrap_err();
        assert!(matches!(err, TrajsyncError::ChannelClosed));
        assert_eq!(poller.state().await, PollerState::Idle);
    }
}
