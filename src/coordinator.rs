use crate::beem_api::BeemApiClient;
use crate::errors::{BeemError, UpdateFailed};
use crate::models::{BeemBox, SolarEquipment};
use crate::snapshot::{BatterySnapshot, Snapshot};
use crate::storage::{EntryOptions, OptionsStore};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const UPDATE_INTERVAL: Duration = Duration::from_secs(60);

pub type Listener = Box<dyn Fn(&Snapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct CoordinatorState {
    data: Option<Arc<Snapshot>>,
    last_update_success: bool,
    last_error: Option<UpdateFailed>,
}

#[derive(Default)]
struct Shared {
    state: RwLock<CoordinatorState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    closed: AtomicBool,
}

/// Read side of a coordinator: latest snapshot, availability and listener registration.
#[derive(Clone, Default)]
pub struct CoordinatorHandle {
    shared: Arc<Shared>,
}

impl CoordinatorHandle {
    pub fn data(&self) -> Option<Arc<Snapshot>> {
        self.read_state(|state| state.data.clone())
    }

    /// False until the first successful refresh, and after any failed one.
    pub fn last_update_success(&self) -> bool {
        self.read_state(|state| state.last_update_success)
    }

    pub fn last_error(&self) -> Option<UpdateFailed> {
        self.read_state(|state| state.last_error.clone())
    }

    /// Registers a callback run after every successful refresh, in registration order.
    /// Listeners must not register or remove listeners themselves.
    pub fn add_listener(&self, listener: impl Fn(&Snapshot) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&self, snapshot: Arc<Snapshot>) {
        if self.is_closed() {
            debug!("Coordinator closed, discarding snapshot");
            return;
        }
        {
            let mut state = self.shared.state.write().unwrap_or_else(PoisonError::into_inner);
            state.data = Some(snapshot.clone());
            state.last_update_success = true;
            state.last_error = None;
        }
        for (_, listener) in self.listeners().iter() {
            listener(&snapshot);
        }
    }

    fn mark_failed(&self, err: &UpdateFailed) {
        if self.is_closed() {
            return;
        }
        let mut state = self.shared.state.write().unwrap_or_else(PoisonError::into_inner);
        state.last_update_success = false;
        state.last_error = Some(err.clone());
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    fn read_state<T>(&self, f: impl FnOnce(&CoordinatorState) -> T) -> T {
        f(&self.shared.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.shared.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Polls the Beem API for one account and publishes combined snapshots.
///
/// Refreshes take `&mut self`, so one coordinator never runs two at once.
pub struct UpdateCoordinator {
    name: String,
    client: BeemApiClient,
    battery_id: Option<i64>,
    options_store: Arc<dyn OptionsStore>,
    persisted_token: Option<String>,
    handle: CoordinatorHandle,
}

impl UpdateCoordinator {
    pub fn new(
        client: BeemApiClient,
        battery_id: Option<i64>,
        options_store: Arc<dyn OptionsStore>,
    ) -> Self {
        let name = match battery_id {
            Some(id) => format!("beem_{id}"),
            None => "beem_pnp".to_string(),
        };
        let persisted_token = client.token().map(str::to_string);
        Self {
            name,
            client,
            battery_id,
            options_store,
            persisted_token,
            handle: CoordinatorHandle::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn battery_id(&self) -> Option<i64> {
        self.battery_id
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    pub fn client_mut(&mut self) -> &mut BeemApiClient {
        &mut self.client
    }

    /// Runs one refresh cycle. On success the snapshot replaces the previous one
    /// and listeners are notified; on failure the previous snapshot is kept.
    pub async fn refresh(&mut self) -> Result<Arc<Snapshot>, UpdateFailed> {
        match self.fetch_snapshot().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.persist_token().await;
                self.handle.publish(snapshot.clone());
                debug!(coordinator = %self.name, "Refresh succeeded");
                Ok(snapshot)
            }
            Err(err) => {
                warn!(coordinator = %self.name, error = %err, "Refresh failed");
                self.handle.mark_failed(&err);
                Err(err)
            }
        }
    }

    async fn fetch_snapshot(&mut self) -> Result<Snapshot, UpdateFailed> {
        let battery = match self.battery_id {
            Some(battery_id) => Some(self.fetch_battery(battery_id).await?),
            None => None,
        };

        let beemboxes = self.fetch_beemboxes().await;

        Ok(Snapshot {
            battery,
            beemboxes,
            fetched_at: Utc::now(),
        })
    }

    async fn fetch_battery(&mut self, battery_id: i64) -> Result<BatterySnapshot, UpdateFailed> {
        let batteries = self
            .client
            .fetch_devices()
            .await
            .map_err(|e| UpdateFailed(format!("Battery list unavailable: {e}")))?;
        let solar_equipments: Vec<SolarEquipment> = batteries
            .into_iter()
            .find(|battery| battery.id == Some(battery_id))
            .ok_or(BeemError::DeviceNotFound(battery_id))?
            .solar_equipments
            .unwrap_or_default();

        let telemetry = match self.client.fetch_live_data(battery_id).await {
            Ok(telemetry) => telemetry,
            // The client already logged in again for this request
            Err(err @ BeemError::AuthenticationFailed(_)) => {
                return Err(UpdateFailed(format!("Live data unavailable: {err}")));
            }
            Err(err) => {
                warn!(coordinator = %self.name, error = %err, "Live data unavailable, renewing token");
                if !self.client.has_password() {
                    return Err(UpdateFailed::new("Password required to renew the token"));
                }
                self.client
                    .login()
                    .await
                    .map_err(|e| UpdateFailed(format!("Token renewal failed: {e}")))?;
                self.client.fetch_live_data(battery_id).await.map_err(|e| {
                    UpdateFailed(format!("Live data still unavailable after login: {e}"))
                })?
            }
        };

        Ok(BatterySnapshot::new(telemetry, solar_equipments))
    }

    /// BeemBox data is best effort and never fails the cycle.
    async fn fetch_beemboxes(&mut self) -> Vec<BeemBox> {
        match self.client.fetch_boxes().await {
            Ok(boxes) => boxes,
            Err(err) => {
                let err = BeemError::PartialDataUnavailable(err.to_string());
                warn!(coordinator = %self.name, error = %err, "Continuing without BeemBoxes");
                Vec::new()
            }
        }
    }

    async fn persist_token(&mut self) {
        let Some(token) = self.client.token() else {
            return;
        };
        if self.persisted_token.as_deref() == Some(token) {
            return;
        }
        let options = EntryOptions {
            token: Some(token.to_string()),
        };
        let persisted = self
            .options_store
            .update_options(self.client.email(), options)
            .await;
        match persisted {
            Ok(()) => {
                info!(coordinator = %self.name, "Token updated in account options");
                self.persisted_token = self.client.token().map(str::to_string);
            }
            Err(e) => warn!(coordinator = %self.name, error = %e, "Could not persist token"),
        }
    }

    /// Starts the periodic refresh task. The first tick fires one `period` from now.
    pub fn spawn(self, period: Duration) -> CoordinatorTask {
        let handle = self.handle();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(period, shutdown_rx));
        CoordinatorTask {
            handle,
            shutdown: Some(shutdown_tx),
            join,
        }
    }

    async fn run(mut self, period: Duration, mut shutdown: oneshot::Receiver<()>) -> Self {
        info!(coordinator = %self.name, period_secs = period.as_secs_f64(), "Polling started");
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    // Errors are recorded on the handle; the next tick retries
                    let _ = self.refresh().await;
                }
            }
        }
        info!(coordinator = %self.name, "Polling stopped");
        self
    }
}

/// A running coordinator. Dropping it without `shutdown` leaves the task running.
pub struct CoordinatorTask {
    handle: CoordinatorHandle,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<UpdateCoordinator>,
}

impl CoordinatorTask {
    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Stops polling. A refresh in flight runs to completion and its result is discarded.
    pub async fn shutdown(mut self) -> Option<UpdateCoordinator> {
        self.handle.close();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match self.join.await {
            Ok(coordinator) => Some(coordinator),
            Err(e) => {
                warn!(error = %e, "Coordinator task ended abnormally");
                None
            }
        }
    }
}
