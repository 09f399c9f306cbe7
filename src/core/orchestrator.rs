//! Scheduled and on-demand synchronization of the daily appointment session.

use crate::core::retry::{retry_with_backoff, RetryConfig};
use crate::core::transformer::{distinct_patient_ids, join_appointments};
use crate::domain::model::{InternalAppointment, SyncResult, SyncWindow};
use crate::domain::ports::{CacheStore, EhrTransport};
use crate::utils::error::{Result, SyncError};
use crate::utils::validation::{validate_positive_number, validate_range, Validate};
use chrono::{Datelike, Days, Local, NaiveDate, Weekday};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const ALREADY_SYNCING: &str = "Sync already in progress";

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub interval: Duration,
    pub lookahead_days: u32,
    pub auto_sync: bool,
    pub fallback_enabled: bool,
    /// Days the practice sees patients. Empty means every day.
    pub operating_days: Vec<Weekday>,
    pub history_limit: usize,
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            lookahead_days: 1,
            auto_sync: false,
            fallback_enabled: true,
            operating_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            history_limit: 20,
            retry: RetryConfig::default(),
        }
    }
}

impl Validate for SyncConfig {
    fn validate(&self) -> Result<()> {
        validate_positive_number("sync.interval_ms", self.interval.as_millis() as u64, 1)?;
        validate_range("sync.lookahead_days", self.lookahead_days, 1, MAX_LOOKAHEAD_DAYS)?;
        validate_positive_number("sync.history_limit", self.history_limit as u64, 1)
    }
}

pub const MAX_LOOKAHEAD_DAYS: u32 = 31;

/// Partial settings applied by [`SyncOrchestrator::update_config`].
#[derive(Debug, Clone, Default)]
pub struct SyncConfigUpdate {
    pub interval: Option<Duration>,
    pub lookahead_days: Option<u32>,
    pub auto_sync: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub auto_sync_running: bool,
    pub degraded: bool,
    pub last_result: Option<SyncResult>,
}

/// Computes `[from, to)`, moving `today` forward to the next operating day.
///
/// Fails instead of overflowing when the window runs past the calendar.
pub fn compute_sync_window(
    today: NaiveDate,
    lookahead_days: u32,
    operating_days: &[Weekday],
) -> Result<SyncWindow> {
    let out_of_range = |from: NaiveDate| SyncError::InvalidDateRange {
        from: from.to_string(),
        to: format!("{} + {} days", from, lookahead_days),
    };

    let mut from = today;
    if !operating_days.is_empty() {
        for _ in 0..7 {
            if operating_days.contains(&from.weekday()) {
                break;
            }
            from = from.succ_opt().ok_or_else(|| out_of_range(from))?;
        }
    }

    let to = from
        .checked_add_days(Days::new(u64::from(lookahead_days.max(1))))
        .ok_or_else(|| out_of_range(from))?;

    Ok(SyncWindow { from, to })
}

#[derive(Debug, Default)]
struct SyncSession {
    last_result: Option<SyncResult>,
    history: VecDeque<SyncResult>,
    degraded: bool,
}

struct AutoSync {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

// 任何離開路徑（包括 future 被丟棄）都要把狀態設回 Idle
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

type Clock = Box<dyn Fn() -> NaiveDate + Send + Sync>;

/// Coordinates fetch → transform → persist for one practice session.
///
/// At most one sync runs at a time. A trigger arriving while a sync is in
/// flight is coalesced: it returns a failed result carrying
/// [`ALREADY_SYNCING`] and is not recorded in the history.
pub struct SyncOrchestrator<T: EhrTransport, S: CacheStore> {
    transport: T,
    store: S,
    config: Mutex<SyncConfig>,
    session: Mutex<SyncSession>,
    in_flight: tokio::sync::Mutex<()>,
    syncing: AtomicBool,
    timer: Mutex<Option<AutoSync>>,
    today: Clock,
}

impl<T, S> SyncOrchestrator<T, S>
where
    T: EhrTransport + 'static,
    S: CacheStore + 'static,
{
    pub fn new(transport: T, store: S, config: SyncConfig) -> Self {
        Self {
            transport,
            store,
            config: Mutex::new(config),
            session: Mutex::new(SyncSession::default()),
            in_flight: tokio::sync::Mutex::new(()),
            syncing: AtomicBool::new(false),
            timer: Mutex::new(None),
            today: Box::new(|| Local::now().date_naive()),
        }
    }

    /// Replaces the source of "today" used for the sync window.
    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Box::new(today);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Verifies connectivity and starts auto-sync if configured.
    ///
    /// Returns `Ok(true)` when connected, `Ok(false)` when running degraded
    /// with fallback enabled, and the connection error otherwise.
    pub async fn initialize(self: &Arc<Self>) -> Result<bool> {
        let config = self.config_snapshot();

        let check = if self.transport.is_available() {
            self.transport.test_connection().await
        } else {
            Err(SyncError::TransportUnavailable {
                message: "transport is not usable in this environment".to_string(),
            })
        };

        let connected = match check {
            Ok(()) => {
                self.session().degraded = false;
                true
            }
            Err(e) if config.fallback_enabled => {
                tracing::warn!("⚠️ Connection test failed, continuing in fallback mode: {}", e);
                self.session().degraded = true;
                false
            }
            Err(e) => {
                tracing::error!("❌ Connection test failed: {}", e);
                return Err(e);
            }
        };

        if config.auto_sync {
            self.start_auto_sync();
        }

        Ok(connected)
    }

    /// The single orchestration path, shared by the timer and manual triggers.
    pub async fn sync_now(&self) -> SyncResult {
        let Ok(_in_flight) = self.in_flight.try_lock() else {
            tracing::info!("⏭️ {}, skipping trigger", ALREADY_SYNCING);
            return SyncResult::failed(vec![ALREADY_SYNCING.to_string()]);
        };

        self.syncing.store(true, Ordering::SeqCst);
        let _syncing = SyncingGuard(&self.syncing);
        let started = Instant::now();

        let outcome = if !self.transport.is_available() {
            SyncResult::failed(vec!["Transport unavailable".to_string()])
        } else {
            match self.run_sync().await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("❌ Sync failed: {} (category: {:?})", e, e.category());
                    tracing::info!("💡 {}", e.recovery_suggestion());
                    SyncResult::failed(vec![e.to_string()])
                }
            }
        };
        let result = outcome.with_duration(started.elapsed());

        self.record(&result);
        result
    }

    pub async fn force_sync(&self) -> SyncResult {
        tracing::info!("🔄 Manual sync requested");
        self.sync_now().await
    }

    async fn run_sync(&self) -> Result<SyncResult> {
        let config = self.config_snapshot();
        let window = compute_sync_window(
            (self.today)(),
            config.lookahead_days,
            &config.operating_days,
        )?;
        tracing::info!("🔄 Syncing appointments for [{}, {})", window.from, window.to);

        let appointments = retry_with_backoff(&config.retry, "GetAppointments", || {
            self.transport.get_appointments(window.from, window.to)
        })
        .await?;

        if appointments.is_empty() {
            tracing::info!("📭 No appointments in window");
            return Ok(SyncResult::empty());
        }

        let patient_ids = distinct_patient_ids(&appointments);
        let patients = retry_with_backoff(&config.retry, "GetPatients", || {
            self.transport.get_patients(&patient_ids)
        })
        .await?;

        let providers = retry_with_backoff(&config.retry, "GetProviders", || {
            self.transport.get_providers()
        })
        .await?;

        let outcome = join_appointments(&appointments, &patients, &providers, window.from);

        self.store
            .save(window.session_date(), &outcome.appointments)
            .await?;

        tracing::info!(
            "✅ Synced {} of {} appointments ({} patients, {} record errors)",
            outcome.appointments.len(),
            appointments.len(),
            patients.len(),
            outcome.errors.len()
        );

        Ok(SyncResult::succeeded(
            appointments.len(),
            patients.len(),
            outcome.errors,
        ))
    }

    fn record(&self, result: &SyncResult) {
        let limit = self.config_snapshot().history_limit.max(1);
        let mut session = self.session();

        if result.success {
            session.degraded = false;
        }
        session.last_result = Some(result.clone());
        session.history.push_back(result.clone());
        while session.history.len() > limit {
            session.history.pop_front();
        }
    }

    pub fn last_result(&self) -> Option<SyncResult> {
        self.session().last_result.clone()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<SyncResult> {
        self.session().history.iter().cloned().collect()
    }

    pub fn state(&self) -> SyncState {
        if self.syncing.load(Ordering::SeqCst) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    pub fn status(&self) -> SyncStatus {
        let session = self.session();
        SyncStatus {
            state: self.state(),
            auto_sync_running: self.is_auto_sync_running(),
            degraded: session.degraded,
            last_result: session.last_result.clone(),
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.config_snapshot()
    }

    /// Last saved session for `session_date`, served when the remote is down.
    pub async fn cached_appointments(
        &self,
        session_date: NaiveDate,
    ) -> Result<Vec<InternalAppointment>> {
        self.store.load(session_date).await
    }

    /// The window the next sync would fetch.
    pub fn current_window(&self) -> Result<SyncWindow> {
        let config = self.config_snapshot();
        compute_sync_window((self.today)(), config.lookahead_days, &config.operating_days)
    }

    /// Merges `update` into the current settings.
    ///
    /// The merged settings are validated first; on error nothing changes.
    pub fn update_config(self: &Arc<Self>, update: SyncConfigUpdate) -> Result<()> {
        let (interval_changed, auto_sync) = {
            let mut config = self.lock_config();
            let mut merged = config.clone();

            if let Some(interval) = update.interval {
                merged.interval = interval;
            }
            if let Some(days) = update.lookahead_days {
                merged.lookahead_days = days;
            }
            if let Some(auto_sync) = update.auto_sync {
                merged.auto_sync = auto_sync;
            }
            if let Err(e) = merged.validate() {
                tracing::warn!("⚠️ Rejected config update: {}", e);
                return Err(e);
            }

            let interval_changed = merged.interval != config.interval;
            *config = merged;
            (interval_changed, config.auto_sync)
        };

        let running = self.is_auto_sync_running();
        match (auto_sync, running) {
            (true, true) if interval_changed => {
                tracing::info!("⏱️ Sync interval changed, restarting timer");
                self.stop_auto_sync();
                self.start_auto_sync();
            }
            (true, false) => self.start_auto_sync(),
            (false, true) => {
                self.stop_auto_sync();
            }
            _ => {}
        }
        Ok(())
    }

    /// Starts the recurring timer. No-op if one is already running.
    pub fn start_auto_sync(self: &Arc<Self>) {
        let mut timer = self.timer();
        if let Some(existing) = timer.as_ref() {
            if !existing.handle.is_finished() {
                return;
            }
        }

        let interval = self.config_snapshot().interval;
        if interval.is_zero() {
            tracing::error!("❌ Auto-sync not started: interval must be greater than zero");
            return;
        }
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_timer(Arc::downgrade(self), interval, stop_rx));

        tracing::info!("⏱️ Auto-sync every {:?}", interval);
        *timer = Some(AutoSync { handle, stop });
    }

    /// Cancels future ticks. An in-flight sync is left to finish.
    pub fn stop_auto_sync(&self) -> bool {
        match self.timer().take() {
            Some(auto_sync) => {
                let _ = auto_sync.stop.send(true);
                true
            }
            None => false,
        }
    }

    pub fn is_auto_sync_running(&self) -> bool {
        self.timer()
            .as_ref()
            .map(|auto_sync| !auto_sync.handle.is_finished())
            .unwrap_or(false)
    }

    /// Idempotent.
    pub fn shutdown(&self) {
        if self.stop_auto_sync() {
            tracing::info!("🛑 Auto-sync stopped");
        }
    }

    fn config_snapshot(&self) -> SyncConfig {
        self.lock_config().clone()
    }

    fn lock_config(&self) -> MutexGuard<'_, SyncConfig> {
        self.config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session(&self) -> MutexGuard<'_, SyncSession> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn timer(&self) -> MutexGuard<'_, Option<AutoSync>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: EhrTransport, S: CacheStore> Drop for SyncOrchestrator<T, S> {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(auto_sync) = timer.take() {
                let _ = auto_sync.stop.send(true);
            }
        }
    }
}

async fn run_timer<T, S>(
    orchestrator: Weak<SyncOrchestrator<T, S>>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) where
    T: EhrTransport + 'static,
    S: CacheStore + 'static,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                let result = orchestrator.sync_now().await;
                tracing::debug!(
                    "⏱️ Scheduled sync finished: success={} appointments={}",
                    result.success,
                    result.appointments_found
                );
            }
        }
    }
}
