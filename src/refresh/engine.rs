/*!
 * Change-detecting refresh loop
 *
 * One attempt runs at a time. Poll ticks and retries that arrive while an
 * attempt is in flight are dropped, not queued. Each attempt races its fetch
 * against its cancellation token and a timeout watchdog, and re-checks the
 * `destroyed` flag after every await.
 */

use kiosk_core_interface::{
    CancellationToken, Clock, FetchOptions, Fetcher, Host, InterfaceError, KeyValueStore, Notifier,
};
use kiosk_core_resilience::{AdaptiveCadence, BoundedHistory, DEFAULT_HISTORY_CAPACITY};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::attempt::{AttemptOutcome, OutcomeTotals, RefreshAttempt, RefreshStats, Trigger};
use super::url::{cache_busted_url, nonce, CacheBuster};
use crate::config::SessionConfig;
use crate::error::{KioskError, Result};
use crate::fingerprint::Fingerprint;
use crate::health::{FaultKind, HealthSupervisor};
use crate::system::{lock, Adapters};
use crate::timer::{self, TimerHandle};

/// Key under which the time of the last detected change is persisted
pub const LAST_SYNC_KEY: &str = "lastSync";

/// Loads a changed display in place of a bare host navigation
pub type Navigator = Arc<dyn Fn(&str) + Send + Sync>;

const SOURCE: &str = "refresh";

#[derive(Clone)]
pub struct RefreshEngine {
    inner: Arc<Inner>,
}

struct Inner {
    slug: String,
    source_url: String,
    timeout: Duration,
    retry_delay: Duration,
    fetcher: Arc<dyn Fetcher>,
    host: Arc<dyn Host>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    supervisor: Option<HealthSupervisor>,
    /// `true` while an attempt holds the refresh lock
    busy: watch::Sender<bool>,
    state: Mutex<State>,
}

struct State {
    started: bool,
    paused: bool,
    destroyed: bool,
    refreshing: bool,
    cadence: AdaptiveCadence,
    fingerprint: Option<Fingerprint>,
    current: Option<CurrentAttempt>,
    next_id: u64,
    buster: CacheBuster,
    log: BoundedHistory<RefreshAttempt>,
    totals: OutcomeTotals,
    changes_detected: u64,
    last_success_at: Option<u64>,
    last_change_at: Option<u64>,
    poll: TimerHandle,
    retry: TimerHandle,
    navigator: Option<Navigator>,
}

struct CurrentAttempt {
    id: u64,
    cancel: CancellationToken,
}

/// Holds the refresh lock; releasing happens on drop so every exit path,
/// including a dropped future, frees it
struct RefreshGuard {
    inner: Arc<Inner>,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.inner.state);
        state.refreshing = false;
        state.current = None;
        self.inner.busy.send_replace(false);
    }
}

/// How the fetch half of an attempt ended
enum Fetched {
    Body { status: u16, body: String },
    Failed {
        outcome: AttemptOutcome,
        status: Option<u16>,
        message: String,
    },
}

impl RefreshEngine {
    pub fn new(config: &SessionConfig, adapters: &Adapters, supervisor: Option<HealthSupervisor>) -> Self {
        let (busy, _rx) = watch::channel(false);
        let state = State {
            started: false,
            paused: false,
            destroyed: false,
            refreshing: false,
            cadence: AdaptiveCadence::new(config.cadence()),
            fingerprint: None,
            current: None,
            next_id: 0,
            buster: CacheBuster::new(),
            log: BoundedHistory::new(DEFAULT_HISTORY_CAPACITY),
            totals: OutcomeTotals::default(),
            changes_detected: 0,
            last_success_at: None,
            last_change_at: None,
            poll: TimerHandle::idle(),
            retry: TimerHandle::idle(),
            navigator: None,
        };

        Self {
            inner: Arc::new(Inner {
                slug: config.display.slug.clone(),
                source_url: config.display.source_url.clone(),
                timeout: config.refresh.timeout(),
                retry_delay: config.refresh.retry_delay(),
                fetcher: adapters.fetcher.clone(),
                host: adapters.host.clone(),
                notifier: adapters.notifier.clone(),
                store: adapters.store.clone(),
                clock: adapters.clock.clone(),
                supervisor,
                busy,
                state: Mutex::new(state),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Begin polling with an immediate first check. Idempotent; ignored
    /// after teardown.
    pub fn start(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.started || state.destroyed {
                return;
            }
            state.started = true;
            info!(
                "🔁 Refresh started for '{}' every {}ms",
                self.inner.slug,
                state.cadence.interval().as_millis()
            );
        }
        self.reschedule();
        self.spawn_attempt(Trigger::Initial);
    }

    /// Route content-change reloads through `navigator` instead of
    /// navigating the host directly
    pub fn set_navigator(&self, navigator: Navigator) {
        let mut state = lock(&self.inner.state);
        if !state.destroyed {
            state.navigator = Some(navigator);
        }
    }

    /// Stop polling; the fingerprint is kept
    pub fn pause(&self) {
        let mut state = lock(&self.inner.state);
        if state.destroyed || state.paused {
            return;
        }
        state.paused = true;
        state.poll.clear();
        state.retry.clear();
        debug!("Refresh paused for '{}'", self.inner.slug);
    }

    pub fn resume(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.destroyed || !state.paused {
                return;
            }
            state.paused = false;
        }
        debug!("Refresh resumed for '{}'", self.inner.slug);
        self.reschedule();
    }

    /// Set a new baseline, clamped to the configured bounds, and reschedule.
    ///
    /// Returns the interval now in effect.
    pub fn update_interval(&self, ms: u64) -> Duration {
        let interval = {
            let mut state = lock(&self.inner.state);
            state.cadence.set_baseline(Duration::from_millis(ms));
            state.cadence.interval()
        };
        info!(
            "Refresh interval for '{}' set to {}ms",
            self.inner.slug,
            interval.as_millis()
        );
        self.reschedule();
        interval
    }

    /// Cancel the current attempt, forget the fingerprint and check now.
    /// Periodic polling resumes once the check has finished.
    pub async fn force_refresh(&self) -> Result<()> {
        let mut busy = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return Err(KioskError::TornDown("refresh engine"));
            }
            if let Some(current) = &state.current {
                current.cancel.cancel();
            }
            state.fingerprint = None;
            state.poll.clear();
            state.retry.clear();
            self.inner.busy.subscribe()
        };
        let _ = busy.wait_for(|busy| !*busy).await;
        tokio::task::yield_now().await;

        match self.claim(Trigger::Forced) {
            Some(guard) => self.run_attempt(Trigger::Forced, guard).await,
            None if self.is_destroyed() => return Err(KioskError::TornDown("refresh engine")),
            None => {}
        }
        self.reschedule();
        Ok(())
    }

    /// Stop scheduling, cancel the in-flight attempt and wait for it to
    /// unwind. Nothing is emitted afterwards.
    pub async fn teardown(&self) {
        let mut busy = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.poll.clear();
            state.retry.clear();
            state.navigator = None;
            if let Some(current) = &state.current {
                current.cancel.cancel();
            }
            self.inner.busy.subscribe()
        };
        let _ = busy.wait_for(|busy| !*busy).await;

        lock(&self.inner.state).fingerprint = None;
        info!("Refresh engine for '{}' torn down", self.inner.slug);
    }

    // ───────────────────────────────────────────────────────────────────────
    // Scheduling
    // ───────────────────────────────────────────────────────────────────────

    fn reschedule(&self) {
        let weak = Arc::downgrade(&self.inner);
        let mut state = lock(&self.inner.state);
        if state.destroyed || state.paused || !state.started {
            return;
        }
        let interval = state.cadence.interval();
        state.poll = timer::set_interval(interval, move || {
            if let Some(engine) = Self::from_weak(&weak) {
                engine.spawn_attempt(Trigger::Poll);
            }
        });
    }

    fn schedule_retry(&self) {
        let weak = Arc::downgrade(&self.inner);
        let mut state = lock(&self.inner.state);
        if state.destroyed || state.paused {
            return;
        }
        debug!(
            "Retrying '{}' in {}ms (retry {})",
            self.inner.slug,
            self.inner.retry_delay.as_millis(),
            state.cadence.retry_count()
        );
        state.retry = timer::set_timeout(self.inner.retry_delay, move || {
            if let Some(engine) = Self::from_weak(&weak) {
                engine.spawn_attempt(Trigger::Retry);
            }
        });
    }

    /// Take the refresh lock unless destroyed or already refreshing
    fn claim(&self, trigger: Trigger) -> Option<RefreshGuard> {
        let mut state = lock(&self.inner.state);
        if state.destroyed {
            return None;
        }
        if state.refreshing {
            debug!("{:?} tick coalesced: attempt already in flight", trigger);
            return None;
        }
        state.refreshing = true;
        self.inner.busy.send_replace(true);
        Some(RefreshGuard {
            inner: self.inner.clone(),
        })
    }

    fn spawn_attempt(&self, trigger: Trigger) {
        if let Some(guard) = self.claim(trigger) {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.run_attempt(trigger, guard).await;
            });
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Attempt
    // ───────────────────────────────────────────────────────────────────────

    async fn run_attempt(&self, trigger: Trigger, _guard: RefreshGuard) {
        if let Some(previous) = lock(&self.inner.state).current.take() {
            previous.cancel.cancel();
        }
        tokio::task::yield_now().await;

        let began = Instant::now();
        let (id, started_at, url, cancel) = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            state.next_id += 1;
            let id = state.next_id;
            let started_at = state.buster.next_timestamp(self.inner.clock.now_ms());
            let url = cache_busted_url(&self.inner.source_url, started_at, &nonce());
            let cancel = CancellationToken::new();
            state.current = Some(CurrentAttempt {
                id,
                cancel: cancel.clone(),
            });
            (id, started_at, url, cancel)
        };
        debug!(id, ?trigger, "Fetching {}", url);

        let fetched = self.fetch(&url, &cancel).await;
        let duration_ms = began.elapsed().as_millis() as u64;

        let mut record = RefreshAttempt {
            id,
            started_at,
            url,
            trigger,
            outcome: AttemptOutcome::Cancelled,
            status: None,
            changed: false,
            duration_ms,
        };

        if self.is_destroyed() {
            self.log_cancelled(record, "torn down");
            return;
        }

        match fetched {
            Fetched::Body { status, body } => {
                record.status = Some(status);
                self.on_success(record, &body);
            }
            Fetched::Failed {
                outcome: AttemptOutcome::Cancelled,
                ..
            } => self.log_cancelled(record, "aborted"),
            Fetched::Failed {
                outcome,
                status,
                message,
            } => {
                record.outcome = outcome;
                record.status = status;
                self.on_failure(record, &message);
            }
        }
    }

    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Fetched {
        let timeout = self.inner.timeout;
        let options = FetchOptions::new(timeout, cancel.child_token());

        // The fetcher sees the token first; the local arm only covers
        // fetchers that ignore it.
        let result = tokio::select! {
            biased;
            result = self.inner.fetcher.get(url, options) => result,
            _ = cancel.cancelled() => Err(InterfaceError::Aborted),
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                Err(InterfaceError::Timeout(timeout))
            }
        };

        match result {
            Ok(response) if response.is_success() => Fetched::Body {
                status: response.status,
                body: response.body,
            },
            Ok(response) => Fetched::Failed {
                outcome: AttemptOutcome::HttpError,
                status: Some(response.status),
                message: format!("HTTP {} from {}", response.status, self.inner.source_url),
            },
            Err(InterfaceError::Aborted) => Fetched::Failed {
                outcome: AttemptOutcome::Cancelled,
                status: None,
                message: String::new(),
            },
            Err(InterfaceError::Timeout(after)) => Fetched::Failed {
                outcome: AttemptOutcome::AbortedTimeout,
                status: None,
                message: format!("no response within {}ms", after.as_millis()),
            },
            Err(InterfaceError::HttpStatus { status, url }) => Fetched::Failed {
                outcome: AttemptOutcome::HttpError,
                status: Some(status),
                message: format!("HTTP {} from {}", status, url),
            },
            Err(e) => Fetched::Failed {
                outcome: AttemptOutcome::NetworkError,
                status: None,
                message: e.to_string(),
            },
        }
    }

    fn on_success(&self, mut record: RefreshAttempt, body: &str) {
        let fingerprint = Fingerprint::of_str(body);
        let started_at = record.started_at;
        record.outcome = AttemptOutcome::Success;

        let (changed, restored, url, navigator) = {
            let mut state = lock(&self.inner.state);
            let changed = match state.fingerprint {
                None => {
                    debug!("First fingerprint {} recorded", fingerprint);
                    false
                }
                Some(previous) => previous != fingerprint,
            };
            state.fingerprint = Some(fingerprint);
            record.changed = changed;
            if changed {
                state.changes_detected += 1;
                state.last_change_at = Some(started_at);
            }
            state.last_success_at = Some(started_at);
            state.totals.record(AttemptOutcome::Success);
            let restored = state.cadence.record_success();
            let url = record.url.clone();
            state.log.push(record);
            (changed, restored, url, state.navigator.clone())
        };

        if changed {
            info!("📝 Content changed for '{}'; reloading display", self.inner.slug);
            match navigator {
                Some(navigate) => navigate(&url),
                None => self.inner.host.load_embedded_document(&url),
            }
            if let Err(e) = self
                .inner
                .store
                .set(LAST_SYNC_KEY, &started_at.to_string())
            {
                warn!("Failed to persist {}: {}", LAST_SYNC_KEY, e);
            }
            self.inner.notifier.show_modif(started_at);
        }
        self.inner.notifier.show_status(started_at, true, 0);
        if let Some(supervisor) = &self.inner.supervisor {
            supervisor.record_refresh();
        }

        if let Some(interval) = restored {
            info!(
                "Refresh for '{}' recovered; interval back to {}ms",
                self.inner.slug,
                interval.as_millis()
            );
            self.reschedule();
        }
    }

    fn on_failure(&self, record: RefreshAttempt, message: &str) {
        let outcome = record.outcome;
        let decision = {
            let mut state = lock(&self.inner.state);
            state.totals.record(outcome);
            state.log.push(record);
            state.cadence.record_failure()
        };

        let kind = match outcome {
            AttemptOutcome::AbortedTimeout => FaultKind::NetworkTimeout,
            AttemptOutcome::HttpError => FaultKind::RefreshService,
            _ => FaultKind::FetchError,
        };
        warn!(
            outcome = %outcome,
            consecutive = decision.consecutive_errors,
            "Refresh of '{}' failed: {}",
            self.inner.slug,
            message
        );
        if let Some(supervisor) = &self.inner.supervisor {
            supervisor.record_fault(kind, message, SOURCE);
        }
        self.inner.notifier.show_status(
            self.inner.clock.now_ms(),
            false,
            decision.consecutive_errors,
        );

        if let Some(interval) = decision.slowed_to {
            warn!(
                "{} consecutive failures for '{}'; slowing to {}ms",
                decision.consecutive_errors,
                self.inner.slug,
                interval.as_millis()
            );
            self.reschedule();
        }
        if decision.retry {
            self.schedule_retry();
        }
    }

    fn log_cancelled(&self, record: RefreshAttempt, why: &str) {
        debug!(id = record.id, "Refresh attempt cancelled ({})", why);
        let mut state = lock(&self.inner.state);
        state.totals.record(AttemptOutcome::Cancelled);
        state.log.push(record);
    }

    // ───────────────────────────────────────────────────────────────────────
    // Diagnostics
    // ───────────────────────────────────────────────────────────────────────

    pub fn is_destroyed(&self) -> bool {
        lock(&self.inner.state).destroyed
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.inner.state).refreshing
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.inner.state).paused
    }

    pub fn interval(&self) -> Duration {
        lock(&self.inner.state).cadence.interval()
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        lock(&self.inner.state).fingerprint
    }

    /// Id of the attempt currently in flight
    pub fn current_attempt(&self) -> Option<u64> {
        lock(&self.inner.state).current.as_ref().map(|c| c.id)
    }

    /// Finished attempts, oldest first
    pub fn attempts(&self) -> Vec<RefreshAttempt> {
        lock(&self.inner.state).log.to_vec()
    }

    /// Persisted time of the last detected change
    pub fn last_sync(&self) -> Result<Option<u64>> {
        let value = self.inner.store.get(LAST_SYNC_KEY)?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    pub fn stats(&self) -> RefreshStats {
        let state = lock(&self.inner.state);
        RefreshStats {
            interval_ms: state.cadence.interval().as_millis() as u64,
            baseline_ms: state.cadence.baseline().as_millis() as u64,
            consecutive_errors: state.cadence.consecutive_errors(),
            retry_count: state.cadence.retry_count(),
            totals: state.totals,
            changes_detected: state.changes_detected,
            last_success_at: state.last_success_at,
            last_change_at: state.last_change_at,
            fingerprint: state.fingerprint.map(|f| f.to_string()),
            refreshing: state.refreshing,
            paused: state.paused,
        }
    }
}

impl std::fmt::Debug for RefreshEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshEngine")
            .field("slug", &self.inner.slug)
            .field("source_url", &self.inner.source_url)
            .finish()
    }
}
