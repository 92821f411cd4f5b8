/*!
 * Process-wide health supervisor
 *
 * Three independent cadences drive it: the health check scores counters and
 * triggers recovery, the memory check walks the warning ladder, and the UI
 * update pushes a summary to the notifier. Runtime signals arrive on a
 * separate listener task. All of them hold only a weak reference, so the
 * supervisor is freed once the last handle is dropped.
 */

use kiosk_core_interface::{Clock, Host, MemorySampler, Notifier, RuntimeSignal, RuntimeSignals};
use kiosk_core_resilience::{
    BoundedHistory, HealthAssessment, HealthCounters, HealthMonitor, HealthSample, HealthStatus,
    DEFAULT_HISTORY_CAPACITY,
};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::fault::{FaultEvent, FaultKind, FaultSeverity};
use super::memory::{self, MemorySample, MemoryVerdict};
use super::performance::{PerformanceEntry, PerformanceTracker};
use super::recovery::{RecoveryHookId, RecoveryHooks, RecoveryStats, ReloadReason};
use super::state::{HealthReport, HealthState, HistorySizes};
use crate::config::HealthConfig;
use crate::error::Result;
use crate::system::{lock, Adapters};
use crate::timer::{self, TimerHandle};

const SOURCE: &str = "health-supervisor";

/// Entries kept in each history when recovery trims them
const RECOVERY_KEEP: usize = 10;

/// Handle to the process-wide supervisor; clones share one state
#[derive(Clone)]
pub struct HealthSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: HealthConfig,
    host: Arc<dyn Host>,
    notifier: Arc<dyn Notifier>,
    sampler: Arc<dyn MemorySampler>,
    signals: Arc<dyn RuntimeSignals>,
    clock: Arc<dyn Clock>,
    started_at: Instant,
    start_time_ms: u64,
    state: Mutex<State>,
}

struct State {
    status: HealthStatus,
    score: f64,
    counters: HealthCounters,
    last_error: Option<FaultEvent>,
    memory: BoundedHistory<MemorySample>,
    performance: BoundedHistory<PerformanceEntry>,
    errors: BoundedHistory<FaultEvent>,
    monitor: HealthMonitor,
    tracker: PerformanceTracker,
    hooks: RecoveryHooks,
    recovery: RecoveryStats,
    recovering: bool,
    memory_recovery_pending: bool,
    started: bool,
    destroyed: bool,
    timers: Timers,
}

#[derive(Default)]
struct Timers {
    health: TimerHandle,
    memory: TimerHandle,
    ui: TimerHandle,
    grace: TimerHandle,
    escalation: TimerHandle,
    signals: TimerHandle,
}

impl HealthSupervisor {
    pub fn new(config: HealthConfig, adapters: &Adapters) -> Self {
        let thresholds = config.thresholds();
        let state = State {
            status: HealthStatus::Initializing,
            score: 100.0,
            counters: HealthCounters::default(),
            last_error: None,
            memory: BoundedHistory::new(DEFAULT_HISTORY_CAPACITY),
            performance: BoundedHistory::new(DEFAULT_HISTORY_CAPACITY),
            errors: BoundedHistory::new(DEFAULT_HISTORY_CAPACITY),
            monitor: HealthMonitor::new(thresholds),
            tracker: PerformanceTracker::new(),
            hooks: RecoveryHooks::new(),
            recovery: RecoveryStats::default(),
            recovering: false,
            memory_recovery_pending: false,
            started: false,
            destroyed: false,
            timers: Timers::default(),
        };

        Self {
            inner: Arc::new(Inner {
                config,
                host: adapters.host.clone(),
                notifier: adapters.notifier.clone(),
                sampler: adapters.sampler.clone(),
                signals: adapters.signals.clone(),
                clock: adapters.clock.clone(),
                started_at: Instant::now(),
                start_time_ms: adapters.clock.now_ms(),
                state: Mutex::new(state),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Start the cadences and the runtime signal listener. Idempotent.
    pub fn start(&self) {
        let config = &self.inner.config;
        let weak = Arc::downgrade(&self.inner);

        let mut state = lock(&self.inner.state);
        if state.started || state.destroyed {
            return;
        }
        state.started = true;

        let w = weak.clone();
        state.timers.health = timer::set_interval(
            Duration::from_millis(config.health_check_interval_ms),
            move || {
                if let Some(supervisor) = Self::from_weak(&w) {
                    supervisor.check_health();
                }
            },
        );

        let w = weak.clone();
        state.timers.memory = timer::spawn_every(
            Duration::from_millis(config.memory_check_interval_ms),
            move || {
                let supervisor = Self::from_weak(&w);
                async move {
                    if let Some(supervisor) = supervisor {
                        supervisor.check_memory().await;
                    }
                }
            },
        );

        let w = weak.clone();
        state.timers.ui = timer::set_interval(
            Duration::from_millis(config.ui_update_interval_ms),
            move || {
                if let Some(supervisor) = Self::from_weak(&w) {
                    supervisor.update_ui();
                }
            },
        );

        let mut signals = self.inner.signals.subscribe();
        state.timers.signals = TimerHandle::from_task(tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(signal) => match Self::from_weak(&weak) {
                        Some(supervisor) => supervisor.handle_signal(signal),
                        None => break,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        if let Some(supervisor) = Self::from_weak(&weak) {
                            supervisor.record_fault(
                                FaultKind::PerformanceCheck,
                                format!("{} runtime signals dropped", skipped),
                                SOURCE,
                            );
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        drop(state);

        info!(
            "🩺 Health supervisor started | checks every {}ms | memory threshold {}% | auto-recover {}",
            config.health_check_interval_ms, config.memory_threshold_percent, config.auto_recover
        );
    }

    pub fn config(&self) -> &HealthConfig {
        &self.inner.config
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.inner.state).destroyed
    }

    pub fn status(&self) -> HealthStatus {
        lock(&self.inner.state).status
    }

    pub fn counters(&self) -> HealthCounters {
        lock(&self.inner.state).counters
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Whether a full reload has been requested, and why
    pub fn reload_requested(&self) -> Option<ReloadReason> {
        lock(&self.inner.state).recovery.reload_requested
    }

    // ───────────────────────────────────────────────────────────────────────
    // Fault intake
    // ───────────────────────────────────────────────────────────────────────

    /// Record a fault from any component. Ignored after teardown.
    pub fn record_fault(&self, kind: FaultKind, message: impl Into<String>, source: &str) {
        let event = FaultEvent::new(kind, message, source, self.inner.clock.now_ms());
        let severity = event.severity;

        let escalate = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            match (severity, kind) {
                (FaultSeverity::System, FaultKind::MemoryWarning) => {}
                (FaultSeverity::System, FaultKind::Performance) => {
                    state.counters.slow_operations += 1;
                }
                (FaultSeverity::System, _) => state.counters.system_errors += 1,
                (FaultSeverity::Network, _) => {
                    state.counters.network_errors += 1;
                    state.counters.network_streak += 1;
                }
                (FaultSeverity::Info, _) => {}
            }
            if severity != FaultSeverity::Info {
                state.last_error = Some(event.clone());
            }
            state.errors.push(event.clone());
            kind == FaultKind::IframeMaxRetries && self.inner.config.auto_recover
        };

        match severity {
            FaultSeverity::System => error!(kind = %kind, source, "{}", event.message),
            FaultSeverity::Network => warn!(kind = %kind, source, "{}", event.message),
            FaultSeverity::Info => info!(kind = %kind, source, "{}", event.message),
        }
        if severity != FaultSeverity::Info {
            self.inner.notifier.show_error(kind.as_str(), &event.message);
        }
        if escalate {
            self.schedule_escalation();
        }
    }

    /// Record a fault given as a free-form tag; unknown tags are rejected
    pub fn record_fault_tag(
        &self,
        tag: &str,
        message: impl Into<String>,
        source: &str,
    ) -> Result<FaultKind> {
        let kind: FaultKind = tag.parse()?;
        self.record_fault(kind, message, source);
        Ok(kind)
    }

    /// Count one successful refresh and end the current network streak
    pub fn record_refresh(&self) {
        let mut state = lock(&self.inner.state);
        if !state.destroyed {
            state.counters.refresh += 1;
            state.counters.network_streak = 0;
        }
    }

    fn handle_signal(&self, signal: RuntimeSignal) {
        match signal {
            RuntimeSignal::UncaughtError { message, source } => {
                let source = source.unwrap_or_else(|| "runtime".to_string());
                self.record_fault(FaultKind::Javascript, message, &source);
            }
            RuntimeSignal::UnhandledRejection { reason } => {
                self.record_fault(FaultKind::UnhandledPromise, reason, "runtime");
            }
            RuntimeSignal::ResourceFailure { element, url } => {
                self.record_fault(
                    FaultKind::Resource,
                    format!("failed to load <{}> {}", element, url),
                    "runtime",
                );
            }
            performance => self.track_performance(&performance),
        }
    }

    fn track_performance(&self, signal: &RuntimeSignal) {
        if !self.inner.config.performance_monitoring || !self.inner.signals.supports_performance() {
            return;
        }
        let now = self.inner.clock.now_ms();
        let slow = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            match state.tracker.observe(signal, now) {
                Some(observation) => {
                    state.performance.push(observation.entry);
                    observation.slow
                }
                None => None,
            }
        };
        if let Some(message) = slow {
            self.record_fault(FaultKind::Performance, message, "performance-monitor");
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Cadences
    // ───────────────────────────────────────────────────────────────────────

    /// Score the counters, update the status and act on it.
    ///
    /// Returns `None` after teardown.
    pub fn check_health(&self) -> Option<HealthAssessment> {
        let uptime = self.uptime();
        let (assessment, previous, busy) = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return None;
            }
            let performance = state.tracker.summary();
            debug!(
                long_tasks = performance.long_tasks,
                cls = performance.cumulative_layout_shift,
                lcp_ms = ?performance.last_lcp_ms,
                "performance re-scan"
            );
            let assessment = assess(&mut state, uptime);
            let previous = std::mem::replace(&mut state.status, assessment.status);
            state.score = assessment.score;
            let busy = state.recovering || state.memory_recovery_pending;
            (assessment, previous, busy)
        };

        if previous != assessment.status {
            match assessment.status {
                HealthStatus::Critical => {
                    let reasons: Vec<String> = assessment
                        .critical_reasons
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    error!(
                        "🚨 Health {} → critical (score {:.1}): {}",
                        previous,
                        assessment.score,
                        reasons.join(", ")
                    );
                }
                HealthStatus::Warning => {
                    warn!("Health {} → warning (score {:.1})", previous, assessment.score)
                }
                status => info!("Health {} → {} (score {:.1})", previous, status, assessment.score),
            }
        }

        if assessment.status == HealthStatus::Critical {
            if self.inner.config.auto_recover {
                self.attempt_recovery();
            } else {
                warn!("Health critical; auto-recovery disabled");
            }
        }

        if uptime >= Duration::from_millis(self.inner.config.preventive_reload_after_ms) {
            if busy {
                debug!("Preventive reload deferred while recovery is in progress");
            } else {
                self.request_reload(ReloadReason::Preventive);
            }
        }

        Some(assessment)
    }

    /// Sample memory and walk the warning ladder
    pub async fn check_memory(&self) {
        if self.is_destroyed() {
            return;
        }
        let at_ms = self.inner.clock.now_ms();
        let sample = match memory::sample(self.inner.sampler.as_ref(), at_ms).await {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                debug!("No memory API available; skipping memory check");
                return;
            }
            Err(e) => {
                self.record_fault(FaultKind::MemoryCheck, e.to_string(), SOURCE);
                return;
            }
        };

        let config = &self.inner.config;
        let usage = sample.usage_percent;
        let verdict = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            debug!(
                used_mb = sample.used_mb,
                limit_mb = sample.limit_mb,
                "Memory usage {:.1}%",
                usage
            );
            state.memory.push(sample);
            let verdict = memory::evaluate(
                usage,
                config.memory_threshold_percent,
                state.counters.memory_warnings,
                config.memory_warning_limit,
            );
            if let MemoryVerdict::Warning { warnings } | MemoryVerdict::Recover { warnings } =
                verdict
            {
                state.counters.memory_warnings = warnings;
            }
            verdict
        };

        match verdict {
            MemoryVerdict::Normal => {}
            MemoryVerdict::Warning { warnings } => self.record_fault(
                FaultKind::MemoryWarning,
                format!(
                    "memory usage {:.1}% above {}% ({}/{})",
                    usage, config.memory_threshold_percent, warnings, config.memory_warning_limit
                ),
                SOURCE,
            ),
            MemoryVerdict::Recover { warnings } => {
                warn!(
                    "Memory warnings ({}) exceeded limit ({}); starting memory recovery",
                    warnings, config.memory_warning_limit
                );
                self.recover_memory();
            }
        }
    }

    /// Push the current summary to the notifier
    pub fn update_ui(&self) {
        let summary = {
            let state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            let memory_pct = state.memory.latest().map(|m| m.usage_percent);
            self.snapshot(&state).summary(memory_pct)
        };
        self.inner.notifier.show_health(&summary);
    }

    // ───────────────────────────────────────────────────────────────────────
    // Recovery
    // ───────────────────────────────────────────────────────────────────────

    /// Register a cleanup callback for general recovery
    pub fn register_recovery_hook<F>(&self, name: &str, hook: F) -> RecoveryHookId
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock(&self.inner.state).hooks.register(name, Arc::new(hook))
    }

    pub fn unregister_recovery_hook(&self, id: RecoveryHookId) -> bool {
        lock(&self.inner.state).hooks.unregister(id)
    }

    fn attempt_recovery(&self) {
        let max = self.inner.config.max_recovery_attempts;
        let (attempt, hooks) = {
            let mut state = lock(&self.inner.state);
            if state.destroyed || state.recovering {
                return;
            }
            if state.counters.recovery_attempts >= max {
                warn!("Recovery budget exhausted ({} attempts)", max);
                return;
            }
            state.counters.recovery_attempts += 1;
            state.recovery.general_recoveries += 1;
            state.recovering = true;
            (state.counters.recovery_attempts, state.hooks.snapshot())
        };

        info!("🔧 Recovery attempt {}/{}", attempt, max);
        for (name, hook) in hooks {
            debug!("Running recovery hook '{}'", name);
            hook();
        }

        let uptime = self.uptime();
        let still_critical = {
            let mut state = lock(&self.inner.state);
            state.counters.system_errors /= 2;
            state.counters.memory_warnings = 0;
            state.counters.slow_operations = 0;
            state.memory.trim_to(RECOVERY_KEEP);
            state.performance.trim_to(RECOVERY_KEEP);
            state.errors.trim_to(RECOVERY_KEEP);
            state.tracker.reset_layout_shift();

            let assessment = assess(&mut state, uptime);
            state.status = assessment.status;
            state.score = assessment.score;
            state.recovering = false;
            assessment.status == HealthStatus::Critical
        };

        if still_critical {
            if attempt >= 2 {
                self.request_reload(ReloadReason::CriticalHealth);
            } else {
                warn!("Still critical after recovery attempt {}", attempt);
            }
        } else {
            info!("Recovery attempt {} succeeded", attempt);
        }
    }

    fn recover_memory(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.destroyed
                || state.memory_recovery_pending
                || state.recovery.reload_requested.is_some()
            {
                return;
            }
            state.memory_recovery_pending = true;
            state.recovery.memory_recoveries += 1;
            state.memory.trim_to(RECOVERY_KEEP);
            state.performance.trim_to(RECOVERY_KEEP);
            state.errors.trim_to(RECOVERY_KEEP);
        }

        let gc = self.inner.host.request_gc();
        info!(
            "🧹 Memory recovery: histories trimmed, GC hint {}",
            if gc { "accepted" } else { "unsupported" }
        );

        let weak = Arc::downgrade(&self.inner);
        let grace = Duration::from_millis(self.inner.config.memory_grace_period_ms);
        let confirm = timer::spawn_after(grace, async move {
            if let Some(supervisor) = Self::from_weak(&weak) {
                supervisor.confirm_memory_recovery().await;
            }
        });

        let mut state = lock(&self.inner.state);
        if gc {
            state.recovery.gc_hints_honoured += 1;
        }
        if !state.destroyed {
            state.timers.grace.replace(confirm);
        }
    }

    async fn confirm_memory_recovery(&self) {
        if self.is_destroyed() {
            return;
        }
        let resample = match memory::sample(self.inner.sampler.as_ref(), self.inner.clock.now_ms())
            .await
        {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Memory re-sample after grace failed: {}", e);
                None
            }
        };

        let config = &self.inner.config;
        let (reload, usage) = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            state.memory_recovery_pending = false;
            let usage = resample.as_ref().map(|s| s.usage_percent);
            if let Some(sample) = resample {
                state.memory.push(sample);
            }
            let reload = memory::needs_reload(
                usage,
                config.memory_threshold_percent,
                state.counters.memory_warnings,
                config.memory_warning_limit,
            );
            if !reload {
                state.counters.memory_warnings = 0;
            }
            (reload, usage)
        };

        if !reload {
            info!("Memory recovered ({:.1}%)", usage.unwrap_or_default());
        } else if config.auto_recover {
            self.request_reload(ReloadReason::MemoryPressure);
        } else {
            warn!("Memory still under pressure; auto-recovery disabled");
        }
    }

    fn schedule_escalation(&self) {
        let weak = Arc::downgrade(&self.inner);
        let delay = Duration::from_millis(self.inner.config.recovery_delay_ms);

        let mut state = lock(&self.inner.state);
        if state.destroyed || state.timers.escalation.is_active() {
            return;
        }
        warn!(
            "Display unreachable; reloading in {}ms",
            self.inner.config.recovery_delay_ms
        );
        state.timers.escalation = timer::spawn_after(delay, async move {
            if let Some(supervisor) = Self::from_weak(&weak) {
                supervisor.request_reload(ReloadReason::DisplayUnreachable);
            }
        });
    }

    /// Ask the host for a full reload. Only the first request goes through.
    pub fn request_reload(&self, reason: ReloadReason) -> bool {
        {
            let mut state = lock(&self.inner.state);
            if state.destroyed || state.recovery.reload_requested.is_some() {
                return false;
            }
            state.recovery.reload_requested = Some(reason);
        }
        warn!("🔄 Requesting full reload: {}", reason);
        self.inner.host.request_reload();
        true
    }

    // ───────────────────────────────────────────────────────────────────────
    // Reporting
    // ───────────────────────────────────────────────────────────────────────

    fn snapshot(&self, state: &State) -> HealthState {
        HealthState {
            start_time: self.inner.start_time_ms,
            uptime_ms: self.uptime().as_millis() as u64,
            status: state.status,
            score: state.score,
            counters: state.counters,
            last_error: state.last_error.clone(),
        }
    }

    pub fn state(&self) -> HealthState {
        let state = lock(&self.inner.state);
        self.snapshot(&state)
    }

    pub fn report(&self) -> HealthReport {
        let state = lock(&self.inner.state);
        HealthReport {
            state: self.snapshot(&state),
            memory: state.memory.to_vec(),
            performance: state.performance.to_vec(),
            performance_summary: state.tracker.summary(),
            recent_faults: state.errors.to_vec(),
            histories: HistorySizes {
                memory: state.memory.stats(),
                performance: state.performance.stats(),
                errors: state.errors.stats(),
            },
            recovery: state.recovery.clone(),
        }
    }

    /// Stop every cadence and listener. After this the supervisor records
    /// nothing and schedules nothing.
    pub fn teardown(&self) {
        let timers = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.hooks.clear();
            std::mem::take(&mut state.timers)
        };
        drop(timers);
        info!("Health supervisor torn down");
    }
}

fn assess(state: &mut State, uptime: Duration) -> HealthAssessment {
    let sample = HealthSample {
        counters: state.counters,
        uptime,
        memory_usage_pct: state.memory.latest().map(|m| m.usage_percent),
    };
    state.monitor.assess(&sample)
}

impl std::fmt::Debug for HealthSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("HealthSupervisor")
            .field("status", &state.status)
            .field("score", &state.score)
            .field("counters", &state.counters)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::MockEnvironment;

    fn supervisor(env: &MockEnvironment) -> HealthSupervisor {
        HealthSupervisor::new(HealthConfig::default(), &env.adapters())
    }

    #[tokio::test]
    async fn test_network_faults_cap_at_warning() {
        let env = MockEnvironment::new();
        let sup = supervisor(&env);
        for _ in 0..100 {
            sup.record_fault(FaultKind::RefreshService, "HTTP 500", "refresh");
        }
        let assessment = sup.check_health().unwrap();
        assert_eq!(assessment.status, HealthStatus::Warning);
        assert_eq!(assessment.score, 90.0);
        assert!(assessment.critical_reasons.is_empty());
        assert_eq!(sup.counters().network_errors, 100);
        assert_eq!(env.host.reload_requests(), 0);
    }

    #[tokio::test]
    async fn test_successful_refresh_clears_network_warning() {
        let env = MockEnvironment::new();
        let sup = supervisor(&env);
        for _ in 0..4 {
            sup.record_fault(FaultKind::FetchError, "reset", "refresh");
        }
        assert_eq!(sup.check_health().unwrap().status, HealthStatus::Healthy);

        sup.record_fault(FaultKind::NetworkTimeout, "no response", "refresh");
        assert_eq!(sup.check_health().unwrap().status, HealthStatus::Warning);

        sup.record_refresh();
        assert_eq!(sup.counters().network_streak, 0);
        assert_eq!(sup.counters().network_errors, 5);
        assert_eq!(sup.check_health().unwrap().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_system_errors_reach_critical() {
        let env = MockEnvironment::new();
        let config = HealthConfig {
            auto_recover: false,
            ..HealthConfig::default()
        };
        let sup = HealthSupervisor::new(config, &env.adapters());
        for i in 0..10 {
            sup.record_fault(FaultKind::Javascript, format!("boom {}", i), "runtime");
        }
        assert_eq!(sup.check_health().unwrap().status, HealthStatus::Critical);
        assert_eq!(sup.status(), HealthStatus::Critical);
        assert_eq!(env.host.reload_requests(), 0);
    }

    #[tokio::test]
    async fn test_fault_severity_routing() {
        let env = MockEnvironment::new();
        let sup = supervisor(&env);
        sup.record_fault(FaultKind::IframeAccessDenied, "cross-origin", "scale");
        sup.record_fault(FaultKind::Performance, "slow paint", "scale");
        sup.record_fault(FaultKind::MemoryWarning, "high", SOURCE);
        sup.record_fault(FaultKind::Resource, "img failed", "runtime");

        let counters = sup.counters();
        assert_eq!(counters.system_errors, 1);
        assert_eq!(counters.slow_operations, 1);
        assert_eq!(counters.memory_warnings, 0);
        assert_eq!(counters.network_errors, 0);
        assert_eq!(env.notifier.errors_of("iframe_access_denied"), 0);
        assert_eq!(env.notifier.errors_of("resource"), 1);
        assert_eq!(sup.report().recent_faults.len(), 4);
        assert_eq!(sup.state().last_error.unwrap().kind, FaultKind::Resource);
    }

    #[tokio::test]
    async fn test_unknown_tag_rejected_at_boundary() {
        let env = MockEnvironment::new();
        let sup = supervisor(&env);
        assert!(sup.record_fault_tag("gremlins", "?", "shell").is_err());
        assert_eq!(
            sup.record_fault_tag("fetch_error", "reset", "shell").unwrap(),
            FaultKind::FetchError
        );
        assert_eq!(sup.counters().network_errors, 1);
        assert_eq!(sup.report().recent_faults.len(), 1);
    }

    #[tokio::test]
    async fn test_error_history_bounded() {
        let env = MockEnvironment::new();
        let sup = supervisor(&env);
        for i in 0..120 {
            sup.record_fault(FaultKind::FetchError, format!("#{}", i), "refresh");
        }
        let report = sup.report();
        assert_eq!(report.recent_faults.len(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(report.recent_faults[0].message, "#70");
        assert_eq!(report.histories.errors.total_dropped, 70);
    }

    #[tokio::test]
    async fn test_recovery_halves_errors_and_runs_hooks() {
        let env = MockEnvironment::new();
        let sup = supervisor(&env);
        let runs = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let r = runs.clone();
        sup.register_recovery_hook("cache", move || {
            r.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        for _ in 0..12 {
            sup.record_fault(FaultKind::Javascript, "boom", "runtime");
        }
        sup.check_health();

        let counters = sup.counters();
        assert_eq!(counters.system_errors, 6);
        assert_eq!(counters.recovery_attempts, 1);
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(sup.status(), HealthStatus::Warning);
        assert_eq!(env.host.reload_requests(), 0);
    }

    #[tokio::test]
    async fn test_second_recovery_still_critical_reloads() {
        let env = MockEnvironment::new();
        let sup = supervisor(&env);

        for _ in 0..40 {
            sup.record_fault(FaultKind::Javascript, "boom", "runtime");
        }
        sup.check_health();
        // 40 -> 20: still critical after the first attempt, no reload yet
        assert_eq!(env.host.reload_requests(), 0);
        assert_eq!(sup.status(), HealthStatus::Critical);

        sup.check_health();
        // 20 -> 10: still critical on the second attempt
        assert_eq!(env.host.reload_requests(), 1);
        assert_eq!(sup.reload_requested(), Some(ReloadReason::CriticalHealth));
        assert_eq!(sup.counters().recovery_attempts, 2);
    }

    #[tokio::test]
    async fn test_recovery_budget() {
        let env = MockEnvironment::new();
        let sup = supervisor(&env);
        for _ in 0..5 {
            for _ in 0..30 {
                sup.record_fault(FaultKind::Javascript, "boom", "runtime");
            }
            sup.check_health();
        }
        assert_eq!(sup.counters().recovery_attempts, 3);
        assert_eq!(env.host.reload_requests(), 1);
    }

    #[tokio::test]
    async fn test_teardown_silences_supervisor() {
        let env = MockEnvironment::new();
        let sup = supervisor(&env);
        sup.start();
        sup.teardown();

        sup.record_fault(FaultKind::Javascript, "late", "runtime");
        sup.record_refresh();
        sup.update_ui();
        assert!(sup.check_health().is_none());
        assert_eq!(sup.counters(), HealthCounters::default());
        assert!(env.notifier.notices().is_empty());
        assert!(!sup.request_reload(ReloadReason::Preventive));
    }
}
