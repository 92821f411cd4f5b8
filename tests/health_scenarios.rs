/*!
 * Health supervisor scenarios
 *
 * Covers the memory warning ladder up to a reload, critical detection and
 * recovery, runtime signal intake and the bounded histories.
 */

use kiosk::config::{HealthConfig, KioskConfig};
use kiosk::health::{FaultKind, HealthSupervisor, ReloadReason};
use kiosk::system::mock::MockEnvironment;
use kiosk_core_interface::RuntimeSignal;
use kiosk_core_resilience::HealthStatus;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

async fn advance(by: Duration) {
    tokio::time::advance(by).await;
    settle().await;
}

fn supervisor(env: &MockEnvironment, config: HealthConfig) -> HealthSupervisor {
    let supervisor = HealthSupervisor::new(config, &env.adapters());
    supervisor.start();
    supervisor
}

#[tokio::test(start_paused = true)]
async fn test_memory_pressure_escalates_to_reload() {
    let env = MockEnvironment::new();
    env.sampler.push_usage([42.0, 45.0, 50.0, 60.0]);
    let supervisor = supervisor(&env, KioskConfig::default().health);
    settle().await;

    for _ in 0..3 {
        advance(Duration::from_secs(30)).await;
    }
    assert_eq!(env.notifier.errors_of("memory_warning"), 3);
    assert_eq!(supervisor.counters().memory_warnings, 3);
    assert_eq!(env.host.gc_requests(), 0);

    // Fourth reading crosses the warning limit
    advance(Duration::from_secs(30)).await;
    assert_eq!(env.notifier.errors_of("memory_warning"), 3);
    assert_eq!(env.host.gc_requests(), 1);
    assert_eq!(supervisor.report().recovery.memory_recoveries, 1);
    assert_eq!(env.host.reload_requests(), 0);

    // Re-sample after the grace period still reads 60%
    advance(Duration::from_secs(10)).await;
    assert_eq!(env.host.reload_requests(), 1);
    assert_eq!(supervisor.reload_requested(), Some(ReloadReason::MemoryPressure));

    // Nothing escalates twice
    for _ in 0..4 {
        advance(Duration::from_secs(30)).await;
    }
    assert_eq!(env.host.reload_requests(), 1);
    assert_eq!(supervisor.report().recovery.memory_recoveries, 1);

    supervisor.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_memory_recovers_within_grace() {
    let env = MockEnvironment::new();
    env.sampler.push_usage([42.0, 45.0, 50.0, 60.0, 20.0]);
    let supervisor = supervisor(&env, KioskConfig::default().health);
    settle().await;

    for _ in 0..4 {
        advance(Duration::from_secs(30)).await;
    }
    advance(Duration::from_secs(10)).await;

    assert_eq!(env.host.gc_requests(), 1);
    assert_eq!(env.host.reload_requests(), 0);
    assert_eq!(supervisor.counters().memory_warnings, 0);
    supervisor.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_network_faults_never_critical() {
    let env = MockEnvironment::new();
    let supervisor = supervisor(&env, KioskConfig::default().health);

    for _ in 0..500 {
        supervisor.record_fault(FaultKind::FetchError, "connection refused", "test");
    }
    let assessment = supervisor.check_health().unwrap();
    assert_eq!(assessment.score, 90.0);
    assert_eq!(assessment.status, HealthStatus::Warning);
    assert!(assessment.critical_reasons.is_empty());
    assert_eq!(env.host.reload_requests(), 0);
    assert_eq!(supervisor.counters().network_errors, 500);
    supervisor.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_system_errors_at_threshold_are_critical() {
    let env = MockEnvironment::new();
    let config = HealthConfig {
        auto_recover: false,
        ..KioskConfig::default().health
    };
    let supervisor = supervisor(&env, config);

    for i in 0..10 {
        supervisor.record_fault(FaultKind::Javascript, format!("TypeError #{}", i), "test");
    }
    let assessment = supervisor.check_health().unwrap();
    assert_eq!(assessment.status, HealthStatus::Critical);
    assert_eq!(assessment.score, 50.0);
    assert_eq!(supervisor.counters().recovery_attempts, 0);
    assert_eq!(env.host.reload_requests(), 0);
    supervisor.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_recovery_runs_hooks_and_reloads_on_second_attempt() {
    let env = MockEnvironment::new();
    let supervisor = supervisor(&env, KioskConfig::default().health);
    let hook_runs = Arc::new(AtomicU32::new(0));
    let runs = hook_runs.clone();
    supervisor.register_recovery_hook("count", move || {
        runs.fetch_add(1, Ordering::SeqCst);
    });

    // 40 system errors: halving once leaves 20, still critical
    for _ in 0..40 {
        supervisor.record_fault(FaultKind::Resource, "image failed", "test");
    }
    supervisor.check_health();
    assert_eq!(hook_runs.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.counters().system_errors, 20);
    assert_eq!(env.host.reload_requests(), 0);

    supervisor.check_health();
    assert_eq!(hook_runs.load(Ordering::SeqCst), 2);
    assert_eq!(supervisor.counters().system_errors, 10);
    assert_eq!(env.host.reload_requests(), 1);
    assert_eq!(supervisor.reload_requested(), Some(ReloadReason::CriticalHealth));
    supervisor.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_recovery_budget_is_capped() {
    let env = MockEnvironment::new();
    let supervisor = supervisor(&env, KioskConfig::default().health);

    for _ in 0..1_000 {
        supervisor.record_fault(FaultKind::Javascript, "boom", "test");
    }
    for _ in 0..6 {
        supervisor.check_health();
    }
    assert_eq!(supervisor.counters().recovery_attempts, 3);
    assert_eq!(env.host.reload_requests(), 1);
    supervisor.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_runtime_signals_are_classified() {
    let env = MockEnvironment::new();
    let supervisor = supervisor(&env, KioskConfig::default().health);
    settle().await;

    env.signals.emit(RuntimeSignal::UncaughtError {
        message: "x is undefined".into(),
        source: Some("app.js".into()),
    });
    env.signals.emit(RuntimeSignal::UnhandledRejection {
        reason: "timeout".into(),
    });
    env.signals.emit(RuntimeSignal::ResourceFailure {
        element: "img".into(),
        url: "https://cdn.example.org/a.png".into(),
    });
    env.signals.emit(RuntimeSignal::LongTask { duration_ms: 250.0 });
    env.signals.emit(RuntimeSignal::LargestContentfulPaint {
        render_time_ms: 45_000.0,
    });
    settle().await;

    let counters = supervisor.counters();
    assert_eq!(counters.system_errors, 3);
    assert_eq!(counters.slow_operations, 1);
    assert_eq!(env.notifier.errors_of("javascript"), 1);
    assert_eq!(env.notifier.errors_of("unhandled_promise"), 1);
    assert_eq!(env.notifier.errors_of("resource"), 1);

    let report = supervisor.report();
    assert_eq!(report.performance.len(), 1);
    assert_eq!(report.performance_summary.discarded, 1);
    supervisor.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_histories_stay_bounded() {
    let env = MockEnvironment::new();
    env.sampler.push_usage([10.0]);
    let supervisor = supervisor(&env, KioskConfig::default().health);

    for i in 0..120 {
        supervisor.record_fault(FaultKind::ScaleMeasureError, format!("#{}", i), "test");
    }
    for _ in 0..60 {
        advance(Duration::from_secs(30)).await;
    }

    let report = supervisor.report();
    assert_eq!(report.recent_faults.len(), 50);
    assert_eq!(report.recent_faults.last().unwrap().message, "#119");
    assert_eq!(report.histories.errors.total_received, 120);
    assert_eq!(report.memory.len(), 50);
    assert!(report.to_json().unwrap().contains("\"recentFaults\""));
    supervisor.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_unknown_fault_tag_rejected() {
    let env = MockEnvironment::new();
    let supervisor = supervisor(&env, KioskConfig::default().health);

    assert_eq!(
        supervisor
            .record_fault_tag("network_timeout", "slow", "test")
            .unwrap(),
        FaultKind::NetworkTimeout
    );
    assert!(supervisor.record_fault_tag("cosmic_ray", "?", "test").is_err());
    assert_eq!(supervisor.counters().network_errors, 1);
    assert_eq!(supervisor.counters().system_errors, 0);
    supervisor.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_max_retries_escalates_after_delay() {
    let env = MockEnvironment::new();
    let supervisor = supervisor(&env, KioskConfig::default().health);

    supervisor.record_fault(FaultKind::IframeMaxRetries, "3 load retries exhausted", "test");
    advance(Duration::from_secs(59)).await;
    assert_eq!(env.host.reload_requests(), 0);
    advance(Duration::from_secs(1)).await;
    assert_eq!(env.host.reload_requests(), 1);
    assert_eq!(supervisor.reload_requested(), Some(ReloadReason::DisplayUnreachable));
    supervisor.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_ui_update_pushes_summary() {
    let env = MockEnvironment::new();
    let supervisor = supervisor(&env, KioskConfig::default().health);
    supervisor.record_fault(FaultKind::IframeError, "net::ERR_FAILED", "test");

    advance(Duration::from_secs(30)).await;
    advance(Duration::from_secs(30)).await;
    let summary = env.notifier.last_health().unwrap();
    assert_eq!(summary.network_errors, 1);
    assert_eq!(summary.status, HealthStatus::Healthy);
    supervisor.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_teardown_stops_cadences() {
    let env = MockEnvironment::new();
    env.sampler.push_usage([10.0]);
    let supervisor = supervisor(&env, KioskConfig::default().health);
    advance(Duration::from_secs(30)).await;
    let samples = env.sampler.sample_count();
    let notices = env.notifier.notices().len();

    supervisor.teardown();
    supervisor.record_fault(FaultKind::Javascript, "late", "test");
    advance(Duration::from_secs(600)).await;

    assert_eq!(env.sampler.sample_count(), samples);
    assert_eq!(env.notifier.notices().len(), notices);
    assert_eq!(supervisor.counters().system_errors, 0);
    assert!(supervisor.check_health().is_none());
}
