/*!
 * Kiosk process owner
 *
 * Holds the configuration and adapters, installs the health supervisor on
 * the first mount and owns every mounted session. `unload()` tears sessions
 * down newest first and the supervisor last.
 */

use std::sync::Mutex;
use tracing::info;

use crate::config::{KioskConfig, SessionConfig};
use crate::error::{KioskError, Result};
use crate::health::{FaultKind, HealthSupervisor};
use crate::session::DisplaySession;
use crate::system::{lock, Adapters};

const SOURCE: &str = "kiosk-runtime";

pub struct KioskRuntime {
    config: KioskConfig,
    adapters: Adapters,
    inner: Mutex<RuntimeState>,
}

#[derive(Default)]
struct RuntimeState {
    supervisor: Option<HealthSupervisor>,
    sessions: Vec<DisplaySession>,
    unloaded: bool,
}

impl KioskRuntime {
    pub fn new(config: KioskConfig, adapters: Adapters) -> Self {
        Self {
            config,
            adapters,
            inner: Mutex::new(RuntimeState::default()),
        }
    }

    pub fn config(&self) -> &KioskConfig {
        &self.config
    }

    /// The process-wide supervisor, created and started on first use
    pub fn supervisor(&self) -> Result<HealthSupervisor> {
        let mut state = lock(&self.inner);
        if state.unloaded {
            return Err(KioskError::TornDown("kiosk runtime"));
        }
        if let Some(supervisor) = &state.supervisor {
            return Ok(supervisor.clone());
        }
        let supervisor = HealthSupervisor::new(self.config.health.clone(), &self.adapters);
        supervisor.start();
        info!("🩺 Health supervisor installed");
        state.supervisor = Some(supervisor.clone());
        Ok(supervisor)
    }

    /// Mount the display with this slug and return its session
    pub fn mount(&self, slug: &str) -> Result<DisplaySession> {
        let supervisor = self.supervisor()?;

        let Some(display) = self.config.display(slug) else {
            let message = format!("no display configured with slug '{}'", slug);
            supervisor.record_fault(FaultKind::DisplayManager, message.clone(), SOURCE);
            return Err(KioskError::InvalidDisplay(message));
        };

        let config = SessionConfig::resolve(&self.config, display).map_err(|e| {
            supervisor.record_fault(FaultKind::Initialization, e.to_string(), SOURCE);
            e
        })?;
        let monitored = config.monitoring_enabled.then(|| supervisor.clone());
        let session = DisplaySession::new(config, &self.adapters, monitored);

        if let Err(e) = session.mount() {
            supervisor.record_fault(FaultKind::Initialization, e.to_string(), SOURCE);
            return Err(e);
        }

        let mut state = lock(&self.inner);
        if state.unloaded {
            drop(state);
            return Err(KioskError::TornDown("kiosk runtime"));
        }
        state.sessions.push(session.clone());
        Ok(session)
    }

    /// Tear down every session for this slug. Returns how many were removed.
    pub async fn unmount(&self, slug: &str) -> usize {
        let removed: Vec<DisplaySession> = {
            let mut state = lock(&self.inner);
            let (removed, kept) = std::mem::take(&mut state.sessions)
                .into_iter()
                .partition(|session| session.display().slug == slug);
            state.sessions = kept;
            removed
        };
        for session in removed.iter().rev() {
            session.teardown().await;
        }
        removed.len()
    }

    pub fn sessions(&self) -> Vec<DisplaySession> {
        lock(&self.inner).sessions.clone()
    }

    /// Tear everything down in reverse order of creation. Idempotent.
    pub async fn unload(&self) {
        let (sessions, supervisor) = {
            let mut state = lock(&self.inner);
            if state.unloaded {
                return;
            }
            state.unloaded = true;
            (std::mem::take(&mut state.sessions), state.supervisor.take())
        };

        for session in sessions.iter().rev() {
            session.teardown().await;
        }
        if let Some(supervisor) = supervisor {
            supervisor.teardown();
        }
        info!("Kiosk runtime unloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DisplayDescriptor;
    use crate::system::mock::MockEnvironment;

    fn config() -> KioskConfig {
        KioskConfig {
            displays: vec![
                DisplayDescriptor::new("lobby", "Lobby", "https://example.org/lobby"),
                DisplayDescriptor::new("menu", "Menu", "https://example.org/menu"),
            ],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_shared_across_mounts() {
        let env = MockEnvironment::new();
        let runtime = KioskRuntime::new(config(), env.adapters());

        runtime.mount("lobby").unwrap();
        runtime.mount("menu").unwrap();
        assert_eq!(runtime.sessions().len(), 2);

        let supervisor = runtime.supervisor().unwrap();
        supervisor.record_refresh();
        assert_eq!(runtime.supervisor().unwrap().counters().refresh, 1);
        runtime.unload().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_slug_records_fault() {
        let env = MockEnvironment::new();
        let runtime = KioskRuntime::new(config(), env.adapters());

        let err = runtime.mount("nope").unwrap_err();
        assert!(matches!(err, KioskError::InvalidDisplay(_)));
        assert_eq!(env.notifier.errors_of("display_manager"), 1);
        assert_eq!(runtime.supervisor().unwrap().counters().system_errors, 1);
        runtime.unload().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_tears_down_everything() {
        let env = MockEnvironment::new();
        let runtime = KioskRuntime::new(config(), env.adapters());
        let lobby = runtime.mount("lobby").unwrap();
        let supervisor = runtime.supervisor().unwrap();

        runtime.unload().await;
        runtime.unload().await;

        assert!(lobby.is_destroyed());
        assert!(supervisor.is_destroyed());
        assert!(runtime.sessions().is_empty());
        assert!(matches!(runtime.mount("lobby"), Err(KioskError::TornDown(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_by_slug() {
        let env = MockEnvironment::new();
        let runtime = KioskRuntime::new(config(), env.adapters());
        let lobby = runtime.mount("lobby").unwrap();
        runtime.mount("menu").unwrap();

        assert_eq!(runtime.unmount("lobby").await, 1);
        assert!(lobby.is_destroyed());
        assert_eq!(runtime.sessions().len(), 1);
        runtime.unload().await;
    }
}
