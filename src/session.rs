/*!
 * Display session: one display mounted into the embedded host
 *
 * The session owns the scale and refresh engines for its display and
 * supervises the embedded document's load. A load that errors or times out
 * is retried by navigating to `about:blank` and back, up to a fixed number
 * of attempts, after which the supervisor is told and the session stops
 * retrying.
 */

use kiosk_core_interface::{Host, HostEvent};
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::config::{DisplayDescriptor, SessionConfig};
use crate::error::{KioskError, Result};
use crate::health::{FaultKind, HealthSupervisor, RecoveryHookId};
use crate::refresh::{RefreshEngine, RefreshStats};
use crate::scale::{ScaleEngine, ScaleInfo};
use crate::system::{lock, Adapters};
use crate::timer::{self, TimerHandle};

pub use kiosk_core_interface::BLANK_URL;

const SOURCE: &str = "display-session";

#[derive(Clone)]
pub struct DisplaySession {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    host: Arc<dyn Host>,
    supervisor: Option<HealthSupervisor>,
    scale: ScaleEngine,
    refresh: RefreshEngine,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    mounted: bool,
    destroyed: bool,
    loaded: bool,
    on_blank: bool,
    gave_up: bool,
    retry_count: u32,
    loads: u64,
    recovery_hook: Option<RecoveryHookId>,
    load_timeout: TimerHandle,
    retry: TimerHandle,
    listener: TimerHandle,
}

/// Diagnostics snapshot of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub slug: String,
    pub name: String,
    pub source_url: String,
    pub loaded: bool,
    pub retry_count: u32,
    pub gave_up: bool,
    pub loads: u64,
    pub refresh: RefreshStats,
    pub scale: ScaleInfo,
}

impl DisplaySession {
    /// Create the session and its engines. Nothing runs until [`mount`].
    ///
    /// [`mount`]: DisplaySession::mount
    pub fn new(config: SessionConfig, adapters: &Adapters, supervisor: Option<HealthSupervisor>) -> Self {
        let scale = ScaleEngine::new(config.scale.clone(), adapters.host.clone(), supervisor.clone());
        let refresh = RefreshEngine::new(&config, adapters, supervisor.clone());
        Self {
            inner: Arc::new(Inner {
                host: adapters.host.clone(),
                supervisor,
                scale,
                refresh,
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Load the display, start watching its load and start refreshing.
    /// Idempotent.
    pub fn mount(&self) -> Result<()> {
        let descriptor = &self.inner.config.display;
        {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return Err(KioskError::TornDown("display session"));
            }
            if state.mounted {
                return Ok(());
            }
            state.mounted = true;
        }
        info!("🖥️  Mounting display '{}' ({})", descriptor.name, descriptor.source_url);

        self.inner.scale.init();
        let listener = self.spawn_listener();
        let hook = self.inner.supervisor.as_ref().map(|supervisor| {
            supervisor.register_recovery_hook("scale-cache", self.inner.scale.cache_reset_hook())
        });
        {
            let mut state = lock(&self.inner.state);
            state.listener = listener;
            state.recovery_hook = hook;
        }

        let weak = Arc::downgrade(&self.inner);
        self.inner.refresh.set_navigator(Arc::new(move |url: &str| {
            if let Some(session) = Self::from_weak(&weak) {
                session.navigate(url);
            }
        }));
        self.navigate_to_source();
        self.inner.refresh.start();
        Ok(())
    }

    fn spawn_listener(&self) -> TimerHandle {
        let mut events = self.inner.host.subscribe();
        let weak = Arc::downgrade(&self.inner);
        TimerHandle::from_task(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                let Some(session) = Self::from_weak(&weak) else {
                    break;
                };
                match event {
                    HostEvent::Load(url) => session.on_loaded(&url),
                    HostEvent::Error(message) => {
                        session.on_load_failure(FaultKind::IframeError, message)
                    }
                    HostEvent::Resize(_) => {}
                }
            }
        }))
    }

    fn navigate_to_source(&self) {
        self.navigate(&self.inner.config.display.source_url);
    }

    /// Navigate the embedded document and arm the load timeout
    fn navigate(&self, url: &str) {
        let timeout = Duration::from_millis(self.inner.config.timings.load_timeout_duration_ms);
        let weak = Arc::downgrade(&self.inner);
        {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            state.on_blank = false;
            state.loaded = false;
            state.load_timeout = timer::set_timeout(timeout, move || {
                if let Some(session) = Self::from_weak(&weak) {
                    session.on_load_failure(
                        FaultKind::IframeLoadTimeout,
                        format!("no load event within {}ms", timeout.as_millis()),
                    );
                }
            });
        }
        self.inner.host.load_embedded_document(url);
    }

    fn on_loaded(&self, url: &str) {
        if url == BLANK_URL {
            debug!("Blank page loaded for '{}'", self.inner.config.display.slug);
            return;
        }
        let mut state = lock(&self.inner.state);
        if state.destroyed || state.on_blank {
            return;
        }
        state.load_timeout.clear();
        state.loaded = true;
        state.loads += 1;
        if state.retry_count > 0 {
            info!(
                "Display '{}' loaded after {} retries",
                self.inner.config.display.slug, state.retry_count
            );
        }
        state.retry_count = 0;
        state.gave_up = false;
    }

    fn on_load_failure(&self, kind: FaultKind, message: String) {
        let max = self.inner.config.timings.max_retry_attempts;
        let give_up = {
            let mut state = lock(&self.inner.state);
            if state.destroyed || state.on_blank || state.gave_up {
                return;
            }
            state.load_timeout.clear();
            state.loaded = false;
            if state.retry_count >= max {
                state.gave_up = true;
                true
            } else {
                state.retry_count += 1;
                false
            }
        };
        self.record_fault(kind, message);

        if give_up {
            warn!(
                "Display '{}' failed to load after {} retries; giving up",
                self.inner.config.display.slug, max
            );
            self.record_fault(
                FaultKind::IframeMaxRetries,
                format!("{} load retries exhausted", max),
            );
            return;
        }
        self.schedule_retry();
    }

    /// Wait, blank the document, then navigate back to the display
    fn schedule_retry(&self) {
        let timings = &self.inner.config.timings;
        let delay = Duration::from_millis(timings.error_retry_delay_ms);
        let blank_delay = Duration::from_millis(timings.blank_navigation_delay_ms);
        let weak = Arc::downgrade(&self.inner);

        let mut state = lock(&self.inner.state);
        if state.destroyed {
            return;
        }
        debug!(
            "Retrying display '{}' in {}ms (attempt {})",
            self.inner.config.display.slug,
            delay.as_millis(),
            state.retry_count
        );
        state.retry = timer::spawn_after(delay, async move {
            {
                let Some(session) = Self::from_weak(&weak) else {
                    return;
                };
                {
                    let mut state = lock(&session.inner.state);
                    if state.destroyed {
                        return;
                    }
                    state.on_blank = true;
                }
                session.inner.host.load_embedded_document(BLANK_URL);
            }
            tokio::time::sleep(blank_delay).await;
            if let Some(session) = Self::from_weak(&weak) {
                session.navigate_to_source();
            }
        });
    }

    fn record_fault(&self, kind: FaultKind, message: String) {
        match &self.inner.supervisor {
            Some(supervisor) => supervisor.record_fault(kind, message, SOURCE),
            None => warn!(kind = %kind, "{}", message),
        }
    }

    /// Check the display for changes right now
    pub async fn force_refresh(&self) -> Result<()> {
        self.inner.refresh.force_refresh().await
    }

    /// Cancel timers, stop both engines in reverse creation order and
    /// detach from the host
    pub async fn teardown(&self) {
        let hook = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.load_timeout.clear();
            state.retry.clear();
            state.listener.clear();
            state.recovery_hook.take()
        };
        if let (Some(supervisor), Some(hook)) = (&self.inner.supervisor, hook) {
            supervisor.unregister_recovery_hook(hook);
        }

        self.inner.refresh.teardown().await;
        self.inner.scale.teardown();
        info!("Display '{}' unmounted", self.inner.config.display.slug);
    }

    pub fn display(&self) -> &DisplayDescriptor {
        &self.inner.config.display
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn refresh(&self) -> &RefreshEngine {
        &self.inner.refresh
    }

    pub fn scale(&self) -> &ScaleEngine {
        &self.inner.scale
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.inner.state).loaded
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.inner.state).destroyed
    }

    pub fn retry_count(&self) -> u32 {
        lock(&self.inner.state).retry_count
    }

    pub fn info(&self) -> SessionInfo {
        let (loaded, retry_count, gave_up, loads) = {
            let state = lock(&self.inner.state);
            (state.loaded, state.retry_count, state.gave_up, state.loads)
        };
        let display = &self.inner.config.display;
        SessionInfo {
            slug: display.slug.clone(),
            name: display.name.clone(),
            source_url: display.source_url.clone(),
            loaded,
            retry_count,
            gave_up,
            loads,
            refresh: self.inner.refresh.stats(),
            scale: self.inner.scale.scale_info(),
        }
    }
}

impl std::fmt::Debug for DisplaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplaySession")
            .field("slug", &self.inner.config.display.slug)
            .finish()
    }
}
