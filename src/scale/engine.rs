/*!
 * Measure-and-fit controller for the embedded document
 *
 * The engine listens to host load and resize events, measures the document
 * once it has loaded, and applies a transform fitting it into the viewport.
 * Document size changes are picked up through a resize observer when the
 * document offers one, otherwise through DOM mutations gated by a hash of
 * the markup.
 */

use kiosk_core_interface::{
    EmbeddedDocument, Host, HostEvent, InterfaceError, Transform, Viewport, BLANK_URL,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::fit::{compute_scale, fit_transform, FitMode};
use super::measure::{content_size, STYLE_CSS, STYLE_ID};
use crate::config::ScaleConfig;
use crate::fingerprint::fnv1a;
use crate::health::{FaultKind, HealthSupervisor};
use crate::system::lock;
use crate::timer::{Debouncer, TimerHandle};

/// Lifetime of a cached document handle
pub const DOCUMENT_TTL: Duration = Duration::from_secs(1);

const SOURCE: &str = "scale";

#[derive(Clone)]
pub struct ScaleEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: ScaleConfig,
    host: Arc<dyn Host>,
    supervisor: Option<HealthSupervisor>,
    load: Debouncer,
    resize: Debouncer,
    mutation: Debouncer,
    state: Mutex<ScaleState>,
}

/// Everything the last apply depended on; equal keys skip the apply
#[derive(Debug, Clone, Copy, PartialEq)]
struct ApplyKey {
    content: (f64, f64),
    viewport: (f64, f64),
    scale: (f64, f64),
    content_hash: Option<u64>,
}

struct ScaleState {
    initialized: bool,
    ready: bool,
    destroyed: bool,
    fit_mode: FitMode,
    content_width: f64,
    content_height: f64,
    last_content_hash: Option<u64>,
    last_scale: Option<(f64, f64)>,
    last_applied: Option<ApplyKey>,
    last_transform: Option<Transform>,
    document: Option<(Arc<dyn EmbeddedDocument>, Instant)>,
    applies: u64,
    skipped: u64,
    listener: TimerHandle,
    observer: TimerHandle,
}

/// Diagnostics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleInfo {
    pub fit_mode: FitMode,
    pub ready: bool,
    pub destroyed: bool,
    pub content_width: f64,
    pub content_height: f64,
    pub viewport: Viewport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
    pub applies: u64,
    pub skipped_applies: u64,
}

impl ScaleEngine {
    pub fn new(config: ScaleConfig, host: Arc<dyn Host>, supervisor: Option<HealthSupervisor>) -> Self {
        let state = ScaleState {
            initialized: false,
            ready: false,
            destroyed: false,
            fit_mode: config.fit_mode,
            content_width: 0.0,
            content_height: 0.0,
            last_content_hash: None,
            last_scale: None,
            last_applied: None,
            last_transform: None,
            document: None,
            applies: 0,
            skipped: 0,
            listener: TimerHandle::idle(),
            observer: TimerHandle::idle(),
        };
        Self {
            inner: Arc::new(Inner {
                load: Debouncer::new(Duration::from_millis(config.load_delay_ms)),
                resize: Debouncer::new(Duration::from_millis(config.resize_debounce_ms)),
                mutation: Debouncer::new(Duration::from_millis(config.mutation_debounce_ms)),
                config,
                host,
                supervisor,
                state: Mutex::new(state),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Subscribe to host load and resize events. Idempotent.
    pub fn init(&self) {
        let mut events = self.inner.host.subscribe();
        let weak = Arc::downgrade(&self.inner);

        let mut state = lock(&self.inner.state);
        if state.initialized || state.destroyed {
            return;
        }
        state.initialized = true;
        state.listener = TimerHandle::from_task(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Scale listener lagged by {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(engine) = Self::from_weak(&weak) else {
                    break;
                };
                engine.on_host_event(event);
            }
        }));
        debug!("Scale engine initialised ({})", state.fit_mode);
    }

    fn on_host_event(&self, event: HostEvent) {
        match event {
            HostEvent::Load(url) => {
                {
                    let mut state = lock(&self.inner.state);
                    if state.destroyed {
                        return;
                    }
                    state.document = None;
                    state.ready = false;
                    state.observer.clear();
                }
                // The placeholder between retries is never measured
                if url == BLANK_URL {
                    self.inner.load.cancel();
                    debug!("Blank page loaded; waiting for the display");
                    return;
                }
                let weak = Arc::downgrade(&self.inner);
                self.inner.load.trigger(move || {
                    if let Some(engine) = Self::from_weak(&weak) {
                        engine.on_load();
                    }
                });
            }
            HostEvent::Resize(_) => {
                if !lock(&self.inner.state).ready {
                    return;
                }
                self.debounce_update(&self.inner.resize);
            }
            HostEvent::Error(_) => {}
        }
    }

    fn debounce_update(&self, debouncer: &Debouncer) {
        let weak = Arc::downgrade(&self.inner);
        debouncer.trigger(move || {
            if let Some(engine) = Self::from_weak(&weak) {
                engine.update();
            }
        });
    }

    /// Debounced load: open, style, observe, measure
    fn on_load(&self) {
        if self.is_destroyed() {
            return;
        }
        let document = match self.document() {
            Ok(document) => document,
            Err(e) => {
                self.access_denied(&e);
                return;
            }
        };

        if !document.has_element(STYLE_ID) {
            if let Err(e) = document.inject_style(STYLE_ID, STYLE_CSS) {
                warn!("Failed to inject scale stylesheet: {}", e);
            }
        }
        let observer = self.observe(document.as_ref());

        {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            state.observer = observer;
            state.ready = true;
            state.last_content_hash = None;
        }
        self.update();
    }

    /// Watch the document for size changes, preferring a resize observer
    fn observe(&self, document: &dyn EmbeddedDocument) -> TimerHandle {
        if let Some(rx) = document.observe_resize() {
            debug!("Watching content size with a resize observer");
            return self.spawn_observer(rx, false);
        }
        if let Some(rx) = document.observe_mutations() {
            debug!("No resize observer; falling back to mutations");
            return self.spawn_observer(rx, true);
        }
        debug!("Document offers no observers; only loads and resizes re-measure");
        TimerHandle::idle()
    }

    fn spawn_observer(&self, mut rx: broadcast::Receiver<()>, mutations: bool) -> TimerHandle {
        let weak = Arc::downgrade(&self.inner);
        TimerHandle::from_task(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                let Some(engine) = Self::from_weak(&weak) else {
                    break;
                };
                if engine.is_destroyed() {
                    break;
                }
                if mutations {
                    let weak = weak.clone();
                    engine.inner.mutation.trigger(move || {
                        if let Some(engine) = Self::from_weak(&weak) {
                            engine.on_mutation();
                        }
                    });
                } else {
                    engine.debounce_update(&engine.inner.resize);
                }
            }
        }))
    }

    /// Debounced mutation: re-measure only when the markup hash moved
    fn on_mutation(&self) {
        if self.is_destroyed() {
            return;
        }
        let markup = match self.document().and_then(|d| d.outer_markup()) {
            Ok(markup) => markup,
            Err(e) => {
                debug!("Mutation check skipped: {}", e);
                return;
            }
        };
        let hash = fnv1a(markup.as_bytes());
        {
            let mut state = lock(&self.inner.state);
            if state.last_content_hash == Some(hash) {
                return;
            }
            state.last_content_hash = Some(hash);
        }
        self.update();
    }

    /// Measure the document and apply the fitting transform
    fn update(&self) {
        if self.is_destroyed() {
            return;
        }
        let viewport = self.inner.host.viewport();
        let document = match self.document() {
            Ok(document) => document,
            Err(e) => {
                self.access_denied(&e);
                return;
            }
        };

        let measured = document
            .metrics()
            .map(|metrics| content_size(&metrics, self.inner.config.max_content_size_px));
        let (width, height) = match measured {
            Ok(Some(size)) => {
                if let Some((raw_w, raw_h)) = size.oversized {
                    self.record_fault(
                        FaultKind::Performance,
                        format!(
                            "content size {}x{} exceeds {}px; clamped",
                            raw_w, raw_h, self.inner.config.max_content_size_px
                        ),
                    );
                }
                (size.width, size.height)
            }
            Ok(None) => {
                self.record_fault(
                    FaultKind::ScaleMeasureError,
                    "document reports no positive size".to_string(),
                );
                (viewport.width, viewport.height)
            }
            Err(e) => {
                self.record_fault(FaultKind::ScaleMeasureError, e.to_string());
                (viewport.width, viewport.height)
            }
        };

        let transform = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            let scale = compute_scale(
                state.fit_mode,
                width,
                height,
                viewport,
                self.inner.config.min_scale,
                self.inner.config.max_scale,
            );
            let key = ApplyKey {
                content: (width, height),
                viewport: (viewport.width, viewport.height),
                scale,
                content_hash: state.last_content_hash,
            };
            state.content_width = width;
            state.content_height = height;
            if state.last_applied == Some(key) {
                state.skipped += 1;
                return;
            }

            let transform = fit_transform(width, height, viewport, scale, self.inner.config.center_content);
            state.last_applied = Some(key);
            state.last_scale = Some(scale);
            state.last_transform = Some(transform);
            state.applies += 1;
            transform
        };

        debug!("Applying {}", transform);
        self.inner.host.apply_transform(&transform);
    }

    /// Cached document handle, reopened after [`DOCUMENT_TTL`] or a load
    fn document(&self) -> std::result::Result<Arc<dyn EmbeddedDocument>, InterfaceError> {
        {
            let state = lock(&self.inner.state);
            if let Some((document, opened)) = &state.document {
                if opened.elapsed() < DOCUMENT_TTL {
                    return Ok(document.clone());
                }
            }
        }
        let document = self.inner.host.embedded_document()?;
        lock(&self.inner.state).document = Some((document.clone(), Instant::now()));
        Ok(document)
    }

    fn access_denied(&self, error: &InterfaceError) {
        warn!("Embedded document not accessible; scaling skipped: {}", error);
        self.record_fault(FaultKind::IframeAccessDenied, error.to_string());
    }

    fn record_fault(&self, kind: FaultKind, message: String) {
        match &self.inner.supervisor {
            Some(supervisor) => supervisor.record_fault(kind, message, SOURCE),
            None => debug!(kind = %kind, "{}", message),
        }
    }

    /// Drop caches and re-measure at the next debounced point
    pub fn force_update(&self) {
        let ready = {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            state.document = None;
            state.last_applied = None;
            state.ready
        };
        if ready {
            self.debounce_update(&self.inner.resize);
        }
    }

    /// Switch the fit mode and re-apply when a document is ready
    pub fn set_fit_mode(&self, mode: FitMode) {
        let ready = {
            let mut state = lock(&self.inner.state);
            if state.destroyed || state.fit_mode == mode {
                return;
            }
            info!("Fit mode {} -> {}", state.fit_mode, mode);
            state.fit_mode = mode;
            state.ready
        };
        if ready {
            self.update();
        }
    }

    /// Forget cached measurements and the document handle. Registered as a
    /// recovery hook by the session.
    pub fn reset_cache(&self) {
        let mut state = lock(&self.inner.state);
        state.document = None;
        state.last_applied = None;
        state.last_content_hash = None;
        debug!("Scale caches reset");
    }

    /// [`Self::reset_cache`] as a callback that does not keep the engine alive
    pub fn cache_reset_hook(&self) -> impl Fn() + Send + Sync + 'static {
        let weak = Arc::downgrade(&self.inner);
        move || {
            if let Some(engine) = Self::from_weak(&weak) {
                engine.reset_cache();
            }
        }
    }

    pub fn fit_mode(&self) -> FitMode {
        lock(&self.inner.state).fit_mode
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.inner.state).ready
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.inner.state).destroyed
    }

    pub fn scale_info(&self) -> ScaleInfo {
        let viewport = self.inner.host.viewport();
        let state = lock(&self.inner.state);
        ScaleInfo {
            fit_mode: state.fit_mode,
            ready: state.ready,
            destroyed: state.destroyed,
            content_width: state.content_width,
            content_height: state.content_height,
            viewport,
            scale: state.last_scale,
            transform: state.last_transform,
            applies: state.applies,
            skipped_applies: state.skipped,
        }
    }

    /// Detach from the host and cancel pending work. The last transform
    /// stays applied.
    pub fn teardown(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.ready = false;
            state.listener.clear();
            state.observer.clear();
            state.document = None;
        }
        self.inner.load.cancel();
        self.inner.resize.cancel();
        self.inner.mutation.cancel();
        debug!("Scale engine torn down");
    }
}

impl std::fmt::Debug for ScaleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScaleEngine")
            .field("fit_mode", &self.fit_mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::{MockDocument, MockHost};

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    fn engine_with(document: Option<Arc<MockDocument>>) -> (ScaleEngine, Arc<MockHost>) {
        let host = Arc::new(MockHost::default());
        host.set_document(document);
        let engine = ScaleEngine::new(ScaleConfig::default(), host.clone(), None);
        engine.init();
        (engine, host)
    }

    async fn load(host: &MockHost) {
        settle().await;
        host.finish_load();
        settle().await;
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_applies_contain_transform() {
        let document = Arc::new(MockDocument::new(960.0, 540.0));
        let (engine, host) = engine_with(Some(document.clone()));
        load(&host).await;

        let transform = host.last_transform().unwrap();
        assert_eq!((transform.scale_x, transform.scale_y), (2.0, 2.0));
        assert_eq!((transform.offset_x, transform.offset_y), (0.0, 0.0));
        assert!(engine.is_ready());
        assert_eq!(document.styles().len(), 1);
        assert_eq!(document.styles()[0].0, STYLE_ID);
        engine.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_is_debounced() {
        let document = Arc::new(MockDocument::new(960.0, 540.0));
        let (engine, host) = engine_with(Some(document));
        settle().await;
        host.finish_load();
        settle().await;

        tokio::time::advance(Duration::from_millis(149)).await;
        settle().await;
        assert!(host.transforms().is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(host.transforms().len(), 1);
        engine.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stylesheet_injected_once() {
        let document = Arc::new(MockDocument::new(960.0, 540.0));
        let (engine, host) = engine_with(Some(document.clone()));
        load(&host).await;
        load(&host).await;
        assert_eq!(document.styles().len(), 1);
        engine.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_reapply_is_skipped() {
        let document = Arc::new(MockDocument::new(960.0, 540.0));
        let (engine, host) = engine_with(Some(document));
        load(&host).await;

        host.resize(1920.0, 1080.0);
        settle().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;

        assert_eq!(host.transforms().len(), 1);
        assert_eq!(engine.scale_info().skipped_applies, 1);
        engine.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_page_is_not_measured() {
        let document = Arc::new(MockDocument::new(960.0, 540.0));
        let (engine, host) = engine_with(Some(document));
        load(&host).await;
        let opens = host.document_opens();

        host.load_embedded_document(BLANK_URL);
        load(&host).await;
        assert!(!engine.is_ready());
        assert_eq!(host.document_opens(), opens);

        // Resizes wait for the display to come back
        host.resize(1280.0, 720.0);
        settle().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(host.transforms().len(), 1);

        host.load_embedded_document("https://example.org/board");
        load(&host).await;
        assert!(engine.is_ready());
        assert_eq!(host.transforms().len(), 2);
        engine.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_load_cancels_pending_measure() {
        let document = Arc::new(MockDocument::new(960.0, 540.0));
        let (engine, host) = engine_with(Some(document));
        settle().await;
        host.finish_load();
        settle().await;
        host.emit(HostEvent::Load(BLANK_URL.to_string()));
        settle().await;

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert!(host.transforms().is_empty());
        assert_eq!(host.document_opens(), 0);
        engine.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_ignored_until_ready() {
        let document = Arc::new(MockDocument::new(960.0, 540.0));
        let (engine, host) = engine_with(Some(document));
        settle().await;
        host.resize(1280.0, 720.0);
        settle().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert!(host.transforms().is_empty());
        engine.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_denied_stays_subscribed() {
        let (engine, host) = engine_with(None);
        load(&host).await;
        assert!(host.transforms().is_empty());
        assert!(!engine.is_ready());

        host.set_document(Some(Arc::new(MockDocument::new(960.0, 540.0))));
        load(&host).await;
        assert_eq!(host.transforms().len(), 1);
        engine.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_error_falls_back_to_viewport() {
        let document = Arc::new(MockDocument::new(960.0, 540.0));
        document.fail_metrics(true);
        let (engine, host) = engine_with(Some(document));
        load(&host).await;

        let transform = host.last_transform().unwrap();
        assert_eq!((transform.width, transform.height), (1920.0, 1080.0));
        assert_eq!(transform.scale_x, 1.0);
        engine.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_gated_by_markup_hash() {
        let document = Arc::new(MockDocument::new(960.0, 540.0));
        let (engine, host) = engine_with(Some(document.clone()));
        load(&host).await;
        assert_eq!(host.transforms().len(), 1);

        document.set_metrics(kiosk_core_interface::DocumentMetrics {
            root: kiosk_core_interface::BoxMetrics::uniform(1920.0, 1080.0),
            body: None,
        });
        document.mutate("<html><body>v2</body></html>");
        settle().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(host.transforms().len(), 2);
        assert_eq!(host.last_transform().unwrap().scale_x, 1.0);

        // Same markup again: no re-measure
        document.mutate("<html><body>v2</body></html>");
        settle().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(host.transforms().len(), 2);
        engine.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_fit_mode_reapplies() {
        let document = Arc::new(MockDocument::new(960.0, 1080.0));
        let (engine, host) = engine_with(Some(document));
        load(&host).await;
        assert_eq!(host.last_transform().unwrap().scale_x, 1.0);

        engine.set_fit_mode(FitMode::Cover);
        assert_eq!(host.last_transform().unwrap().scale_x, 2.0);
        assert_eq!(engine.scale_info().fit_mode, FitMode::Cover);
        engine.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_ignores_later_events() {
        let document = Arc::new(MockDocument::with_resize_observer(960.0, 540.0));
        let (engine, host) = engine_with(Some(document.clone()));
        load(&host).await;
        engine.teardown();

        document.resize_content(480.0, 270.0);
        host.finish_load();
        host.resize(1280.0, 720.0);
        settle().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(host.transforms().len(), 1);
        assert!(engine.scale_info().destroyed);
    }
}
