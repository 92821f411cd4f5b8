//! In-memory adapters for tests and demos
//!
//! Every mock records what the engines asked of it and lets the test script
//! the next answer. [`MockEnvironment`] bundles one of each.
//!
//! # Example
//!
//! ```rust
//! use kiosk::system::mock::{MockEnvironment, MockReply};
//!
//! let env = MockEnvironment::new();
//! env.fetcher.push(MockReply::ok("<html>A</html>"));
//! let adapters = env.adapters();
//! assert_eq!(env.host.loads().len(), 0);
//! # drop(adapters);
//! ```

use async_trait::async_trait;
use kiosk_core_interface::{
    BoxMetrics, Clock, DetailedMemory, DocumentMetrics, EmbeddedDocument, FetchOptions,
    FetchResponse, Fetcher, HealthSummary, HeapSnapshot, Host, HostEvent, InterfaceError,
    MemoryBreakdown, MemorySampler, Notifier, Result, RuntimeSignal, RuntimeSignals, Transform,
    Viewport,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{lock, Adapters, MemoryStore};

const CHANNEL_CAPACITY: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────────────────

/// Wall clock that follows the tokio clock, so paused-time tests move it
/// with `tokio::time::advance`
#[derive(Debug)]
pub struct MockClock {
    base_ms: u64,
    origin: Instant,
    skew_ms: AtomicU64,
}

impl MockClock {
    pub fn new(base_ms: u64) -> Self {
        Self {
            base_ms,
            origin: Instant::now(),
            skew_ms: AtomicU64::new(0),
        }
    }

    /// Jump the wall clock forward without moving tokio time
    pub fn skip(&self, by: Duration) {
        self.skew_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        // 2024-01-01T00:00:00Z
        Self::new(1_704_067_200_000)
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.base_ms
            + self.origin.elapsed().as_millis() as u64
            + self.skew_ms.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetcher
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted answer for one request
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Response {
        status: u16,
        body: String,
        delay: Duration,
    },
    NetworkError(String),
    /// Never answers; only cancellation or the caller's watchdog ends it
    Hang,
}

impl MockReply {
    pub fn ok(body: impl Into<String>) -> Self {
        MockReply::Response {
            status: 200,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        MockReply::Response {
            status,
            body: String::new(),
            delay: Duration::ZERO,
        }
    }

    /// Successful response that takes `delay` to arrive
    pub fn slow(body: impl Into<String>, delay: Duration) -> Self {
        MockReply::Response {
            status: 200,
            body: body.into(),
            delay,
        }
    }
}

/// A request the fetcher received
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub no_store: bool,
    pub timeout: Duration,
}

/// Fetcher answering from a script; the last reply repeats once the
/// script runs out
#[derive(Debug, Default)]
pub struct MockFetcher {
    script: Mutex<VecDeque<MockReply>>,
    last: Mutex<Option<MockReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    aborted: AtomicU32,
}

struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: MockReply) {
        lock(&self.script).push_back(reply);
    }

    pub fn push_all(&self, replies: impl IntoIterator<Item = MockReply>) {
        lock(&self.script).extend(replies);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent requests observed
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Requests that ended through cancellation
    pub fn aborted_count(&self) -> u32 {
        self.aborted.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> MockReply {
        let next = lock(&self.script).pop_front();
        let mut last = lock(&self.last);
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last.clone().unwrap_or_else(|| MockReply::ok("")),
        }
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn get(&self, url: &str, options: FetchOptions) -> Result<FetchResponse> {
        lock(&self.requests).push(RecordedRequest {
            url: url.to_string(),
            no_store: options.no_store,
            timeout: options.timeout,
        });
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let reply = self.next_reply();
        let cancel = options.cancel;
        let answer = async move {
            match reply {
                MockReply::Response {
                    status,
                    body,
                    delay,
                } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Ok(FetchResponse::new(status, body))
                }
                MockReply::NetworkError(message) => Err(InterfaceError::Network(message)),
                MockReply::Hang => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.aborted.fetch_add(1, Ordering::SeqCst);
                Err(InterfaceError::Aborted)
            }
            result = answer => result,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host and embedded document
// ─────────────────────────────────────────────────────────────────────────────

/// Embedded document with settable size and markup
#[derive(Debug)]
pub struct MockDocument {
    metrics: Mutex<DocumentMetrics>,
    markup: Mutex<String>,
    styles: Mutex<Vec<(String, String)>>,
    fail_metrics: AtomicBool,
    resize_tx: Option<broadcast::Sender<()>>,
    mutation_tx: Option<broadcast::Sender<()>>,
}

impl MockDocument {
    /// Document observable through mutations only
    pub fn new(width: f64, height: f64) -> Self {
        Self::build(width, height, false, true)
    }

    /// Document with a resize observer
    pub fn with_resize_observer(width: f64, height: f64) -> Self {
        Self::build(width, height, true, true)
    }

    /// Document with no observers at all
    pub fn unobservable(width: f64, height: f64) -> Self {
        Self::build(width, height, false, false)
    }

    fn build(width: f64, height: f64, resize: bool, mutations: bool) -> Self {
        Self {
            metrics: Mutex::new(DocumentMetrics {
                root: BoxMetrics::uniform(width, height),
                body: Some(BoxMetrics::uniform(width, height)),
            }),
            markup: Mutex::new(String::from("<html><body></body></html>")),
            styles: Mutex::new(Vec::new()),
            fail_metrics: AtomicBool::new(false),
            resize_tx: resize.then(|| broadcast::channel(CHANNEL_CAPACITY).0),
            mutation_tx: mutations.then(|| broadcast::channel(CHANNEL_CAPACITY).0),
        }
    }

    pub fn set_metrics(&self, metrics: DocumentMetrics) {
        *lock(&self.metrics) = metrics;
    }

    /// Resize the content and notify the resize observer, if any
    pub fn resize_content(&self, width: f64, height: f64) {
        self.set_metrics(DocumentMetrics {
            root: BoxMetrics::uniform(width, height),
            body: Some(BoxMetrics::uniform(width, height)),
        });
        if let Some(tx) = &self.resize_tx {
            let _ = tx.send(());
        }
    }

    /// Replace the markup and notify the mutation observer, if any
    pub fn mutate(&self, markup: impl Into<String>) {
        *lock(&self.markup) = markup.into();
        if let Some(tx) = &self.mutation_tx {
            let _ = tx.send(());
        }
    }

    pub fn fail_metrics(&self, fail: bool) {
        self.fail_metrics.store(fail, Ordering::SeqCst);
    }

    /// Styles injected so far, as `(id, css)`
    pub fn styles(&self) -> Vec<(String, String)> {
        lock(&self.styles).clone()
    }
}

impl EmbeddedDocument for MockDocument {
    fn metrics(&self) -> Result<DocumentMetrics> {
        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(InterfaceError::Measurement(
                "layout not available".to_string(),
            ));
        }
        Ok(*lock(&self.metrics))
    }

    fn has_element(&self, id: &str) -> bool {
        lock(&self.styles).iter().any(|(style_id, _)| style_id == id)
    }

    fn inject_style(&self, id: &str, css: &str) -> Result<()> {
        lock(&self.styles).push((id.to_string(), css.to_string()));
        Ok(())
    }

    fn outer_markup(&self) -> Result<String> {
        Ok(lock(&self.markup).clone())
    }

    fn observe_resize(&self) -> Option<broadcast::Receiver<()>> {
        self.resize_tx.as_ref().map(|tx| tx.subscribe())
    }

    fn observe_mutations(&self) -> Option<broadcast::Receiver<()>> {
        self.mutation_tx.as_ref().map(|tx| tx.subscribe())
    }
}

/// Shell page double: records navigations, transforms and reload requests
#[derive(Debug)]
pub struct MockHost {
    events: broadcast::Sender<HostEvent>,
    viewport: Mutex<Viewport>,
    document: Mutex<Option<Arc<MockDocument>>>,
    loads: Mutex<Vec<String>>,
    transforms: Mutex<Vec<Transform>>,
    reloads: AtomicU32,
    gc_requests: AtomicU32,
    gc_supported: AtomicBool,
    document_opens: AtomicU32,
}

impl MockHost {
    pub fn new(viewport: Viewport) -> Self {
        let (events, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            events,
            viewport: Mutex::new(viewport),
            document: Mutex::new(None),
            loads: Mutex::new(Vec::new()),
            transforms: Mutex::new(Vec::new()),
            reloads: AtomicU32::new(0),
            gc_requests: AtomicU32::new(0),
            gc_supported: AtomicBool::new(true),
            document_opens: AtomicU32::new(0),
        }
    }

    /// Attach a same-origin document; `None` makes it inaccessible
    pub fn set_document(&self, document: Option<Arc<MockDocument>>) {
        *lock(&self.document) = document;
    }

    pub fn emit(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }

    /// Raise the load event for the most recent navigation
    pub fn finish_load(&self) {
        let url = lock(&self.loads).last().cloned().unwrap_or_default();
        self.emit(HostEvent::Load(url));
    }

    /// Change the viewport and raise the resize event
    pub fn resize(&self, width: f64, height: f64) {
        let viewport = Viewport::new(width, height);
        *lock(&self.viewport) = viewport;
        self.emit(HostEvent::Resize(viewport));
    }

    pub fn set_gc_supported(&self, supported: bool) {
        self.gc_supported.store(supported, Ordering::SeqCst);
    }

    /// URLs navigated to, in order
    pub fn loads(&self) -> Vec<String> {
        lock(&self.loads).clone()
    }

    pub fn transforms(&self) -> Vec<Transform> {
        lock(&self.transforms).clone()
    }

    pub fn last_transform(&self) -> Option<Transform> {
        lock(&self.transforms).last().copied()
    }

    pub fn reload_requests(&self) -> u32 {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn gc_requests(&self) -> u32 {
        self.gc_requests.load(Ordering::SeqCst)
    }

    /// Successful `embedded_document()` calls
    pub fn document_opens(&self) -> u32 {
        self.document_opens.load(Ordering::SeqCst)
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new(Viewport::new(1920.0, 1080.0))
    }
}

impl Host for MockHost {
    fn load_embedded_document(&self, url: &str) {
        lock(&self.loads).push(url.to_string());
    }

    fn embedded_document(&self) -> Result<Arc<dyn EmbeddedDocument>> {
        match lock(&self.document).clone() {
            Some(document) => {
                self.document_opens.fetch_add(1, Ordering::SeqCst);
                Ok(document)
            }
            None => Err(InterfaceError::AccessDenied(
                "cross-origin document".to_string(),
            )),
        }
    }

    fn viewport(&self) -> Viewport {
        *lock(&self.viewport)
    }

    fn apply_transform(&self, transform: &Transform) {
        lock(&self.transforms).push(*transform);
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    fn request_reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }

    fn request_gc(&self) -> bool {
        self.gc_requests.fetch_add(1, Ordering::SeqCst);
        self.gc_supported.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifier
// ─────────────────────────────────────────────────────────────────────────────

/// One call made on the notifier
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Status {
        at_ms: u64,
        ok: bool,
        error_count: u32,
    },
    Modified {
        at_ms: u64,
    },
    Error {
        kind: String,
        message: String,
    },
    Health(HealthSummary),
}

#[derive(Debug, Default)]
pub struct MockNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        lock(&self.notices).clone()
    }

    pub fn modified_count(&self) -> usize {
        lock(&self.notices)
            .iter()
            .filter(|n| matches!(n, Notice::Modified { .. }))
            .count()
    }

    pub fn failed_status_count(&self) -> usize {
        lock(&self.notices)
            .iter()
            .filter(|n| matches!(n, Notice::Status { ok: false, .. }))
            .count()
    }

    /// Error notices of the given kind
    pub fn errors_of(&self, kind: &str) -> usize {
        lock(&self.notices)
            .iter()
            .filter(|n| matches!(n, Notice::Error { kind: k, .. } if k == kind))
            .count()
    }

    pub fn last_health(&self) -> Option<HealthSummary> {
        lock(&self.notices).iter().rev().find_map(|n| match n {
            Notice::Health(summary) => Some(summary.clone()),
            _ => None,
        })
    }
}

impl Notifier for MockNotifier {
    fn show_status(&self, at_ms: u64, ok: bool, error_count: u32) {
        lock(&self.notices).push(Notice::Status {
            at_ms,
            ok,
            error_count,
        });
    }

    fn show_modif(&self, at_ms: u64) {
        lock(&self.notices).push(Notice::Modified { at_ms });
    }

    fn show_error(&self, kind: &str, message: &str) {
        lock(&self.notices).push(Notice::Error {
            kind: kind.to_string(),
            message: message.to_string(),
        });
    }

    fn show_health(&self, summary: &HealthSummary) {
        lock(&self.notices).push(Notice::Health(summary.clone()));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observation
// ─────────────────────────────────────────────────────────────────────────────

const MOCK_HEAP_LIMIT: u64 = 2 * 1024 * 1024 * 1024;

/// Sampler reporting scripted usage percentages; the last one repeats
#[derive(Debug, Default)]
pub struct MockSampler {
    script: Mutex<VecDeque<f64>>,
    last: Mutex<Option<f64>>,
    detailed: AtomicBool,
    samples: AtomicU32,
}

impl MockSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_usage(&self, percents: impl IntoIterator<Item = f64>) {
        lock(&self.script).extend(percents);
    }

    /// Serve readings through the detailed API
    pub fn set_detailed(&self, detailed: bool) {
        self.detailed.store(detailed, Ordering::SeqCst);
    }

    pub fn sample_count(&self) -> u32 {
        self.samples.load(Ordering::SeqCst)
    }

    fn next_usage(&self) -> Option<f64> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.script).pop_front();
        let mut last = lock(&self.last);
        if next.is_some() {
            *last = next;
        }
        *last
    }

    fn used_bytes(percent: f64) -> u64 {
        (MOCK_HEAP_LIMIT as f64 * percent / 100.0) as u64
    }
}

#[async_trait]
impl MemorySampler for MockSampler {
    fn supports_detailed(&self) -> bool {
        self.detailed.load(Ordering::SeqCst)
    }

    async fn measure_detailed(&self) -> Result<DetailedMemory> {
        let percent = self
            .next_usage()
            .ok_or_else(|| InterfaceError::Sampler("no reading scripted".to_string()))?;
        let bytes = Self::used_bytes(percent);
        Ok(DetailedMemory {
            bytes,
            limit_bytes: MOCK_HEAP_LIMIT,
            breakdown: vec![MemoryBreakdown {
                kind: "JavaScript".to_string(),
                bytes,
            }],
        })
    }

    fn heap(&self) -> Option<HeapSnapshot> {
        self.next_usage().map(|percent| HeapSnapshot {
            used_bytes: Self::used_bytes(percent),
            limit_bytes: MOCK_HEAP_LIMIT,
        })
    }
}

/// Runtime signal source driven by the test
#[derive(Debug)]
pub struct MockSignals {
    tx: broadcast::Sender<RuntimeSignal>,
    performance: AtomicBool,
}

impl MockSignals {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            performance: AtomicBool::new(true),
        }
    }

    pub fn emit(&self, signal: RuntimeSignal) {
        let _ = self.tx.send(signal);
    }

    pub fn set_performance_supported(&self, supported: bool) {
        self.performance.store(supported, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MockSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeSignals for MockSignals {
    fn subscribe(&self) -> broadcast::Receiver<RuntimeSignal> {
        self.tx.subscribe()
    }

    fn supports_performance(&self) -> bool {
        self.performance.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bundle
// ─────────────────────────────────────────────────────────────────────────────

/// One mock per adapter, kept typed so tests can script and inspect them
#[derive(Clone)]
pub struct MockEnvironment {
    pub clock: Arc<MockClock>,
    pub fetcher: Arc<MockFetcher>,
    pub host: Arc<MockHost>,
    pub notifier: Arc<MockNotifier>,
    pub store: Arc<MemoryStore>,
    pub sampler: Arc<MockSampler>,
    pub signals: Arc<MockSignals>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(MockClock::default()),
            fetcher: Arc::new(MockFetcher::new()),
            host: Arc::new(MockHost::default()),
            notifier: Arc::new(MockNotifier::new()),
            store: Arc::new(MemoryStore::new()),
            sampler: Arc::new(MockSampler::new()),
            signals: Arc::new(MockSignals::new()),
        }
    }

    pub fn adapters(&self) -> Adapters {
        Adapters {
            clock: self.clock.clone(),
            fetcher: self.fetcher.clone(),
            host: self.host.clone(),
            notifier: self.notifier.clone(),
            store: self.store.clone(),
            sampler: self.sampler.clone(),
            signals: self.signals.clone(),
        }
    }
}

impl Default for MockEnvironment {
    fn default() -> Self {
        Self::new()
    }
}
