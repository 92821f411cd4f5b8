//! Kiosk Core Interface: adapter contracts for the display engines
//!
//! This crate defines every boundary between the kiosk core and the outside
//! world. The refresh, scale and health engines only talk to these traits, so
//! the same engines run against a browser shell, a native webview or the
//! in-memory mocks used by the test suite.
//!
//! # Contracts
//!
//! 1. **Time**: [`Clock`] reports wall-clock epoch milliseconds
//! 2. **Network**: [`Fetcher`] issues cancellable GET requests
//! 3. **Display**: [`Host`] owns the embedded document and the viewport,
//!    [`EmbeddedDocument`] exposes measurement and style injection
//! 4. **Sinks**: [`Notifier`] for banners, [`KeyValueStore`] for `lastSync`
//! 5. **Observation**: [`MemorySampler`] and [`RuntimeSignals`] feed the
//!    health supervisor
//!
//! # Example
//!
//! ```rust,no_run
//! use kiosk_core_interface::{CancellationToken, FetchOptions, Fetcher};
//! use std::time::Duration;
//!
//! async fn reachable<F: Fetcher>(fetcher: &F, url: &str) -> bool {
//!     let cancel = CancellationToken::new();
//!     let options = FetchOptions::new(Duration::from_secs(10), cancel.child_token());
//!     matches!(fetcher.get(url, options).await, Ok(resp) if resp.is_success())
//! }
//! ```
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync + 'static` to be shared between the
//! engines' background tasks.

pub use tokio_util::sync::CancellationToken;

use async_trait::async_trait;
use kiosk_core_resilience::HealthStatus;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterfaceError {
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request aborted")]
    Aborted,

    #[error("embedded document not accessible: {0}")]
    AccessDenied(String),

    #[error("measurement failed: {0}")]
    Measurement(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("memory sampler error: {0}")]
    Sampler(String),
}

impl InterfaceError {
    /// Errors caused by the network path rather than the local runtime
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            InterfaceError::HttpStatus { .. }
                | InterfaceError::Network(_)
                | InterfaceError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, InterfaceError>;

// ═══════════════════════════════════════════════════════════════════════════
// 1. Time
// ═══════════════════════════════════════════════════════════════════════════

/// Wall-clock source.
///
/// Timers are scheduled on the async runtime; the clock only answers "what
/// time is it" so that persisted timestamps and URL cache-busters can be
/// controlled in tests.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;
}

// ═══════════════════════════════════════════════════════════════════════════
// 2. Network
// ═══════════════════════════════════════════════════════════════════════════

/// Options for a single GET request
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Hard deadline; the caller also enforces it with a watchdog
    pub timeout: Duration,

    /// Cancelled when the attempt is superseded or torn down
    pub cancel: CancellationToken,

    /// Bypass every cache between the kiosk and the origin
    pub no_store: bool,
}

impl FetchOptions {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            timeout,
            cancel,
            no_store: true,
        }
    }
}

/// Response of a completed request (any status)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Issue a GET request.
    ///
    /// Returns `Ok` for any HTTP status; transport failures map to
    /// [`InterfaceError::Network`], [`InterfaceError::Timeout`] or
    /// [`InterfaceError::Aborted`].
    async fn get(&self, url: &str, options: FetchOptions) -> Result<FetchResponse>;
}

// ═══════════════════════════════════════════════════════════════════════════
// 3. Display
// ═══════════════════════════════════════════════════════════════════════════

/// Visible area available to the embedded document, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Box dimensions of one element
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoxMetrics {
    pub scroll_width: f64,
    pub offset_width: f64,
    pub client_width: f64,
    pub scroll_height: f64,
    pub offset_height: f64,
    pub client_height: f64,
}

impl BoxMetrics {
    /// Metrics where every width and height reading agrees
    pub fn uniform(width: f64, height: f64) -> Self {
        Self {
            scroll_width: width,
            offset_width: width,
            client_width: width,
            scroll_height: height,
            offset_height: height,
            client_height: height,
        }
    }
}

/// Dimensions of the document root and body
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DocumentMetrics {
    pub root: BoxMetrics,
    /// Absent while the document has no body yet
    pub body: Option<BoxMetrics>,
}

/// Placeholder page the host is sent to between load retries
pub const BLANK_URL: &str = "about:blank";

/// Events raised by the host around the embedded document
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// The embedded document at this URL finished loading
    Load(String),
    /// The embedded document failed to load
    Error(String),
    /// The viewport changed size
    Resize(Viewport),
}

/// Scale and placement applied to the embedded document.
///
/// The element keeps its content size; the transform scales it around the
/// top-left origin and then moves it by the offsets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transform {
    pub scale_x: f64,
    pub scale_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub width: f64,
    pub height: f64,
}

impl Transform {
    /// CSS `transform` value
    pub fn css(&self) -> String {
        let scale = if (self.scale_x - self.scale_y).abs() < f64::EPSILON {
            format!("scale({})", fmt_px(self.scale_x))
        } else {
            format!(
                "scale({}, {})",
                fmt_px(self.scale_x),
                fmt_px(self.scale_y)
            )
        };
        format!(
            "translate({}px, {}px) {}",
            fmt_px(self.offset_x),
            fmt_px(self.offset_y),
            scale
        )
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {}",
            fmt_px(self.width),
            fmt_px(self.height),
            self.css()
        )
    }
}

fn fmt_px(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded == rounded.trunc() {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}

/// Same-origin view into the embedded document.
///
/// Handles may go stale at any time (navigation, cross-origin redirect), so
/// every method is fallible and callers should not keep them across loads.
pub trait EmbeddedDocument: Send + Sync {
    fn metrics(&self) -> Result<DocumentMetrics>;

    /// Whether an element with this id exists
    fn has_element(&self, id: &str) -> bool;

    /// Insert a `<style>` element with the given id
    fn inject_style(&self, id: &str, css: &str) -> Result<()>;

    /// Serialized markup of the document root
    fn outer_markup(&self) -> Result<String>;

    /// Size changes of the document root, when a resize observer exists
    fn observe_resize(&self) -> Option<broadcast::Receiver<()>>;

    /// DOM mutations, when a mutation observer exists
    fn observe_mutations(&self) -> Option<broadcast::Receiver<()>>;
}

/// The shell page hosting the embedded document
pub trait Host: Send + Sync + 'static {
    /// Navigate the embedded document
    fn load_embedded_document(&self, url: &str);

    /// Open the embedded document; fails when cross-origin or detached
    fn embedded_document(&self) -> Result<Arc<dyn EmbeddedDocument>>;

    fn viewport(&self) -> Viewport;

    fn apply_transform(&self, transform: &Transform);

    /// Load, error and resize events
    fn subscribe(&self) -> broadcast::Receiver<HostEvent>;

    /// Reload the whole kiosk process
    fn request_reload(&self);

    /// Ask the runtime for a garbage collection; `false` when unsupported
    fn request_gc(&self) -> bool {
        false
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 4. Sinks
// ═══════════════════════════════════════════════════════════════════════════

/// Summary pushed to the status banner on every UI update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub score: f64,
    pub uptime_ms: u64,
    pub system_errors: u32,
    pub network_errors: u32,
    pub memory_usage_pct: Option<f64>,
}

/// Banner and notification surface
pub trait Notifier: Send + Sync + 'static {
    /// Sync status banner
    fn show_status(&self, at_ms: u64, ok: bool, error_count: u32);

    /// "Content modified" banner
    fn show_modif(&self, at_ms: u64);

    fn show_error(&self, kind: &str, message: &str);

    /// Health panel summary; hosts without a panel ignore it
    fn show_health(&self, _summary: &HealthSummary) {}
}

/// Durable string key-value storage
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════
// 5. Observation
// ═══════════════════════════════════════════════════════════════════════════

/// Share of memory attributed to one kind of resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryBreakdown {
    pub kind: String,
    pub bytes: u64,
}

/// Result of a detailed (cross-origin isolated) memory measurement
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedMemory {
    pub bytes: u64,
    pub limit_bytes: u64,
    pub breakdown: Vec<MemoryBreakdown>,
}

/// Basic JS heap reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeapSnapshot {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

#[async_trait]
pub trait MemorySampler: Send + Sync + 'static {
    /// Whether [`MemorySampler::measure_detailed`] is usable
    fn supports_detailed(&self) -> bool {
        false
    }

    async fn measure_detailed(&self) -> Result<DetailedMemory> {
        Err(InterfaceError::Sampler(
            "detailed memory measurement unavailable".to_string(),
        ))
    }

    /// Basic heap reading, `None` when the runtime exposes none
    fn heap(&self) -> Option<HeapSnapshot>;
}

/// Ambient runtime event
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeSignal {
    UncaughtError {
        message: String,
        source: Option<String>,
    },
    UnhandledRejection {
        reason: String,
    },
    /// A subresource (script, image, stylesheet) failed to load
    ResourceFailure {
        element: String,
        url: String,
    },
    LongTask {
        duration_ms: f64,
    },
    LayoutShift {
        value: f64,
        had_recent_input: bool,
    },
    LargestContentfulPaint {
        render_time_ms: f64,
    },
}

/// Streams of ambient runtime events; dropping the receiver unsubscribes
pub trait RuntimeSignals: Send + Sync + 'static {
    fn subscribe(&self) -> broadcast::Receiver<RuntimeSignal>;

    /// Whether long-task, layout-shift and LCP entries are delivered
    fn supports_performance(&self) -> bool {
        true
    }
}
