/*!
 * Kiosk Display - always-on display engine
 *
 * Presents one configured display inside an embedded document and keeps it
 * healthy without an operator:
 * - Change-detecting refresh with cache busting, backoff and retries
 * - Viewport fitting (contain, cover, fill, fit-width, fit-height)
 * - Health scoring with memory and performance monitoring
 * - Local recovery and full reload when the process degrades
 *
 * All I/O goes through the adapter traits in `kiosk-core-interface`, so the
 * engines run the same against a real shell or the mocks in
 * [`system::mock`].
 */

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod health;
pub mod logging;
pub mod refresh;
pub mod runtime;
pub mod scale;
pub mod session;
pub mod system;
pub mod timer;

// Re-export commonly used types
pub use config::{DisplayDescriptor, KioskConfig, SessionConfig};
pub use error::{KioskError, Result};
pub use fingerprint::Fingerprint;
pub use health::{FaultKind, HealthSupervisor, ReloadReason};
pub use refresh::{AttemptOutcome, RefreshEngine, RefreshStats};
pub use runtime::KioskRuntime;
pub use scale::{FitMode, ScaleEngine};
pub use session::DisplaySession;
pub use system::Adapters;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
