//! Concrete adapters for the kiosk engines
//!
//! - `SystemClock`: wall clock backed by `chrono`
//! - `ReqwestFetcher`: HTTP GET with cache bypass headers
//! - `MemoryStore` / `JsonFileStore`: `lastSync` persistence
//! - `mock`: in-memory adapters for tests and demos

mod clock;
mod fetcher;
mod store;

pub mod mock;

pub use clock::SystemClock;
pub use fetcher::ReqwestFetcher;
pub use store::{JsonFileStore, MemoryStore};

use kiosk_core_interface::{
    Clock, Fetcher, Host, KeyValueStore, MemorySampler, Notifier, RuntimeSignals,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Every adapter a kiosk process needs, shared between sessions
#[derive(Clone)]
pub struct Adapters {
    pub clock: Arc<dyn Clock>,
    pub fetcher: Arc<dyn Fetcher>,
    pub host: Arc<dyn Host>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn KeyValueStore>,
    pub sampler: Arc<dyn MemorySampler>,
    pub signals: Arc<dyn RuntimeSignals>,
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
