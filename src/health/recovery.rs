//! Recovery hooks and reload reasons

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Why the supervisor asked the host for a full reload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadReason {
    /// Memory stayed high after the grace period
    MemoryPressure,
    /// Still critical after a repeated general recovery
    CriticalHealth,
    /// Scheduled refresh after long uptime
    Preventive,
    /// The embedded document exhausted its load retries
    DisplayUnreachable,
}

impl fmt::Display for ReloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReloadReason::MemoryPressure => "memory pressure",
            ReloadReason::CriticalHealth => "critical health",
            ReloadReason::Preventive => "preventive reload",
            ReloadReason::DisplayUnreachable => "display unreachable",
        };
        f.write_str(text)
    }
}

/// Token returned by hook registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecoveryHookId(u64);

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Cleanup callbacks run during general recovery
#[derive(Default)]
pub struct RecoveryHooks {
    next_id: u64,
    hooks: Vec<(RecoveryHookId, String, Hook)>,
}

impl RecoveryHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, hook: Hook) -> RecoveryHookId {
        self.next_id += 1;
        let id = RecoveryHookId(self.next_id);
        self.hooks.push((id, name.into(), hook));
        id
    }

    pub fn unregister(&mut self, id: RecoveryHookId) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(hook_id, _, _)| *hook_id != id);
        self.hooks.len() != before
    }

    /// Snapshot for running outside the supervisor lock
    pub fn snapshot(&self) -> Vec<(String, Hook)> {
        self.hooks
            .iter()
            .map(|(_, name, hook)| (name.clone(), hook.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn clear(&mut self) {
        self.hooks.clear();
    }
}

impl fmt::Debug for RecoveryHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|(_, name, _)| name))
            .finish()
    }
}

/// Recovery bookkeeping exposed in the health report
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
    pub general_recoveries: u32,
    pub memory_recoveries: u32,
    pub gc_hints_honoured: u32,
    pub reload_requested: Option<ReloadReason>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_register_and_unregister() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut hooks = RecoveryHooks::new();

        let c = calls.clone();
        let first = hooks.register("scale-cache", Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let c = calls.clone();
        hooks.register("refresh-cache", Arc::new(move || {
            c.fetch_add(10, Ordering::SeqCst);
        }));

        for (_, hook) in hooks.snapshot() {
            hook();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 11);

        assert!(hooks.unregister(first));
        assert!(!hooks.unregister(first));
        assert_eq!(hooks.len(), 1);
        assert_eq!(format!("{:?}", hooks), "[\"refresh-cache\"]");
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(ReloadReason::Preventive.to_string(), "preventive reload");
        assert_eq!(
            serde_json::to_string(&ReloadReason::MemoryPressure).unwrap(),
            "\"memory_pressure\""
        );
    }
}
