/*!
 * Configuration structures for kiosk sessions
 */

use kiosk_core_resilience::{CadenceConfig, HealthThresholds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{KioskError, Result};
use crate::scale::FitMode;

/// Top-level kiosk configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KioskConfig {
    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub scale: ScaleConfig,

    #[serde(default)]
    pub session: SessionTimings,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Displays the shell may route to
    #[serde(default)]
    pub displays: Vec<DisplayDescriptor>,
}

/// Polling, backoff and retry settings for the refresh engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshConfig {
    /// Baseline interval when a display does not set its own
    #[serde(default = "default_refresh_interval")]
    pub default_refresh_interval_ms: u64,

    /// Every multiple of this many consecutive failures slows the cadence
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    #[serde(default = "default_slowdown_multiplier")]
    pub slowdown_multiplier: f64,

    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Isolated retries allowed before the retry counter resets
    #[serde(default = "default_three")]
    pub max_retries: u32,

    #[serde(default = "default_five_seconds")]
    pub retry_delay_ms: u64,

    /// Hard deadline for one fetch
    #[serde(default = "default_timeout")]
    pub timeout_duration_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            default_refresh_interval_ms: default_refresh_interval(),
            max_consecutive_errors: default_max_consecutive_errors(),
            slowdown_multiplier: default_slowdown_multiplier(),
            max_interval_ms: default_max_interval(),
            min_interval_ms: default_min_interval(),
            max_retries: default_three(),
            retry_delay_ms: default_five_seconds(),
            timeout_duration_ms: default_timeout(),
        }
    }
}

impl RefreshConfig {
    /// Cadence settings around the given baseline
    pub fn cadence(&self, baseline_ms: u64) -> CadenceConfig {
        CadenceConfig {
            baseline: Duration::from_millis(baseline_ms),
            min_interval: Duration::from_millis(self.min_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            slowdown_multiplier: self.slowdown_multiplier,
            max_consecutive_errors: self.max_consecutive_errors,
            max_retries: self.max_retries,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_duration_ms)
    }
}

/// Health supervisor cadences, thresholds and recovery policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    #[serde(default = "default_check_interval")]
    pub health_check_interval_ms: u64,

    #[serde(default = "default_check_interval")]
    pub memory_check_interval_ms: u64,

    #[serde(default = "default_check_interval")]
    pub ui_update_interval_ms: u64,

    /// Memory usage above this percentage counts as a warning
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold_percent: f64,

    /// System errors at or above this count are critical
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    #[serde(default = "default_three")]
    pub memory_warning_limit: u32,

    /// Network errors since the last successful refresh that turn the
    /// status to warning; 0 disables the check
    #[serde(default = "default_max_consecutive_errors")]
    pub network_warning_threshold: u32,

    #[serde(default = "default_true")]
    pub auto_recover: bool,

    #[serde(default = "default_three")]
    pub max_recovery_attempts: u32,

    /// Delay before the reload that follows `iframe_max_retries`
    #[serde(default = "default_recovery_delay")]
    pub recovery_delay_ms: u64,

    #[serde(default = "default_preventive_reload")]
    pub preventive_reload_after_ms: u64,

    /// Wait between memory recovery and the confirming re-sample
    #[serde(default = "default_memory_grace")]
    pub memory_grace_period_ms: u64,

    /// Track long tasks, layout shifts and LCP entries
    #[serde(default = "default_true")]
    pub performance_monitoring: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_check_interval(),
            memory_check_interval_ms: default_check_interval(),
            ui_update_interval_ms: default_check_interval(),
            memory_threshold_percent: default_memory_threshold(),
            error_threshold: default_error_threshold(),
            memory_warning_limit: default_three(),
            network_warning_threshold: default_max_consecutive_errors(),
            auto_recover: true,
            max_recovery_attempts: default_three(),
            recovery_delay_ms: default_recovery_delay(),
            preventive_reload_after_ms: default_preventive_reload(),
            memory_grace_period_ms: default_memory_grace(),
            performance_monitoring: true,
        }
    }
}

impl HealthConfig {
    /// Scoring thresholds derived from this configuration
    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            error_threshold: self.error_threshold,
            network_warning_streak: self.network_warning_threshold,
            ..HealthThresholds::default()
        }
    }
}

/// Measure-and-fit settings for the scale engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleConfig {
    #[serde(default)]
    pub fit_mode: FitMode,

    #[serde(default = "default_min_scale")]
    pub min_scale: f64,

    #[serde(default = "default_max_scale")]
    pub max_scale: f64,

    #[serde(default = "default_true")]
    pub center_content: bool,

    #[serde(default = "default_load_delay")]
    pub load_delay_ms: u64,

    #[serde(default = "default_debounce")]
    pub resize_debounce_ms: u64,

    #[serde(default = "default_debounce")]
    pub mutation_debounce_ms: u64,

    /// Measured dimensions are clamped to this size
    #[serde(default = "default_max_content_size")]
    pub max_content_size_px: f64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            fit_mode: FitMode::default(),
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
            center_content: true,
            load_delay_ms: default_load_delay(),
            resize_debounce_ms: default_debounce(),
            mutation_debounce_ms: default_debounce(),
            max_content_size_px: default_max_content_size(),
        }
    }
}

/// Embedded-document load supervision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTimings {
    #[serde(default = "default_load_timeout")]
    pub load_timeout_duration_ms: u64,

    #[serde(default = "default_five_seconds")]
    pub error_retry_delay_ms: u64,

    #[serde(default = "default_three")]
    pub max_retry_attempts: u32,

    /// Time spent on `about:blank` before navigating back
    #[serde(default = "default_blank_delay")]
    pub blank_navigation_delay_ms: u64,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            load_timeout_duration_ms: default_load_timeout(),
            error_retry_delay_ms: default_five_seconds(),
            max_retry_attempts: default_three(),
            blank_navigation_delay_ms: default_blank_delay(),
        }
    }
}

/// Diagnostic output settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    /// JSON log file; stdout when absent
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Force debug output regardless of `log_level`
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// One display the kiosk can present; immutable for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayDescriptor {
    pub slug: String,
    pub name: String,
    pub source_url: String,

    /// Overrides `refresh.defaultRefreshIntervalMs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_ms: Option<u64>,

    /// Disables health monitoring for this display when `false`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_enabled: Option<bool>,
}

impl DisplayDescriptor {
    pub fn new(
        slug: impl Into<String>,
        name: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            source_url: source_url.into(),
            refresh_interval_ms: None,
            monitoring_enabled: None,
        }
    }

    pub fn with_refresh_interval(mut self, ms: u64) -> Self {
        self.refresh_interval_ms = Some(ms);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.slug.trim().is_empty() {
            return Err(KioskError::InvalidDisplay("slug is empty".to_string()));
        }
        if self.source_url.trim().is_empty() {
            return Err(KioskError::InvalidDisplay(format!(
                "display '{}' has no source URL",
                self.slug
            )));
        }
        if self.refresh_interval_ms == Some(0) {
            return Err(KioskError::InvalidDisplay(format!(
                "display '{}' has a zero refresh interval",
                self.slug
            )));
        }
        Ok(())
    }
}

/// Effective configuration of one display session: defaults merged with the
/// display's own overrides
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub display: DisplayDescriptor,
    pub refresh: RefreshConfig,
    pub health: HealthConfig,
    pub scale: ScaleConfig,
    pub timings: SessionTimings,

    /// Baseline refresh interval after the per-display override
    pub refresh_interval_ms: u64,

    pub monitoring_enabled: bool,
}

impl SessionConfig {
    pub fn resolve(config: &KioskConfig, display: &DisplayDescriptor) -> Result<Self> {
        display.validate()?;
        let refresh_interval_ms = display
            .refresh_interval_ms
            .unwrap_or(config.refresh.default_refresh_interval_ms)
            .clamp(config.refresh.min_interval_ms, config.refresh.max_interval_ms);

        Ok(Self {
            display: display.clone(),
            refresh: config.refresh.clone(),
            health: config.health.clone(),
            scale: config.scale.clone(),
            timings: config.session.clone(),
            refresh_interval_ms,
            monitoring_enabled: display.monitoring_enabled.unwrap_or(true),
        })
    }

    /// Cadence settings for this session's refresh engine
    pub fn cadence(&self) -> CadenceConfig {
        self.refresh.cadence(self.refresh_interval_ms)
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_three() -> u32 {
    3
}

fn default_five_seconds() -> u64 {
    5_000
}

fn default_refresh_interval() -> u64 {
    30_000
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_slowdown_multiplier() -> f64 {
    2.0
}

fn default_max_interval() -> u64 {
    300_000 // 5 min
}

fn default_min_interval() -> u64 {
    5_000
}

fn default_timeout() -> u64 {
    10_000
}

fn default_check_interval() -> u64 {
    30_000
}

fn default_memory_threshold() -> f64 {
    40.0
}

fn default_error_threshold() -> u32 {
    10
}

fn default_recovery_delay() -> u64 {
    60_000
}

fn default_preventive_reload() -> u64 {
    43_200_000 // 12 h
}

fn default_memory_grace() -> u64 {
    10_000
}

fn default_min_scale() -> f64 {
    0.1
}

fn default_max_scale() -> f64 {
    50.0
}

fn default_load_delay() -> u64 {
    150
}

fn default_debounce() -> u64 {
    100
}

fn default_max_content_size() -> f64 {
    20_000.0
}

fn default_load_timeout() -> u64 {
    30_000
}

fn default_blank_delay() -> u64 {
    100
}

impl KioskConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: KioskConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Look up a display by slug
    pub fn display(&self, slug: &str) -> Option<&DisplayDescriptor> {
        self.displays.iter().find(|d| d.slug == slug)
    }

    /// Reject values the engines cannot run with
    pub fn validate(&self) -> Result<()> {
        let refresh = &self.refresh;
        if refresh.min_interval_ms == 0
            || refresh.default_refresh_interval_ms == 0
            || refresh.timeout_duration_ms == 0
        {
            return Err(KioskError::Config(
                "refresh intervals and timeout must be positive".to_string(),
            ));
        }
        if refresh.min_interval_ms > refresh.max_interval_ms {
            return Err(KioskError::Config(format!(
                "minIntervalMs ({}) exceeds maxIntervalMs ({})",
                refresh.min_interval_ms, refresh.max_interval_ms
            )));
        }
        refresh
            .cadence(refresh.default_refresh_interval_ms)
            .validate()?;

        let health = &self.health;
        if health.health_check_interval_ms == 0
            || health.memory_check_interval_ms == 0
            || health.ui_update_interval_ms == 0
        {
            return Err(KioskError::Config(
                "health cadences must be positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&health.memory_threshold_percent) {
            return Err(KioskError::Config(format!(
                "memoryThresholdPercent out of range: {}",
                health.memory_threshold_percent
            )));
        }

        let scale = &self.scale;
        if scale.min_scale <= 0.0 || scale.min_scale > scale.max_scale {
            return Err(KioskError::Config(format!(
                "invalid scale bounds [{}, {}]",
                scale.min_scale, scale.max_scale
            )));
        }
        if scale.max_content_size_px <= 0.0 {
            return Err(KioskError::Config(
                "maxContentSizePx must be positive".to_string(),
            ));
        }

        if self.session.load_timeout_duration_ms == 0 {
            return Err(KioskError::Config(
                "loadTimeoutDurationMs must be positive".to_string(),
            ));
        }

        for display in &self.displays {
            display.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KioskConfig::default();
        assert_eq!(config.refresh.default_refresh_interval_ms, 30_000);
        assert_eq!(config.refresh.max_consecutive_errors, 5);
        assert_eq!(config.refresh.slowdown_multiplier, 2.0);
        assert_eq!(config.refresh.max_interval_ms, 300_000);
        assert_eq!(config.refresh.min_interval_ms, 5_000);
        assert_eq!(config.refresh.timeout_duration_ms, 10_000);
        assert_eq!(config.health.memory_threshold_percent, 40.0);
        assert_eq!(config.health.error_threshold, 10);
        assert_eq!(config.health.network_warning_threshold, 5);
        assert!(config.health.auto_recover);
        assert_eq!(config.health.preventive_reload_after_ms, 43_200_000);
        assert_eq!(config.scale.fit_mode, FitMode::Contain);
        assert_eq!(config.scale.max_scale, 50.0);
        assert_eq!(config.session.load_timeout_duration_ms, 30_000);
        assert_eq!(config.session.max_retry_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = KioskConfig::from_toml_str(
            r#"
            [refresh]
            defaultRefreshIntervalMs = 60000

            [scale]
            fitMode = "fit-width"

            [[displays]]
            slug = "lobby"
            name = "Lobby"
            sourceUrl = "https://example.org/lobby"
            refreshIntervalMs = 15000
            "#,
        )
        .unwrap();

        assert_eq!(config.refresh.default_refresh_interval_ms, 60_000);
        assert_eq!(config.refresh.max_retries, 3);
        assert_eq!(config.scale.fit_mode, FitMode::FitWidth);
        assert_eq!(config.displays.len(), 1);
        assert_eq!(
            config.display("lobby").unwrap().refresh_interval_ms,
            Some(15_000)
        );
    }

    #[test]
    fn test_unknown_fit_mode_rejected() {
        let result = KioskConfig::from_toml_str("[scale]\nfitMode = \"zoom\"\n");
        assert!(matches!(result, Err(KioskError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut config = KioskConfig::default();
        config.scale.min_scale = 5.0;
        config.scale.max_scale = 1.0;
        assert!(config.validate().is_err());

        let mut config = KioskConfig::default();
        config.refresh.min_interval_ms = 400_000;
        assert!(config.validate().is_err());

        let mut config = KioskConfig::default();
        config.health.ui_update_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_merges_display_overrides() {
        let config = KioskConfig::default();
        let display = DisplayDescriptor::new("hall", "Hall", "https://example.org/hall")
            .with_refresh_interval(1_000);
        let session = SessionConfig::resolve(&config, &display).unwrap();

        // Below minIntervalMs
        assert_eq!(session.refresh_interval_ms, 5_000);
        assert!(session.monitoring_enabled);
        assert_eq!(session.cadence().baseline, Duration::from_secs(5));

        let plain = DisplayDescriptor::new("hall", "Hall", "https://example.org/hall");
        let session = SessionConfig::resolve(&config, &plain).unwrap();
        assert_eq!(session.refresh_interval_ms, 30_000);
    }

    #[test]
    fn test_resolve_rejects_invalid_display() {
        let config = KioskConfig::default();
        let display = DisplayDescriptor::new("", "Nameless", "https://example.org");
        assert!(matches!(
            SessionConfig::resolve(&config, &display),
            Err(KioskError::InvalidDisplay(_))
        ));

        let display = DisplayDescriptor::new("x", "X", "  ");
        assert!(SessionConfig::resolve(&config, &display).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.toml");
        std::fs::write(&path, "[health]\nautoRecover = false\n").unwrap();

        let config = KioskConfig::from_file(&path).unwrap();
        assert!(!config.health.auto_recover);
        assert_eq!(config.health.max_recovery_attempts, 3);
    }

    #[test]
    fn test_log_level_parse() {
        let config = KioskConfig::from_toml_str("[logging]\nlogLevel = \"debug\"\n").unwrap();
        assert_eq!(config.logging.log_level, LogLevel::Debug);
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
    }
}
