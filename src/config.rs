//! Client configuration.
//!
//! Loaded from TOML; every field defaults so an empty file is valid.
//!
//! ```toml
//! [backend]
//! api_url = "http://localhost:3000"
//! ws_url = "ws://localhost:3000/ws"
//!
//! [transport.reconnect]
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 5
//!
//! [selection]
//! min_models = 2
//! max_models = 3
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ArenaError, Result};

/// File looked up by [`ArenaConfig::discover`].
pub const DEFAULT_CONFIG_FILE: &str = "model-arena.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArenaConfig {
    pub backend: BackendConfig,
    pub transport: TransportConfig,
    pub auth: AuthConfig,
    pub selection: SelectionBounds,
    pub history: HistoryConfig,
    pub streaming: StreamingConfig,
    pub notifications: NotificationConfig,
    /// Static bearer credential; only ever set from `ARENA_TOKEN`.
    #[serde(skip)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub api_url: String,
    pub ws_url: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            ws_url: "ws://localhost:3000/ws".to_string(),
            request_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub reconnect: ReconnectPolicy,
}

/// Exponential reconnect schedule for the streaming channel.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait after the `attempt`-th consecutive failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let ms = self
            .initial_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub token_retry: TokenRetryPolicy,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TokenRetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for TokenRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 300,
        }
    }
}

impl TokenRetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelectionBounds {
    pub min_models: usize,
    pub max_models: usize,
}

impl Default for SelectionBounds {
    fn default() -> Self {
        Self {
            min_models: 2,
            max_models: 3,
        }
    }
}

impl SelectionBounds {
    pub fn contains(&self, n: usize) -> bool {
        n >= self.min_models && n <= self.max_models
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Delay before the authoritative refresh after a finished comparison.
    pub refresh_delay_ms: u64,
    pub initial_fetch_delay_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            refresh_delay_ms: 1_000,
            initial_fetch_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Grace period once every model is terminal but `comparison_complete`
    /// has not arrived.
    pub settle_timeout_ms: u64,
    /// Upper bound for a whole round, measured from submission.
    pub round_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            settle_timeout_ms: 10_000,
            round_timeout_ms: 180_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    pub default_duration_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_duration_ms: 5_000,
        }
    }
}

impl ArenaConfig {
    /// Parse TOML text, then validate. Env overrides are not applied.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: ArenaConfig =
            toml::from_str(text).map_err(|e| ArenaError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load an explicit config file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ArenaError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut cfg = Self::from_toml_str(&text)?;
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Load `./model-arena.toml` when present, defaults otherwise.
    pub fn discover() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        if path.exists() {
            return Self::load(path);
        }
        let mut cfg = Self::default();
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Apply `ARENA_API_URL`, `ARENA_WS_URL` and `ARENA_TOKEN`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ARENA_API_URL").filter(|v| !v.is_empty()) {
            self.backend.api_url = v;
        }
        if let Some(v) = lookup("ARENA_WS_URL").filter(|v| !v.is_empty()) {
            self.backend.ws_url = v;
        }
        if let Some(v) = lookup("ARENA_TOKEN").filter(|v| !v.is_empty()) {
            self.token = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let sel = &self.selection;
        if sel.min_models == 0 {
            return Err(ArenaError::Config("selection.min_models must be >= 1".into()));
        }
        if sel.min_models > sel.max_models {
            return Err(ArenaError::Config(format!(
                "selection.min_models ({}) exceeds max_models ({})",
                sel.min_models, sel.max_models
            )));
        }
        let rc = &self.transport.reconnect;
        if rc.max_attempts == 0 {
            return Err(ArenaError::Config(
                "transport.reconnect.max_attempts must be >= 1".into(),
            ));
        }
        if rc.initial_delay_ms > rc.max_delay_ms {
            return Err(ArenaError::Config(
                "transport.reconnect.initial_delay_ms exceeds max_delay_ms".into(),
            ));
        }
        if self.auth.token_retry.max_attempts == 0 {
            return Err(ArenaError::Config(
                "auth.token_retry.max_attempts must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = ArenaConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ArenaConfig::default());
        assert_eq!(cfg.backend.request_timeout_ms, 60_000);
        assert_eq!(cfg.selection.min_models, 2);
        assert_eq!(cfg.selection.max_models, 3);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg = ArenaConfig::from_toml_str(
            "[transport.reconnect]\nmax_attempts = 8\n",
        )
        .unwrap();
        assert_eq!(cfg.transport.reconnect.max_attempts, 8);
        assert_eq!(cfg.transport.reconnect.initial_delay_ms, 1_000);
        assert_eq!(cfg.auth.token_retry.max_attempts, 10);
    }

    #[test]
    fn reconnect_delay_doubles_and_caps() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(5), Duration::from_secs(16));
        assert_eq!(p.delay_for(6), Duration::from_secs(30));
        assert_eq!(p.delay_for(60), Duration::from_secs(30));
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let err = ArenaConfig::from_toml_str("[selection]\nmin_models = 4\nmax_models = 3\n")
            .unwrap_err();
        assert!(err.to_string().contains("min_models"));
    }

    #[test]
    fn validate_rejects_zero_min() {
        assert!(ArenaConfig::from_toml_str("[selection]\nmin_models = 0\n").is_err());
    }

    #[test]
    fn validate_rejects_zero_reconnect_attempts() {
        assert!(
            ArenaConfig::from_toml_str("[transport.reconnect]\nmax_attempts = 0\n").is_err()
        );
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = ArenaConfig::from_toml_str("[backend\n").unwrap_err();
        assert!(matches!(err, ArenaError::Config(_)));
    }

    #[test]
    fn env_overrides_urls_and_token() {
        let env: HashMap<&str, &str> = [
            ("ARENA_API_URL", "https://api.example.com"),
            ("ARENA_WS_URL", "wss://api.example.com/ws"),
            ("ARENA_TOKEN", "tok"),
        ]
        .into_iter()
        .collect();
        let mut cfg = ArenaConfig::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.backend.api_url, "https://api.example.com");
        assert_eq!(cfg.backend.ws_url, "wss://api.example.com/ws");
        assert_eq!(cfg.token.as_deref(), Some("tok"));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut cfg = ArenaConfig::default();
        cfg.apply_env(|_| Some(String::new()));
        assert_eq!(cfg.backend.api_url, "http://localhost:3000");
        assert!(cfg.token.is_none());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arena.toml");
        std::fs::write(&path, "[history]\nrefresh_delay_ms = 250\n").unwrap();
        let cfg = ArenaConfig::load(&path).unwrap();
        assert_eq!(cfg.history.refresh_delay_ms, 250);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = ArenaConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ArenaError::Config(_)));
    }
}
