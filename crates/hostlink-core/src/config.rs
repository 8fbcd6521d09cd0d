//! Configuration for the bridge.
//!
//! Configuration can be built in code with the `with_*` methods or loaded from
//! a TOML document:
//!
//! ```toml
//! metadata_wait_timeout_ms = 5000
//! max_header_bytes = 1048576
//! max_buffer_bytes = 16777216
//! strict_utf8 = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Configuration for bridge operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upper bound on how long a pending host call may park the caller.
    ///
    /// `None` waits for as long as the host takes, which is what the host
    /// contract promises to be finite.
    #[serde(rename = "metadata_wait_timeout_ms", with = "duration_ms_opt")]
    pub metadata_wait_timeout: Option<Duration>,

    /// Largest backing region accepted for a bulk header or trailer copy.
    ///
    /// Defaults to 1MB.
    pub max_header_bytes: usize,

    /// Largest body buffer read accepted in one call.
    ///
    /// Defaults to 16MB.
    pub max_buffer_bytes: usize,

    /// Reject header bytes that are not valid UTF-8 instead of replacing
    /// invalid sequences.
    pub strict_utf8: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            metadata_wait_timeout: None,
            max_header_bytes: 1024 * 1024,       // 1MB
            max_buffer_bytes: 16 * 1024 * 1024, // 16MB
            strict_utf8: true,
        }
    }
}

impl BridgeConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the wait on pending host calls.
    pub fn with_metadata_wait_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_wait_timeout = Some(timeout);
        self
    }

    /// Wait on pending host calls without a bound.
    pub fn without_metadata_wait_timeout(mut self) -> Self {
        self.metadata_wait_timeout = None;
        self
    }

    /// Set the bulk header/trailer copy limit.
    pub fn with_max_header_bytes(mut self, bytes: usize) -> Self {
        self.max_header_bytes = bytes;
        self
    }

    /// Set the body buffer read limit.
    pub fn with_max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    /// Enable or disable strict UTF-8 decoding of header bytes.
    pub fn with_strict_utf8(mut self, strict: bool) -> Self {
        self.strict_utf8 = strict;
        self
    }

    /// Conservative limits and a bounded wait.
    pub fn strict() -> Self {
        Self {
            metadata_wait_timeout: Some(Duration::from_secs(5)),
            max_header_bytes: 256 * 1024,      // 256KB
            max_buffer_bytes: 4 * 1024 * 1024, // 4MB
            strict_utf8: true,
        }
    }

    /// Generous limits, lossy header decoding and an unbounded wait.
    pub fn relaxed() -> Self {
        Self {
            metadata_wait_timeout: None,
            max_header_bytes: 16 * 1024 * 1024,  // 16MB
            max_buffer_bytes: 256 * 1024 * 1024, // 256MB
            strict_utf8: false,
        }
    }

    /// Parse a TOML document. Missing keys take their default values.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_header_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_header_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_buffer_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_buffer_bytes must be greater than zero".to_string(),
            ));
        }
        if self.metadata_wait_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid(
                "metadata_wait_timeout_ms must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Optional durations as whole milliseconds.
mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.metadata_wait_timeout, None);
        assert_eq!(config.max_header_bytes, 1024 * 1024);
        assert!(config.strict_utf8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BridgeConfig::new()
            .with_metadata_wait_timeout(Duration::from_millis(250))
            .with_max_header_bytes(4096)
            .with_strict_utf8(false);

        assert_eq!(config.metadata_wait_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.max_header_bytes, 4096);
        assert!(!config.strict_utf8);
    }

    #[test]
    fn test_config_presets() {
        let strict = BridgeConfig::strict();
        let relaxed = BridgeConfig::relaxed();

        assert!(strict.max_header_bytes < relaxed.max_header_bytes);
        assert!(strict.max_buffer_bytes < relaxed.max_buffer_bytes);
        assert!(strict.metadata_wait_timeout.is_some());
        assert!(relaxed.metadata_wait_timeout.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let config = BridgeConfig::from_toml_str(
            r#"
            metadata_wait_timeout_ms = 1500
            max_buffer_bytes = 2048
        "#,
        )
        .unwrap();

        assert_eq!(config.metadata_wait_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.max_buffer_bytes, 2048);
        assert_eq!(config.max_header_bytes, BridgeConfig::default().max_header_bytes);
    }

    #[test]
    fn test_config_rejects_zero_limits() {
        let result = BridgeConfig::from_toml_str("max_header_bytes = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = BridgeConfig::from_toml_str("metadata_wait_timeout_ms = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_rejects_bad_toml() {
        let result = BridgeConfig::from_toml_str("max_header_bytes = \"lots\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = BridgeConfig::strict();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(BridgeConfig::from_toml_str(&text).unwrap(), config);
    }
}
