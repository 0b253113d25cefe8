//! Configuration loading
//!
//! Settings come from an optional TOML file; every section falls back to its
//! defaults, and the binary applies command-line overrides on top.

mod schema;

pub use schema::*;

use std::path::Path;

use crate::error::{AppError, Result};

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AppError::Config(format!("Invalid config: {}", e)))
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.stream.fps == 0 {
            return Err(AppError::Config("stream.fps must be greater than 0".into()));
        }
        for (name, quality) in [
            ("stream.quality", self.stream.quality),
            ("capture.quality", self.capture.quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(AppError::Config(format!(
                    "{} must be between 1 and 100, got {}",
                    name, quality
                )));
            }
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(AppError::Config("stream resolution must be nonzero".into()));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(AppError::Config("capture resolution must be nonzero".into()));
        }
        if self.stream.init_retries == 0 {
            return Err(AppError::Config(
                "stream.init_retries must be at least 1".into(),
            ));
        }
        if self.power.idle_timeout_secs == 0 {
            return Err(AppError::Config(
                "power.idle_timeout_secs must be greater than 0".into(),
            ));
        }
        if let Some(shutdown) = self.power.shutdown_timeout() {
            if self.power.idle_timeout() > shutdown {
                return Err(AppError::Config(format!(
                    "power.idle_timeout_secs ({}) exceeds power.shutdown_timeout_secs ({})",
                    self.power.idle_timeout_secs, self.power.shutdown_timeout_secs
                )));
            }
        }
        // Streams refresh client liveness only at the keep-alive interval
        if self.stream.keepalive() >= self.power.client_timeout() {
            return Err(AppError::Config(format!(
                "stream.keepalive_secs ({}) must be below power.client_timeout_secs ({})",
                self.stream.keepalive_secs, self.power.client_timeout_secs
            )));
        }
        if self.power.execute_power_off && self.power.power_off_command.is_empty() {
            return Err(AppError::Config(
                "power.power_off_command is empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::PixelFormat;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.stream.fps, 10);
        assert_eq!(config.stream.quality, 50);
        assert_eq!(config.stream.failure_budget, 30);
        assert_eq!(config.capture.resolution().to_string(), "2592x1944");
        assert_eq!(config.power.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.power.shutdown_timeout(), None);
        assert_eq!(config.device.lock_timeout(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [stream]
            fps = 15
            quality = 70

            [device]
            format = "YUYV"

            [power]
            idle_timeout_secs = 30
            shutdown_timeout_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.stream.fps, 15);
        assert_eq!(config.stream.width, 320);
        assert_eq!(config.device.format, PixelFormat::Yuyv);
        assert_eq!(config.power.shutdown_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.web.port, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.stream.fps = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.capture.quality = 101;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.power.idle_timeout_secs = 600;
        config.power.shutdown_timeout_secs = 300;
        assert!(config.validate().is_err());

        // A disabled shutdown timeout never conflicts with the idle timeout
        config.power.shutdown_timeout_secs = 0;
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.stream.keepalive_secs = 60;
        config.power.client_timeout_secs = 60;
        assert!(config.validate().is_err());
        config.stream.keepalive_secs = 59;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml() {
        let err = AppConfig::from_toml("[stream]\nfps = \"fast\"").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camkeeper.toml");
        std::fs::write(&path, "[web]\nport = 8080\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.web.port, 8080);

        assert!(AppConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
