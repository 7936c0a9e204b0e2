//! Remediation configuration
//!
//! Loaded once at startup from a TOML file with two tables:
//!
//! ```toml
//! [remediation]
//! auto_fix_enabled = true
//! auto_test_enabled = true
//! auto_deploy_enabled = false
//! require_approval = true
//! max_retries = 3
//! dry_run = false
//! notification_webhook = "https://hooks.example.com/remedy"
//!
//! [rollback]
//! backup_dir = ".remedy/backups"
//! max_backups = 100
//! ```
//!
//! Missing keys take their defaults. Nothing is read from the environment.

use crate::error::ConfigError;
use remedy_rollback::RollbackConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Workflow switches, immutable for the life of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Apply candidates at all (off: match and report only)
    pub auto_fix_enabled: bool,
    /// Run tests after each fix
    pub auto_test_enabled: bool,
    /// Deploy validated fixes
    pub auto_deploy_enabled: bool,
    /// Gate deployment on approval
    pub require_approval: bool,
    /// Fallback candidates tried after the first one fails
    pub max_retries: u32,
    /// Simulate success without touching anything
    pub dry_run: bool,
    /// Where to POST terminal results
    pub notification_webhook: Option<String>,
}

impl RemediationConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With automatic fixing toggled
    #[inline]
    #[must_use]
    pub fn with_auto_fix(mut self, enabled: bool) -> Self {
        self.auto_fix_enabled = enabled;
        self
    }

    /// With automatic testing toggled
    #[inline]
    #[must_use]
    pub fn with_auto_test(mut self, enabled: bool) -> Self {
        self.auto_test_enabled = enabled;
        self
    }

    /// With automatic deployment toggled
    #[inline]
    #[must_use]
    pub fn with_auto_deploy(mut self, enabled: bool) -> Self {
        self.auto_deploy_enabled = enabled;
        self
    }

    /// With approval gate toggled
    #[inline]
    #[must_use]
    pub fn with_require_approval(mut self, required: bool) -> Self {
        self.require_approval = required;
        self
    }

    /// With fallback candidate budget
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// With dry run toggled
    #[inline]
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// With notification webhook
    #[inline]
    #[must_use]
    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.notification_webhook = Some(url.into());
        self
    }

    /// Candidates attempted per error
    #[inline]
    #[must_use]
    pub fn candidate_budget(&self) -> usize {
        (self.max_retries as usize).saturating_add(1)
    }

    /// Check values that serde cannot
    ///
    /// # Errors
    /// `ConfigError::Invalid` if the webhook is not an http(s) URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(raw) = &self.notification_webhook {
            let url = reqwest::Url::parse(raw).map_err(|e| ConfigError::Invalid {
                field: "notification_webhook",
                message: e.to_string(),
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid {
                    field: "notification_webhook",
                    message: format!("unsupported scheme {}", url.scheme()),
                });
            }
        }
        Ok(())
    }
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            auto_fix_enabled: true,
            auto_test_enabled: true,
            auto_deploy_enabled: false,
            require_approval: true,
            max_retries: 3,
            dry_run: false,
            notification_webhook: None,
        }
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Workflow switches
    pub remediation: RemediationConfig,
    /// Backup storage
    pub rollback: RollbackConfig,
}

impl Settings {
    /// Parse and validate TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` or `ConfigError::Invalid`
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io`, `ConfigError::Parse` or `ConfigError::Invalid`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings = Self::from_toml_str(&raw)?;
        tracing::info!(path = %path.display(), dry_run = settings.remediation.dry_run, "configuration loaded");
        Ok(settings)
    }

    /// Validate every section
    ///
    /// # Errors
    /// `ConfigError::Invalid` on the first bad value
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.remediation.validate()?;
        if self.rollback.max_backups == 0 {
            return Err(ConfigError::Invalid {
                field: "max_backups",
                message: "must keep at least one backup".into(),
            });
        }
        Ok(())
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Fails only if a value cannot be represented in TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
