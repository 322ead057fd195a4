use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// How often a calendar source is re-synced in the background.
///
/// "Realtime" is a display label inherited from the settings UI: it maps to a
/// 30-minute interval, not to an actual push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncFrequency {
    Realtime,
    Hourly,
    #[default]
    Daily,
}

impl SyncFrequency {
    /// Fixed tick interval for this frequency.
    pub fn interval(self) -> Duration {
        match self {
            SyncFrequency::Realtime => Duration::from_secs(30 * 60),
            SyncFrequency::Hourly => Duration::from_secs(60 * 60),
            SyncFrequency::Daily => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Settings-file label for this frequency.
    pub fn as_str(self) -> &'static str {
        match self {
            SyncFrequency::Realtime => "realtime",
            SyncFrequency::Hourly => "hourly",
            SyncFrequency::Daily => "daily",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Calendar sync settings
    #[serde(default)]
    pub calendar: CalendarConfig,
}

/// Calendar settings consumed by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Subscription feed URL (http, https or webcal scheme); empty disables
    /// the primary source.
    #[serde(default)]
    pub ical_url: String,

    /// Whether the Google Calendar secondary source is enabled
    #[serde(default)]
    pub google_calendar_enabled: bool,

    /// Background sync frequency
    #[serde(default)]
    pub sync_frequency: SyncFrequency,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            ical_url: String::new(),
            google_calendar_enabled: false,
            sync_frequency: SyncFrequency::Daily,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("weekplan");

        Self {
            config_dir,
            calendar: CalendarConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        if !validation.warnings.is_empty() {
            for warning in &validation.warnings {
                tracing::warn!("Config warning: {}", warning);
            }
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !self.calendar.ical_url.is_empty() {
            self.validate_feed_url(&self.calendar.ical_url, "calendar.ical_url", &mut result);
        } else if self.calendar.sync_frequency == SyncFrequency::Realtime {
            result.add_warning(
                "calendar.sync_frequency",
                "Frequent sync configured but no feed URL is set",
            );
        }

        result
    }

    /// Validate a calendar feed URL. Accepts http, https and webcal schemes;
    /// webcal is rewritten to https by the fetcher before use.
    fn validate_feed_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                let scheme = url.scheme();
                if scheme != "http" && scheme != "https" && scheme != "webcal" {
                    result.add_error(
                        field_name,
                        format!("URL must use http, https or webcal scheme, got: {}", scheme),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        // Ensure config directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("weekplan");

        Ok(config_dir.join("config.toml"))
    }
}
