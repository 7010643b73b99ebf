use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::monitoring::scheduler::{AlarmMode, SchedulerKind};
use crate::monitoring::validation;
use crate::preferences::Settings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub probe: ProbeConfig,
    pub storage: StorageConfig,
    pub report: ReportConfig,
    pub alert: AlertConfig,
    pub location: LocationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_millis: u64,
    /// 0 disables wake assertions
    pub wake_interval_millis: u64,
    pub kind: SchedulerKind,
    pub alarm_mode: AlarmMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub host: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: path::PathBuf,
    /// 0 keeps every sample
    pub retention_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub interval_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub min_interval_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub enabled: bool,
    pub refresh_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_millis: 10_000,
            wake_interval_millis: 0,
            kind: SchedulerKind::Alarm,
            alarm_mode: AlarmMode::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { host: "www.google.com".into(), enabled: true }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_path: default_database_path(), retention_count: 10_000 }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { webhook_url: None, interval_millis: 24 * 60 * 60 * 1000 }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { enabled: true, min_interval_millis: 15 * 60 * 1000 }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self { enabled: false, refresh_interval_secs: 3600 }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/netmon/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("netmon/config.toml"))
}

/// $XDG_DATA_HOME/netmon/samples.db, falling back to the working directory
fn default_database_path() -> path::PathBuf {
    let data_home = if let Ok(data_home) = env::var("XDG_DATA_HOME") {
        path::PathBuf::from(data_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".local/share")
    } else {
        return path::PathBuf::from("netmon-samples.db");
    };

    data_home.join("netmon/samples.db")
}

/// Resolve the config file to use, honouring an explicit path
pub fn resolve_path(optional_path: Option<impl AsRef<path::Path>>) -> Result<path::PathBuf, ConfigError> {
    match optional_path {
        Some(path) => Ok(normalize_toml_path(path.as_ref())),
        None => default_config_path(),
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Monitoring Configuration:")?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Kind", &self.scheduler.kind)?;
        write_1(f, "Interval (ms)", &self.scheduler.interval_millis)?;
        write_1(f, "Wake Interval (ms)", &self.scheduler.wake_interval_millis)?;
        write_1(f, "Alarm Mode", &format!("{:?}", self.scheduler.alarm_mode))?;

        write_title_1(f, "Probe")?;
        write_1(f, "Enabled", &self.probe.enabled)?;
        write_1(f, "Host", &self.probe.host)?;

        write_title_1(f, "Storage")?;
        write_1(f, "Database", &self.storage.database_path.display())?;
        write_1(f, "Retention", &self.storage.retention_count)?;

        write_title_1(f, "Report")?;
        write_1(f, "Webhook", &self.report.webhook_url.as_deref().unwrap_or("disabled"))?;
        write_1(f, "Interval (ms)", &self.report.interval_millis)?;

        write_title_1(f, "Alert")?;
        write_1(f, "Enabled", &self.alert.enabled)?;
        write_1(f, "Min Interval (ms)", &self.alert.min_interval_millis)?;

        write_title_1(f, "Location")?;
        write_1(f, "Enabled", &self.location.enabled)?;
        write_1(f, "Refresh (s)", &self.location.refresh_interval_secs)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/netmon/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path = resolve_path(optional_path)?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Read and validate an existing config file
    pub fn load(path: &path::Path) -> Result<Self, ConfigError> {
        let raw_string = fs::read_to_string(path).map_err(ConfigError::ReadFailed)?;
        let config: Self = toml::from_str(raw_string.as_str())?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        fs::write(path, config_str).map_err(ConfigError::WriteFailed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate_sampling_interval(self.scheduler.interval_millis)
            .and_then(|_| validation::validate_wake_interval(self.scheduler.wake_interval_millis))
            .and_then(|_| validation::validate_probe_host(&self.probe.host))
            .and_then(|_| match &self.report.webhook_url {
                Some(url) => validation::validate_report_url(url),
                None => Ok(()),
            })
            .map_err(ConfigError::Invalid)
    }

    /// The live-adjustable part of the configuration
    pub fn settings(&self) -> Settings {
        Settings {
            interval_millis: self.scheduler.interval_millis,
            wake_interval_millis: self.scheduler.wake_interval_millis,
            scheduler_kind: self.scheduler.kind,
            retention_count: self.storage.retention_count,
            probe_host: self.probe.host.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let config = Config::from_config(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.scheduler.interval_millis, 10_000);
        assert_eq!(config.scheduler.kind, SchedulerKind::Alarm);
        assert_eq!(config.scheduler.alarm_mode, AlarmMode::SelfRescheduling);
        assert_eq!(config.probe.host, "www.google.com");

        let reread = Config::load(&path).unwrap();
        assert_eq!(reread, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[scheduler]\nkind = \"network_change\"\ninterval_millis = 60000\n\n[storage]\nretention_count = 0\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.scheduler.kind, SchedulerKind::NetworkChange);
        assert_eq!(config.scheduler.wake_interval_millis, 0);
        assert_eq!(config.storage.retention_count, 0);
        assert!(config.report.webhook_url.is_none());

        let settings = config.settings();
        assert_eq!(settings.interval_millis, 60_000);
        assert_eq!(settings.scheduler_kind, SchedulerKind::NetworkChange);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(&path, "[scheduler]\ninterval_millis = 500\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, "[probe]\nhost = \"http://example.com\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, "[scheduler]\nkind = \"cron\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn test_normalize_toml_path() {
        assert_eq!(normalize_toml_path(path::Path::new("/tmp/netmon")), path::PathBuf::from("/tmp/netmon.toml"));
        assert_eq!(
            normalize_toml_path(path::Path::new("/tmp/netmon.toml")),
            path::PathBuf::from("/tmp/netmon.toml")
        );
    }

    #[test]
    fn test_display_lists_sections() {
        let shown = Config::default().to_string();
        assert!(shown.contains("Scheduler"));
        assert!(shown.contains("Kind: alarm"));
        assert!(shown.contains("Webhook: disabled"));
    }
}
