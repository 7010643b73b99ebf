use std::io::Error as IoError;

use thiserror::Error;

use crate::monitoring::scheduler::SchedulerKind;

/// Failures raised while creating or driving a scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No async runtime available to drive the {0} scheduler")]
    RuntimeUnavailable(SchedulerKind),
    #[error("Network event source unavailable: {0:#}")]
    EventSourceUnavailable(anyhow::Error),
    #[error("The {0} scheduler was already scheduled")]
    AlreadyScheduled(SchedulerKind),
    #[error("The {0} scheduler has not been scheduled yet")]
    NotScheduled(SchedulerKind),
    #[error("The {0} scheduler was destroyed")]
    Destroyed(SchedulerKind),
    #[error("The {0} scheduler needs a non-zero interval")]
    ZeroInterval(SchedulerKind),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0:#}")]
    ReadFailed(#[source] IoError),
    #[error("Failed to write config: {0:#}")]
    WriteFailed(#[source] IoError),
    #[error("Failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("No config path available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("Invalid configuration: {0:#}")]
    Invalid(anyhow::Error),
}
