//! Validation for user supplied monitoring settings.
//!
//! Applied to the config file on load and reload, and to command line
//! overrides, before any value reaches the preferences.

use anyhow::{Result, anyhow};
use std::net::IpAddr;
use url::{Host, Url};

/// Shortest sampling interval accepted (2 seconds)
pub const MIN_INTERVAL_MILLIS: u64 = 2_000;
/// Longest sampling interval accepted (24 hours)
pub const MAX_INTERVAL_MILLIS: u64 = 86_400_000;

/// Validate the host the reachability probe targets
///
/// Accepts a bare hostname or IP literal. Schemes, ports and paths are
/// rejected since the probe always talks HTTP on port 80.
pub fn validate_probe_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(anyhow!("Probe host must not be empty"));
    }
    if host.contains("://") || host.contains('/') || host.contains(char::is_whitespace) {
        return Err(anyhow!("Probe host must be a bare hostname: {}", host));
    }

    let url = Url::parse(&format!("http://{}/", host))
        .map_err(|e| anyhow!("Invalid probe host {}: {}", host, e))?;
    if url.port().is_some() {
        return Err(anyhow!("Probe host must not carry a port: {}", host));
    }
    match url.host() {
        Some(Host::Domain(_)) | Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => {}
        None => return Err(anyhow!("Invalid probe host: {}", host)),
    }

    if is_private_or_local(host.trim_matches(|c| c == '[' || c == ']')) {
        tracing::warn!("Probe host {} is a local address, results will not reflect internet reachability", host);
    }

    Ok(())
}

/// Validate the sampling interval
pub fn validate_sampling_interval(interval_millis: u64) -> Result<()> {
    if interval_millis < MIN_INTERVAL_MILLIS {
        return Err(anyhow!(
            "Sampling interval too short: {} ms (minimum: {})",
            interval_millis,
            MIN_INTERVAL_MILLIS
        ));
    }

    if interval_millis > MAX_INTERVAL_MILLIS {
        return Err(anyhow!(
            "Sampling interval too long: {} ms (maximum: {})",
            interval_millis,
            MAX_INTERVAL_MILLIS
        ));
    }

    Ok(())
}

/// Validate the wake interval. Zero disables wake assertions.
pub fn validate_wake_interval(wake_interval_millis: u64) -> Result<()> {
    if wake_interval_millis > MAX_INTERVAL_MILLIS {
        return Err(anyhow!(
            "Wake interval too long: {} ms (maximum: {})",
            wake_interval_millis,
            MAX_INTERVAL_MILLIS
        ));
    }
    Ok(())
}

/// Validate the webhook the daily report is posted to
pub fn validate_report_url(target: &str) -> Result<()> {
    let url = Url::parse(target).map_err(|e| anyhow!("Invalid URL: {}", e))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("Invalid scheme for report webhook: {}", other)),
    }

    let Some(host) = url.host_str() else {
        return Err(anyhow!("Report webhook has no host: {}", target));
    };

    if url.port() == Some(0) {
        return Err(anyhow!("Port 0 is not valid"));
    }

    if is_private_or_local(host) && url.scheme() == "http" {
        tracing::warn!("Report webhook {} is a plain http local address", host);
    }

    Ok(())
}

/// Check if hostname/IP is private or localhost
fn is_private_or_local(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
        return true;
    }

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ipv4)) => {
            ipv4.is_private()
                || ipv4.is_loopback()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
        }
        Ok(IpAddr::V6(ipv6)) => ipv6.is_loopback() || ipv6.is_unspecified(),
        Err(_) => false,
    }
}
