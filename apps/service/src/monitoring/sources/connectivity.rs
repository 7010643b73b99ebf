use anyhow::Result;
use async_trait::async_trait;

use crate::monitoring::aggregator::FieldSource;
use crate::monitoring::sysfs::SysfsRoot;
use crate::monitoring::types::Fields;

pub const NETWORK_INTERFACE: &str = "NETWORK_INTERFACE";
pub const NETWORK_TYPE: &str = "NETWORK_TYPE";
pub const IS_CONNECTED: &str = "IS_CONNECTED";

/// Reports the active interface and its link type
pub struct ConnectivitySource {
    root: SysfsRoot,
}

impl ConnectivitySource {
    pub fn new(root: SysfsRoot) -> Self {
        Self { root }
    }
}

#[async_trait]
impl FieldSource for ConnectivitySource {
    fn name(&self) -> &'static str {
        "connectivity"
    }

    async fn get_fields(&self) -> Result<Fields> {
        let mut fields = Fields::new();
        match self.root.active_interface()? {
            Some(iface) => {
                fields.insert(NETWORK_INTERFACE, iface.name);
                fields.insert(NETWORK_TYPE, iface.kind.as_str());
                fields.insert(IS_CONNECTED, "true");
            }
            None => fields.insert(IS_CONNECTED, "false"),
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::sysfs::fixtures::add_interface;

    #[tokio::test]
    async fn test_reports_active_interface() {
        let dir = tempfile::tempdir().unwrap();
        add_interface(dir.path(), "lo", "unknown", false);
        add_interface(dir.path(), "eth0", "up", false);

        let fields = ConnectivitySource::new(SysfsRoot::new(dir.path())).get_fields().await.unwrap();
        assert_eq!(fields.get(NETWORK_INTERFACE), Some("eth0"));
        assert_eq!(fields.get(NETWORK_TYPE), Some("ETHERNET"));
        assert_eq!(fields.get(IS_CONNECTED), Some("true"));
    }

    #[tokio::test]
    async fn test_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        add_interface(dir.path(), "wlan0", "down", true);

        let fields = ConnectivitySource::new(SysfsRoot::new(dir.path())).get_fields().await.unwrap();
        assert_eq!(fields.get(IS_CONNECTED), Some("false"));
        assert_eq!(fields.get(NETWORK_TYPE), None);
    }
}
