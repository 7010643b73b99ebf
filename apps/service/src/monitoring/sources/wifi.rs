use anyhow::Result;
use async_trait::async_trait;

use crate::monitoring::aggregator::FieldSource;
use crate::monitoring::sysfs::SysfsRoot;
use crate::monitoring::types::Fields;

pub const WIFI_INTERFACE: &str = "WIFI_INTERFACE";
pub const WIFI_LINK_QUALITY: &str = "WIFI_LINK_QUALITY";
pub const WIFI_SIGNAL_STRENGTH: &str = "WIFI_SIGNAL_STRENGTH";

/// Signal figures of the first associated wireless interface
pub struct WifiSignalSource {
    root: SysfsRoot,
}

impl WifiSignalSource {
    pub fn new(root: SysfsRoot) -> Self {
        Self { root }
    }
}

#[async_trait]
impl FieldSource for WifiSignalSource {
    fn name(&self) -> &'static str {
        "wifi"
    }

    async fn get_fields(&self) -> Result<Fields> {
        let mut fields = Fields::new();
        if let Some(status) = self.root.wireless()?.into_iter().next() {
            fields.insert(WIFI_INTERFACE, status.interface);
            fields.insert(WIFI_LINK_QUALITY, format!("{}", status.link_quality));
            fields.insert(WIFI_SIGNAL_STRENGTH, format!("{}", status.signal_dbm));
        }
        Ok(fields)
    }
}
