//! Readers for the Linux network state exposed under `/sys` and `/proc`.
//!
//! Everything is rooted at a configurable directory so tests can build a
//! fake tree.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Link technology of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Wifi,
    Mobile,
    Ethernet,
    Loopback,
    Other,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Wifi => "WIFI",
            LinkKind::Mobile => "MOBILE",
            LinkKind::Ethernet => "ETHERNET",
            LinkKind::Loopback => "LOOPBACK",
            LinkKind::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceState {
    pub name: String,
    pub kind: LinkKind,
    /// Contents of `operstate` ("up", "down", "dormant", ...)
    pub operstate: String,
}

impl InterfaceState {
    pub fn is_up(&self) -> bool {
        self.operstate == "up"
    }
}

/// One row of `/proc/net/wireless`
#[derive(Debug, Clone, PartialEq)]
pub struct WirelessStatus {
    pub interface: String,
    pub link_quality: f64,
    pub signal_dbm: f64,
}

#[derive(Debug, Clone)]
pub struct SysfsRoot {
    root: PathBuf,
}

impl Default for SysfsRoot {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SysfsRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn net_class_dir(&self) -> PathBuf {
        self.path("sys/class/net")
    }

    /// All interfaces under `/sys/class/net`, sorted by name.
    pub fn interfaces(&self) -> Result<Vec<InterfaceState>> {
        let dir = self.net_class_dir();
        let entries =
            fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))?;

        let mut interfaces = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();
            let operstate = read_trimmed(&path.join("operstate")).unwrap_or_else(|| "unknown".into());
            interfaces.push(InterfaceState { kind: classify(&name, &path), name, operstate });
        }
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(interfaces)
    }

    /// Preferred active interface: wifi, then ethernet, then mobile.
    pub fn active_interface(&self) -> Result<Option<InterfaceState>> {
        let mut up: Vec<_> = self
            .interfaces()?
            .into_iter()
            .filter(|iface| iface.is_up() && iface.kind != LinkKind::Loopback)
            .collect();
        up.sort_by_key(|iface| match iface.kind {
            LinkKind::Wifi => 0,
            LinkKind::Ethernet => 1,
            LinkKind::Mobile => 2,
            _ => 3,
        });
        Ok(up.into_iter().next())
    }

    pub fn wireless(&self) -> Result<Vec<WirelessStatus>> {
        let path = self.path("proc/net/wireless");
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(parse_wireless(&raw))
    }

    /// True if every rfkill switch is soft-blocked, i.e. airplane mode.
    pub fn airplane_mode(&self) -> bool {
        let Ok(entries) = fs::read_dir(self.path("sys/class/rfkill")) else {
            return false;
        };
        let states: Vec<bool> = entries
            .flatten()
            .filter_map(|entry| read_trimmed(&entry.path().join("soft")))
            .map(|soft| soft == "1")
            .collect();
        !states.is_empty() && states.iter().all(|blocked| *blocked)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn classify(name: &str, path: &Path) -> LinkKind {
    if name == "lo" {
        LinkKind::Loopback
    } else if path.join("wireless").exists() || path.join("phy80211").exists() {
        LinkKind::Wifi
    } else if name.starts_with("wwan") || name.starts_with("ppp") || name.starts_with("rmnet") {
        LinkKind::Mobile
    } else if name.starts_with("eth") || name.starts_with("en") {
        LinkKind::Ethernet
    } else {
        LinkKind::Other
    }
}

/// Parse `/proc/net/wireless`. The first two lines are headers; each data
/// line looks like `wlan0: 0000   54.  -56.  -256  0 0 0 0 0 0`.
fn parse_wireless(raw: &str) -> Vec<WirelessStatus> {
    raw.lines()
        .skip(2)
        .filter_map(|line| {
            let (interface, rest) = line.split_once(':')?;
            let mut columns = rest.split_whitespace().skip(1);
            let link_quality = columns.next()?.trim_end_matches('.').parse().ok()?;
            let signal_dbm = columns.next()?.trim_end_matches('.').parse().ok()?;
            Some(WirelessStatus { interface: interface.trim().to_string(), link_quality, signal_dbm })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::fs;
    use std::path::Path;

    pub fn add_interface(root: &Path, name: &str, operstate: &str, wireless: bool) {
        let dir = root.join("sys/class/net").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("operstate"), format!("{operstate}\n")).unwrap();
        if wireless {
            fs::create_dir_all(dir.join("wireless")).unwrap();
        }
    }

    pub fn set_operstate(root: &Path, name: &str, operstate: &str) {
        let dir = root.join("sys/class/net").join(name);
        fs::write(dir.join("operstate"), format!("{operstate}\n")).unwrap();
    }

    pub fn write_wireless(root: &Path, body: &str) {
        let dir = root.join("proc/net");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("wireless"),
            format!(
                "Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE\n \
                 face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22\n{body}"
            ),
        )
        .unwrap();
    }

    pub fn add_rfkill(root: &Path, name: &str, soft_blocked: bool) {
        let dir = root.join("sys/class/rfkill").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("soft"), if soft_blocked { "1\n" } else { "0\n" }).unwrap();
    }
}
