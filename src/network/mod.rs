//! Link monitoring for the uplink interface.
//!
//! Association and DHCP stay with the OS network stack; the agent only watches the
//! interface and reports signal strength when the kernel exposes it.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Interface {0} does not exist")]
    UnknownInterface(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperState {
    Up,
    Down,
    Dormant,
    Unknown(String),
}

impl OperState {
    fn parse(value: &str) -> Self {
        match value.trim() {
            "up" => OperState::Up,
            "down" => OperState::Down,
            "dormant" => OperState::Dormant,
            other => OperState::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OperState::Up => write!(f, "up"),
            OperState::Down => write!(f, "down"),
            OperState::Dormant => write!(f, "dormant"),
            OperState::Unknown(state) => write!(f, "{}", state),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub interface: String,
    pub operstate: OperState,
    pub rssi_dbm: Option<i32>,
}

impl LinkStatus {
    pub fn is_up(&self) -> bool {
        self.operstate == OperState::Up
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} is {}", self.interface, self.operstate)?;
        if let Some(rssi) = self.rssi_dbm {
            write!(f, ", signal {} dBm", rssi)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LinkMonitor {
    interface: String,
    sys_class_net: PathBuf,
    proc_wireless: PathBuf,
}

impl LinkMonitor {
    pub fn new(interface: impl Into<String>) -> Self {
        Self::with_roots(interface, "/sys/class/net", "/proc/net/wireless")
    }

    pub fn with_roots(
        interface: impl Into<String>,
        sys_class_net: impl Into<PathBuf>,
        proc_wireless: impl Into<PathBuf>,
    ) -> Self {
        Self {
            interface: interface.into(),
            sys_class_net: sys_class_net.into(),
            proc_wireless: proc_wireless.into(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn status(&self) -> Result<LinkStatus, NetworkError> {
        let iface_dir = self.sys_class_net.join(&self.interface);
        if !iface_dir.exists() {
            return Err(NetworkError::UnknownInterface(self.interface.clone()));
        }

        let operstate_path = iface_dir.join("operstate");
        let operstate = read(&operstate_path).map(|s| OperState::parse(&s))?;

        // Not every interface is wireless, and not every kernel has the proc file
        let rssi_dbm = std::fs::read_to_string(&self.proc_wireless)
            .ok()
            .and_then(|content| parse_wireless_rssi(&content, &self.interface));

        let status = LinkStatus {
            interface: self.interface.clone(),
            operstate,
            rssi_dbm,
        };
        debug!("Link status: {}", status);
        Ok(status)
    }
}

fn read(path: &Path) -> Result<String, NetworkError> {
    std::fs::read_to_string(path).map_err(|source| NetworkError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Signal level for `interface` from `/proc/net/wireless` content.
pub fn parse_wireless_rssi(content: &str, interface: &str) -> Option<i32> {
    let prefix = format!("{}:", interface);
    content.lines().find_map(|line| {
        let line = line.trim_start();
        let rest = line.strip_prefix(&prefix)?;
        // status, link quality, signal level, noise, ...
        let level = rest.split_whitespace().nth(2)?;
        level.trim_end_matches('.').parse::<f64>().ok().map(|v| v as i32)
    })
}
