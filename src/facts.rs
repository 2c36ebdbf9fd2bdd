//! One-shot enumeration of the host entities the catalog is built from.
//!
//! Runs once at startup; the catalog stays immutable afterwards, so a disk
//! hot-plugged later is simply not monitored until restart.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ProbeError;
use crate::probe::run_command;

/// Physical block device worth monitoring.
#[derive(Debug, Clone)]
pub struct DiskEntity {
    /// Kernel name, e.g. `sda` or `nvme0n1`.
    pub name: String,
    pub model: Option<String>,
    pub size: Option<String>,
    pub transport: Option<String>,
    pub serial: Option<String>,
}

impl DiskEntity {
    pub fn device_path(&self) -> String {
        format!("/dev/{}", self.name)
    }

    /// Human-readable label for discovery names.
    pub fn display_name(&self) -> String {
        match (&self.model, &self.size) {
            (Some(model), Some(size)) => format!("{} ({model} {size})", self.name),
            (Some(model), None) => format!("{} ({model})", self.name),
            _ => self.name.clone(),
        }
    }
}

/// Everything the catalog needs to know about the host, discovered once.
#[derive(Debug, Clone, Default)]
pub struct HostFacts {
    /// Keyed by kernel device name; sorted so enumeration is deterministic.
    pub disks: BTreeMap<String, DiskEntity>,
    pub interfaces: BTreeSet<String>,
}

impl HostFacts {
    pub async fn discover(interface_allowlist: &[String]) -> Self {
        let disks = match enumerate_disks().await {
            Ok(disks) => disks,
            Err(e) => {
                warn!(error = %e, "disk enumeration failed; no disk sensors will be registered");
                BTreeMap::new()
            }
        };

        let interfaces = match if_addrs::get_if_addrs() {
            Ok(addrs) => {
                let names: BTreeSet<String> = addrs
                    .iter()
                    .filter(|iface| !iface.is_loopback())
                    .map(|iface| iface.name.clone())
                    .collect();
                filter_interfaces(names, interface_allowlist)
            }
            Err(e) => {
                warn!(error = %e, "interface enumeration failed; no network sensors will be registered");
                BTreeSet::new()
            }
        };

        debug!(disks = disks.len(), interfaces = interfaces.len(), "host facts discovered");
        Self { disks, interfaces }
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty() && self.interfaces.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: Option<String>,
    tran: Option<String>,
    serial: Option<String>,
    size: Option<String>,
    model: Option<String>,
}

const DISK_TRANSPORTS: &[&str] = &["sata", "nvme", "usb", "scsi"];

async fn enumerate_disks() -> Result<BTreeMap<String, DiskEntity>, ProbeError> {
    let output = run_command(
        "lsblk",
        &["-d", "-o", "NAME,TRAN,SERIAL,SIZE,MODEL", "-J"],
        Duration::from_secs(10),
    )
    .await?;
    parse_lsblk(&output)
}

fn parse_lsblk(raw: &str) -> Result<BTreeMap<String, DiskEntity>, ProbeError> {
    let output: LsblkOutput = serde_json::from_str(raw).map_err(|source| ProbeError::Parse {
        what: "lsblk",
        source,
    })?;

    let mut disks = BTreeMap::new();
    for device in output.blockdevices {
        let Some(name) = device.name else { continue };
        let transport = device.tran.unwrap_or_default();
        if !is_physical_disk(&name, &transport) {
            continue;
        }
        disks.insert(
            name.clone(),
            DiskEntity {
                name,
                model: device.model.filter(|m| !m.trim().is_empty()),
                size: device.size,
                transport: Some(transport),
                serial: device.serial,
            },
        );
    }
    Ok(disks)
}

fn is_physical_disk(name: &str, transport: &str) -> bool {
    let named_like_disk =
        name.starts_with("sd") || name.starts_with("nvme") || name.starts_with("hd");
    named_like_disk && DISK_TRANSPORTS.contains(&transport)
}

fn filter_interfaces(names: BTreeSet<String>, allowlist: &[String]) -> BTreeSet<String> {
    if allowlist.is_empty() {
        return names;
    }
    names
        .into_iter()
        .filter(|name| allowlist.iter().any(|allowed| allowed == name))
        .collect()
}
