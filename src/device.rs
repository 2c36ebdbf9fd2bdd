//! Device identity for the monitored host.

use crate::error::StartupError;

/// Identity of the monitored host, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Device {
    /// Stable slug used in topics and unique ids.
    pub id: String,
    pub name: String,
    pub sw_version: String,
    pub model: String,
}

impl Device {
    /// Resolve identity from config; "auto" falls back to the hostname.
    pub fn resolve(configured_name: &str) -> Result<Self, StartupError> {
        let name = if configured_name == "auto" {
            let hostname = gethostname::gethostname().to_string_lossy().trim().to_string();
            if hostname.is_empty() {
                return Err(StartupError::DeviceIdentity(
                    "hostname is empty and no device name is configured".to_string(),
                ));
            }
            hostname
        } else {
            configured_name.to_string()
        };

        let id = slugify(&name);
        if id.is_empty() {
            return Err(StartupError::DeviceIdentity(format!(
                "device name `{name}` does not yield a usable id"
            )));
        }

        let sw_version = sysinfo::System::long_os_version()
            .or_else(sysinfo::System::kernel_version)
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Device {
            id,
            name,
            sw_version,
            model: "Linux System Monitor".to_string(),
        })
    }
}

/// Lowercase the name and keep it topic-safe.
fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}
