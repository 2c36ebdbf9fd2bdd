//! Sensor catalog.
//!
//! Built once at startup from the discovered host facts and immutable for
//! the process lifetime. Every published metric is described by one
//! [`SensorDescriptor`]: its cadence, its discovery metadata, and where its
//! value comes from (the shared combined sample, a direct probe, or an
//! alias that only re-templates another sensor's topic).

use crate::device::Device;
use crate::error::ProbeError;
use crate::facts::HostFacts;
use crate::measurement::{Measurement, StateValue};
use crate::probe::ProbeKind;

/// Update frequency class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Fast,
    Slow,
    OneTime,
}

impl Cadence {
    pub fn group(&self) -> &'static str {
        match self {
            Cadence::Fast => "fast",
            Cadence::Slow => "slow",
            Cadence::OneTime => "onetime",
        }
    }
}

/// Field of the shared combined measurement a sensor reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedMetric {
    CpuUsage,
    DiskRead,
    DiskWrite,
    DiskUtil,
}

/// Where a sensor's value comes from.
#[derive(Debug, Clone)]
pub enum ValueSource {
    /// Extracted from the shared combined sample.
    Cached(CachedMetric),
    /// Its own direct metric-source call.
    Probe(ProbeKind),
    /// Discovery-only component reading another sensor's state topic
    /// through a different value template; never published itself.
    Alias,
}

/// Static metadata plus extraction rule for one published metric.
#[derive(Debug, Clone)]
pub struct SensorDescriptor {
    /// Globally unique id, `{device_id}_{object}`.
    pub id: String,
    pub object: String,
    pub name: String,
    pub cadence: Cadence,
    /// State topic component; aliases point at another sensor's key.
    pub topic_key: String,
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub icon: Option<&'static str>,
    pub value_template: Option<String>,
    pub attributes_template: Option<String>,
    /// Disk or interface this sensor was instantiated for, if any.
    pub entity: Option<String>,
    pub source: ValueSource,
}

impl SensorDescriptor {
    /// Whether the scheduler publishes this sensor (aliases it does not).
    pub fn is_published(&self) -> bool {
        !matches!(self.source, ValueSource::Alias)
    }

    /// Apply this sensor's extraction rule to the shared measurement.
    pub fn extract(&self, measurement: &Measurement) -> Result<StateValue, ProbeError> {
        let ValueSource::Cached(metric) = &self.source else {
            return Err(ProbeError::MissingField(format!(
                "sensor `{}` does not read the shared sample",
                self.id
            )));
        };

        match metric {
            CachedMetric::CpuUsage => Ok(StateValue::Number(100.0 - measurement.cpu_idle)),
            CachedMetric::DiskRead | CachedMetric::DiskWrite | CachedMetric::DiskUtil => {
                let disk = self.entity.as_deref().ok_or_else(|| {
                    ProbeError::MissingField(format!("sensor `{}` has no disk entity", self.id))
                })?;
                let io = measurement
                    .disks
                    .get(disk)
                    .ok_or_else(|| ProbeError::MissingField(format!("disk `{disk}`")))?;
                Ok(StateValue::Number(match metric {
                    CachedMetric::DiskRead => io.read_kb_s,
                    CachedMetric::DiskWrite => io.write_kb_s,
                    _ => io.util_pct,
                }))
            }
        }
    }
}

/// Read-only sensor registry; ordered, deterministic, safe to share.
#[derive(Debug)]
pub struct Catalog {
    sensors: Vec<SensorDescriptor>,
}

impl Catalog {
    /// Enumerate every sensor for the host: the static set plus one group
    /// per discovered disk and interface, in lexicographic entity order.
    pub fn build(device: &Device, facts: &HostFacts) -> Self {
        let mut sensors = Vec::new();
        let dev = &device.id;

        sensors.push(SensorDescriptor {
            id: format!("{dev}_uptime"),
            object: "uptime".to_string(),
            name: "Uptime".to_string(),
            cadence: Cadence::OneTime,
            topic_key: "uptime".to_string(),
            unit: Some("s"),
            device_class: None,
            state_class: None,
            icon: Some("mdi:timer-outline"),
            value_template: Some("{{ value_json.uptime }}".to_string()),
            attributes_template: None,
            entity: None,
            source: ValueSource::Probe(ProbeKind::Uptime),
        });
        sensors.push(SensorDescriptor {
            id: format!("{dev}_last_boot"),
            object: "last_boot".to_string(),
            name: "Last Boot".to_string(),
            cadence: Cadence::OneTime,
            topic_key: "uptime".to_string(),
            unit: None,
            device_class: Some("timestamp"),
            state_class: None,
            icon: Some("mdi:clock"),
            value_template: Some(
                "{{ now() - timedelta( seconds = value_json.uptime | int(0) ) }}".to_string(),
            ),
            attributes_template: None,
            entity: None,
            source: ValueSource::Alias,
        });

        sensors.push(SensorDescriptor {
            id: format!("{dev}_cpu_usage"),
            object: "cpu_usage".to_string(),
            name: "CPU Usage".to_string(),
            cadence: Cadence::Fast,
            topic_key: "cpu_usage".to_string(),
            unit: Some("%"),
            device_class: None,
            state_class: Some("measurement"),
            icon: Some("mdi:cpu-64-bit"),
            value_template: None,
            attributes_template: None,
            entity: None,
            source: ValueSource::Cached(CachedMetric::CpuUsage),
        });
        sensors.push(SensorDescriptor {
            id: format!("{dev}_cpu_temp"),
            object: "cpu_temp".to_string(),
            name: "CPU Temperature".to_string(),
            cadence: Cadence::Fast,
            topic_key: "cpu_temp".to_string(),
            unit: Some("°C"),
            device_class: Some("temperature"),
            state_class: Some("measurement"),
            icon: Some("mdi:thermometer"),
            value_template: Some("{{ value_json.temperature }}".to_string()),
            attributes_template: Some("{{ value_json.attrs | tojson }}".to_string()),
            entity: None,
            source: ValueSource::Probe(ProbeKind::CpuTemperature),
        });
        sensors.push(SensorDescriptor {
            id: format!("{dev}_memory_usage"),
            object: "memory_usage".to_string(),
            name: "Memory Usage".to_string(),
            cadence: Cadence::Fast,
            topic_key: "memory_usage".to_string(),
            unit: Some("%"),
            device_class: None,
            state_class: Some("measurement"),
            icon: Some("mdi:memory"),
            value_template: Some("{{ value_json.mem_usage }}".to_string()),
            attributes_template: Some("{{ value_json.mem | tojson }}".to_string()),
            entity: None,
            source: ValueSource::Probe(ProbeKind::MemoryUsage),
        });
        sensors.push(SensorDescriptor {
            id: format!("{dev}_swap_usage"),
            object: "swap_usage".to_string(),
            name: "Swap Usage".to_string(),
            cadence: Cadence::Fast,
            topic_key: "memory_usage".to_string(),
            unit: Some("%"),
            device_class: None,
            state_class: Some("measurement"),
            icon: Some("mdi:memory"),
            value_template: Some("{{ value_json.swap_usage }}".to_string()),
            attributes_template: Some("{{ value_json.swap | tojson }}".to_string()),
            entity: None,
            source: ValueSource::Alias,
        });

        for (disk_name, disk) in &facts.disks {
            let safe = sanitize(disk_name);
            let display = disk.display_name();
            let path = disk.device_path();

            sensors.push(SensorDescriptor {
                id: format!("{dev}_disk_temp_{safe}"),
                object: format!("disk_temp_{safe}"),
                name: format!("Disk Temperature ({display})"),
                cadence: Cadence::Fast,
                topic_key: format!("disk_temp_{safe}"),
                unit: Some("°C"),
                device_class: Some("temperature"),
                state_class: Some("measurement"),
                icon: Some("mdi:harddisk"),
                value_template: None,
                attributes_template: None,
                entity: Some(disk_name.clone()),
                source: ValueSource::Probe(ProbeKind::DiskTemperature {
                    device: path.clone(),
                }),
            });
            sensors.push(SensorDescriptor {
                id: format!("{dev}_disk_read_{safe}"),
                object: format!("disk_read_{safe}"),
                name: format!("Disk Read ({display})"),
                cadence: Cadence::Fast,
                topic_key: format!("disk_read_{safe}"),
                unit: Some("KB/s"),
                device_class: None,
                state_class: Some("measurement"),
                icon: Some("mdi:harddisk"),
                value_template: None,
                attributes_template: None,
                entity: Some(disk_name.clone()),
                source: ValueSource::Cached(CachedMetric::DiskRead),
            });
            sensors.push(SensorDescriptor {
                id: format!("{dev}_disk_write_{safe}"),
                object: format!("disk_write_{safe}"),
                name: format!("Disk Write ({display})"),
                cadence: Cadence::Fast,
                topic_key: format!("disk_write_{safe}"),
                unit: Some("KB/s"),
                device_class: None,
                state_class: Some("measurement"),
                icon: Some("mdi:harddisk"),
                value_template: None,
                attributes_template: None,
                entity: Some(disk_name.clone()),
                source: ValueSource::Cached(CachedMetric::DiskWrite),
            });
            sensors.push(SensorDescriptor {
                id: format!("{dev}_disk_util_{safe}"),
                object: format!("disk_util_{safe}"),
                name: format!("Disk Utilization ({display})"),
                cadence: Cadence::Fast,
                topic_key: format!("disk_util_{safe}"),
                unit: Some("%"),
                device_class: None,
                state_class: Some("measurement"),
                icon: Some("mdi:harddisk"),
                value_template: None,
                attributes_template: None,
                entity: Some(disk_name.clone()),
                source: ValueSource::Cached(CachedMetric::DiskUtil),
            });
            sensors.push(SensorDescriptor {
                id: format!("{dev}_disk_health_{safe}"),
                object: format!("disk_health_{safe}"),
                name: format!("Disk Health ({display})"),
                cadence: Cadence::Slow,
                topic_key: format!("disk_health_{safe}"),
                unit: None,
                device_class: None,
                state_class: None,
                icon: Some("mdi:harddisk"),
                value_template: None,
                attributes_template: None,
                entity: Some(disk_name.clone()),
                source: ValueSource::Probe(ProbeKind::DiskHealth { device: path }),
            });
        }

        for interface in &facts.interfaces {
            let safe = sanitize(interface);
            sensors.push(SensorDescriptor {
                id: format!("{dev}_net_rx_{safe}"),
                object: format!("net_rx_{safe}"),
                name: format!("Network In ({interface})"),
                cadence: Cadence::Fast,
                topic_key: format!("net_rx_{safe}"),
                unit: Some("KB/s"),
                device_class: None,
                state_class: Some("measurement"),
                icon: Some("mdi:download-network"),
                value_template: None,
                attributes_template: None,
                entity: Some(interface.clone()),
                source: ValueSource::Probe(ProbeKind::InterfaceRx {
                    interface: interface.clone(),
                }),
            });
            sensors.push(SensorDescriptor {
                id: format!("{dev}_net_tx_{safe}"),
                object: format!("net_tx_{safe}"),
                name: format!("Network Out ({interface})"),
                cadence: Cadence::Fast,
                topic_key: format!("net_tx_{safe}"),
                unit: Some("KB/s"),
                device_class: None,
                state_class: Some("measurement"),
                icon: Some("mdi:upload-network"),
                value_template: None,
                attributes_template: None,
                entity: Some(interface.clone()),
                source: ValueSource::Probe(ProbeKind::InterfaceTx {
                    interface: interface.clone(),
                }),
            });
        }

        Self { sensors }
    }

    /// Published sensors of one cadence, in registration order.
    pub fn sensors_for(&self, cadence: Cadence) -> impl Iterator<Item = &SensorDescriptor> {
        self.sensors
            .iter()
            .filter(move |s| s.cadence == cadence && s.is_published())
    }

    /// Every descriptor, aliases included (the discovery document needs
    /// them all).
    pub fn all(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
