//! Metric sources.
//!
//! One expensive combined probe (`iostat` blocking over the fast window)
//! yields CPU usage plus every disk's I/O in a single call; everything else
//! is a cheap direct probe per sensor. `MetricSource` is the seam the
//! scheduler talks through, so tests substitute [`FixedSource`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use sysinfo::{Networks, System};
use tokio::process::Command;
use tracing::debug;

use crate::error::{ProbeError, StartupError};
use crate::measurement::{DiskIo, Measurement, StateValue};

const SHORT_TIMEOUT: Duration = Duration::from_secs(30);
const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Identifies one direct metric probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    CpuTemperature,
    MemoryUsage,
    Uptime,
    DiskTemperature { device: String },
    DiskHealth { device: String },
    InterfaceRx { interface: String },
    InterfaceTx { interface: String },
}

/// Source of raw metric values, either the combined sample or a direct call.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// One blocking combined CPU + disk I/O sample over the fast window.
    async fn sample_fast(&self) -> Result<Measurement, ProbeError>;

    /// Direct single-metric probe for sensors outside the shared sample.
    async fn collect(&self, kind: &ProbeKind) -> Result<StateValue, ProbeError>;
}

/// Run a command, erroring on timeout or non-zero exit.
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, ProbeError> {
    let (stdout, success) = run_command_raw(program, args, timeout).await?;
    if !success {
        return Err(ProbeError::CommandFailed {
            command: program.to_string(),
            reason: "non-zero exit status".to_string(),
        });
    }
    Ok(stdout)
}

/// Like [`run_command`] but surfaces the exit status instead of failing on
/// it; `smartctl -H` exits non-zero for an unhealthy disk.
pub(crate) async fn run_command_raw(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<(String, bool), ProbeError> {
    let output = tokio::time::timeout(timeout, Command::new(program).args(args).output())
        .await
        .map_err(|_| ProbeError::CommandFailed {
            command: program.to_string(),
            reason: format!("timed out after {}s", timeout.as_secs()),
        })?
        .map_err(ProbeError::Io)?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok((stdout, output.status.success()))
}

async fn command_exists(command: &str) -> bool {
    run_command("which", &[command], Duration::from_secs(5))
        .await
        .is_ok()
}

/// Tools the live probes shell out to, with their Debian package names.
const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("iostat", "sysstat"),
    ("smartctl", "smartmontools"),
    ("sensors", "lm-sensors"),
];

/// Verify the external tools are present; fatal at startup when not.
pub async fn check_dependencies() -> Result<(), StartupError> {
    let mut tools = Vec::new();
    let mut packages = Vec::new();
    for (tool, package) in REQUIRED_TOOLS {
        if !command_exists(tool).await {
            tools.push(*tool);
            packages.push(*package);
        }
    }

    if tools.is_empty() {
        Ok(())
    } else {
        Err(StartupError::MissingDependencies {
            tools: tools.join(", "),
            packages: packages.join(" "),
        })
    }
}

/// Live probes backed by system tools and sysinfo.
pub struct SystemProbes {
    fast_interval: Duration,
    network: Mutex<NetworkRates>,
}

impl SystemProbes {
    pub fn new(fast_interval: Duration) -> Self {
        Self {
            fast_interval,
            network: Mutex::new(NetworkRates::new()),
        }
    }

    async fn cpu_temperature(&self) -> Result<StateValue, ProbeError> {
        if let Ok(raw) = run_command("sensors", &["-j"], SHORT_TIMEOUT).await {
            if let Some((temperature, attrs)) = parse_sensors_json(&raw) {
                return Ok(StateValue::Json(
                    json!({ "temperature": temperature, "attrs": attrs }),
                ));
            }
        }

        // Fallback when lm-sensors finds no CPU chip.
        let contents = tokio::fs::read_to_string(THERMAL_ZONE).await?;
        let milli: f64 = contents
            .trim()
            .parse()
            .map_err(|_| ProbeError::Malformed {
                what: "thermal zone",
                detail: format!("unparseable reading `{}`", contents.trim()),
            })?;
        Ok(StateValue::Json(json!({
            "temperature": round1(milli / 1000.0),
            "attrs": { "sensor": "thermal_zone0", "source": "sysfs" },
        })))
    }

    fn memory_usage(&self) -> StateValue {
        let mut sys = System::new();
        sys.refresh_memory();

        let total = sys.total_memory();
        let used = sys.used_memory();
        let mem_usage = if total > 0 {
            round1(used as f64 / total as f64 * 100.0)
        } else {
            0.0
        };

        let swap_total = sys.total_swap();
        let swap_used = sys.used_swap();
        let swap_usage = if swap_total > 0 {
            round1(swap_used as f64 / swap_total as f64 * 100.0)
        } else {
            0.0
        };

        StateValue::Json(json!({
            "mem_usage": mem_usage,
            "mem": {
                "total": total,
                "used": used,
                "free": sys.free_memory(),
                "available": sys.available_memory(),
            },
            "swap_usage": swap_usage,
            "swap": {
                "total": swap_total,
                "used": swap_used,
                "free": swap_total.saturating_sub(swap_used),
            },
        }))
    }

    async fn disk_temperature(&self, device: &str) -> Result<StateValue, ProbeError> {
        let output = run_command("smartctl", &["-A", device], SHORT_TIMEOUT).await?;
        parse_smart_temperature(&output)
            .map(StateValue::Number)
            .ok_or_else(|| ProbeError::Malformed {
                what: "smartctl attributes",
                detail: format!("no temperature attribute for {device}"),
            })
    }

    async fn disk_health(&self, device: &str) -> Result<StateValue, ProbeError> {
        let (output, _success) = run_command_raw("smartctl", &["-H", device], SHORT_TIMEOUT).await?;
        let status = if output.contains("PASSED") { "PASSED" } else { "FAILED" };
        Ok(StateValue::Text(status.to_string()))
    }

    fn interface_rate(&self, interface: &str, transmit: bool) -> Result<StateValue, ProbeError> {
        let mut network = self.network.lock();
        let (rx, tx) = network
            .rates_for(interface)
            .ok_or_else(|| ProbeError::MissingField(format!("interface `{interface}`")))?;
        Ok(StateValue::Number(if transmit { tx } else { rx }))
    }
}

#[async_trait]
impl MetricSource for SystemProbes {
    async fn sample_fast(&self) -> Result<Measurement, ProbeError> {
        let window = self.fast_interval.as_secs().max(1).to_string();
        debug!(window = %window, "starting combined cpu/disk sample");
        let raw = run_command(
            "iostat",
            &["-d", &window, "1", "-y", "-c", "-x", "-o", "JSON"],
            self.fast_interval + SHORT_TIMEOUT,
        )
        .await?;
        let (cpu_idle, disks) = parse_iostat(&raw)?;
        Ok(Measurement::new(cpu_idle, disks))
    }

    async fn collect(&self, kind: &ProbeKind) -> Result<StateValue, ProbeError> {
        match kind {
            ProbeKind::CpuTemperature => self.cpu_temperature().await,
            ProbeKind::MemoryUsage => Ok(self.memory_usage()),
            ProbeKind::Uptime => Ok(StateValue::Json(json!({ "uptime": System::uptime() }))),
            ProbeKind::DiskTemperature { device } => self.disk_temperature(device).await,
            ProbeKind::DiskHealth { device } => self.disk_health(device).await,
            ProbeKind::InterfaceRx { interface } => self.interface_rate(interface, false),
            ProbeKind::InterfaceTx { interface } => self.interface_rate(interface, true),
        }
    }
}

/// Byte counters turned into KB/s between refreshes. Both directions of an
/// interface are served from one refresh so a tick sees consistent numbers.
struct NetworkRates {
    networks: Networks,
    last_refresh: Instant,
    rates: HashMap<String, (f64, f64)>,
}

impl NetworkRates {
    fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            last_refresh: Instant::now(),
            rates: HashMap::new(),
        }
    }

    fn rates_for(&mut self, interface: &str) -> Option<(f64, f64)> {
        let elapsed = self.last_refresh.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.networks.refresh();
            let secs = elapsed.as_secs_f64();
            self.rates = self
                .networks
                .iter()
                .map(|(name, data)| {
                    let rx = round1(data.received() as f64 / 1024.0 / secs);
                    let tx = round1(data.transmitted() as f64 / 1024.0 / secs);
                    (name.clone(), (rx, tx))
                })
                .collect();
            self.last_refresh = Instant::now();
        }
        self.rates.get(interface).copied()
    }
}

#[derive(Debug, Deserialize)]
struct IostatOutput {
    sysstat: IostatSysstat,
}

#[derive(Debug, Deserialize)]
struct IostatSysstat {
    #[serde(default)]
    hosts: Vec<IostatHost>,
}

#[derive(Debug, Deserialize)]
struct IostatHost {
    #[serde(default)]
    statistics: Vec<IostatSample>,
}

#[derive(Debug, Deserialize)]
struct IostatSample {
    #[serde(rename = "avg-cpu")]
    avg_cpu: Option<IostatCpu>,
    #[serde(default)]
    disk: Vec<IostatDisk>,
}

#[derive(Debug, Deserialize)]
struct IostatCpu {
    idle: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct IostatDisk {
    disk_device: String,
    #[serde(rename = "rkB/s", default)]
    read_kb_s: f64,
    #[serde(rename = "wkB/s", default)]
    write_kb_s: f64,
    #[serde(default)]
    util: f64,
}

fn parse_iostat(raw: &str) -> Result<(f64, BTreeMap<String, DiskIo>), ProbeError> {
    let output: IostatOutput = serde_json::from_str(raw).map_err(|source| ProbeError::Parse {
        what: "iostat",
        source,
    })?;

    let sample = output
        .sysstat
        .hosts
        .into_iter()
        .next()
        .and_then(|host| host.statistics.into_iter().next())
        .ok_or_else(|| ProbeError::Malformed {
            what: "iostat",
            detail: "no statistics block".to_string(),
        })?;

    let cpu_idle = sample.avg_cpu.and_then(|cpu| cpu.idle).unwrap_or(100.0);

    let disks = sample
        .disk
        .into_iter()
        .map(|d| {
            (
                d.disk_device,
                DiskIo {
                    read_kb_s: d.read_kb_s,
                    write_kb_s: d.write_kb_s,
                    util_pct: d.util,
                },
            )
        })
        .collect();

    Ok((cpu_idle, disks))
}

/// Pick the CPU package temperature out of `sensors -j` output, falling
/// back to the first core reading of a CPU-looking chip.
fn parse_sensors_json(raw: &str) -> Option<(f64, Value)> {
    let data: Value = serde_json::from_str(raw).ok()?;
    for (chip, readings) in data.as_object()? {
        let chip_lower = chip.to_lowercase();
        if !chip_lower.contains("coretemp") && !chip_lower.contains("cpu") {
            continue;
        }
        let Some(readings) = readings.as_object() else {
            continue;
        };

        if let Some(package) = readings.get("Package id 0").and_then(Value::as_object) {
            let temperature = package.get("temp1_input").and_then(Value::as_f64)?;
            let attrs = json!({
                "sensor": chip,
                "max_temp": package.get("temp1_max").and_then(Value::as_f64).unwrap_or(0.0),
                "crit_temp": package.get("temp1_crit").and_then(Value::as_f64).unwrap_or(0.0),
            });
            return Some((round1(temperature), attrs));
        }

        for (label, core) in readings {
            if !label.starts_with("Core") {
                continue;
            }
            let Some(core) = core.as_object() else {
                continue;
            };
            let Some(input_key) = core.keys().find(|k| k.ends_with("_input")) else {
                continue;
            };
            let temperature = core.get(input_key).and_then(Value::as_f64)?;
            let max_key = input_key.replace("_input", "_max");
            let crit_key = input_key.replace("_input", "_crit");
            let attrs = json!({
                "sensor": format!("{chip} - {label}"),
                "max_temp": core.get(&max_key).and_then(Value::as_f64).unwrap_or(0.0),
                "crit_temp": core.get(&crit_key).and_then(Value::as_f64).unwrap_or(0.0),
            });
            return Some((round1(temperature), attrs));
        }
    }
    None
}

/// Temperature from `smartctl -A` attribute table output.
fn parse_smart_temperature(output: &str) -> Option<f64> {
    for line in output.lines() {
        if !line.contains("Temperature_Celsius") && !line.contains("Airflow_Temperature_Cel") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if let Some(raw) = parts.get(9) {
            if let Ok(value) = raw.parse::<f64>() {
                return Some(value);
            }
        }
    }
    None
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Canned metric source. Lets the pipeline run without touching the host;
/// the tests drive every cadence through one of these.
pub struct FixedSource {
    template: Measurement,
    values: HashMap<ProbeKind, StateValue>,
    sample_delay: Duration,
    samples: AtomicUsize,
}

impl FixedSource {
    pub fn new(template: Measurement) -> Self {
        Self {
            template,
            values: HashMap::new(),
            sample_delay: Duration::ZERO,
            samples: AtomicUsize::new(0),
        }
    }

    pub fn with_value(mut self, kind: ProbeKind, value: StateValue) -> Self {
        self.values.insert(kind, value);
        self
    }

    pub fn with_sample_delay(mut self, delay: Duration) -> Self {
        self.sample_delay = delay;
        self
    }

    /// Number of combined samples taken so far.
    pub fn sample_count(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricSource for FixedSource {
    async fn sample_fast(&self) -> Result<Measurement, ProbeError> {
        if !self.sample_delay.is_zero() {
            tokio::time::sleep(self.sample_delay).await;
        }
        let n = self.samples.fetch_add(1, Ordering::SeqCst);
        let mut measurement = self.template.clone();
        // Successive samples stay distinguishable in assertions.
        measurement.cpu_idle += n as f64;
        measurement.taken_at = Instant::now();
        Ok(measurement)
    }

    async fn collect(&self, kind: &ProbeKind) -> Result<StateValue, ProbeError> {
        self.values
            .get(kind)
            .cloned()
            .ok_or_else(|| ProbeError::MissingField(format!("{kind:?}")))
    }
}
