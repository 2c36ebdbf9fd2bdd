//! The owned measurement bundle produced by one combined probe invocation.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Name of the combined CPU + disk I/O probe.
pub const COMBINED_PROBE: &str = "iostat";

/// Per-disk I/O figures from one sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiskIo {
    pub read_kb_s: f64,
    pub write_kb_s: f64,
    pub util_pct: f64,
}

/// One probe invocation's worth of raw values, replaced wholesale on every
/// refresh and never mutated in place.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub probe: &'static str,
    pub taken_at: Instant,
    /// CPU idle percentage over the sampling window.
    pub cpu_idle: f64,
    /// Keyed by kernel device name (`sda`, `nvme0n1`); sorted for
    /// deterministic iteration.
    pub disks: BTreeMap<String, DiskIo>,
}

impl Measurement {
    pub fn new(cpu_idle: f64, disks: BTreeMap<String, DiskIo>) -> Self {
        Self {
            probe: COMBINED_PROBE,
            taken_at: Instant::now(),
            cpu_idle,
            disks,
        }
    }

    pub fn age(&self) -> Duration {
        self.taken_at.elapsed()
    }
}

/// Value a sensor puts on its state topic.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Number(f64),
    Text(String),
    Json(serde_json::Value),
}

impl StateValue {
    /// Wire rendering: numbers keep one decimal, JSON is compact.
    pub fn render(&self) -> String {
        match self {
            StateValue::Number(n) => format!("{n:.1}"),
            StateValue::Text(s) => s.clone(),
            StateValue::Json(v) => v.to_string(),
        }
    }
}
