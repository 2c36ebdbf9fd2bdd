//! Multi-cadence scheduler.
//!
//! One cooperative loop drives all three cadences: the one-time batch runs
//! before anything recurring, the slow cadence is tracked by its last-fire
//! timestamp so it never blocks or is blocked by the fast cadence, and the
//! fast cadence's blocking combined sample is itself the inter-tick delay.
//! Shutdown is observed between batches; a batch in flight always finishes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::MeasurementCache;
use crate::catalog::{Cadence, Catalog, ValueSource};
use crate::discovery::TopicScheme;
use crate::measurement::Measurement;
use crate::probe::MetricSource;
use crate::publish::PublishGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

pub struct Scheduler {
    catalog: Arc<Catalog>,
    cache: MeasurementCache,
    source: Arc<dyn MetricSource>,
    gateway: Arc<dyn PublishGateway>,
    topics: TopicScheme,
    fast_interval: Duration,
    slow_interval: Duration,
    /// None means the slow cadence has never fired and is due immediately.
    last_slow: Option<Instant>,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(
        catalog: Arc<Catalog>,
        source: Arc<dyn MetricSource>,
        gateway: Arc<dyn PublishGateway>,
        topics: TopicScheme,
        fast_interval: Duration,
        slow_interval: Duration,
    ) -> Self {
        Self {
            catalog,
            cache: MeasurementCache::new(fast_interval),
            source,
            gateway,
            topics,
            fast_interval,
            slow_interval,
            last_slow: None,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Whether the slow cadence is due at this evaluation.
    pub fn slow_due(&self) -> bool {
        self.last_slow
            .map_or(true, |t| t.elapsed() >= self.slow_interval)
    }

    /// Drive all cadences until the shutdown flag is raised. Runs at most
    /// once per scheduler; the one-time batch fires exactly once.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        if self.state != SchedulerState::Idle {
            warn!(state = ?self.state, "scheduler already consumed, refusing to run again");
            return;
        }
        self.state = SchedulerState::Running;
        info!(
            fast_secs = self.fast_interval.as_secs(),
            slow_secs = self.slow_interval.as_secs(),
            "scheduler running"
        );

        let published = self.run_onetime().await;
        debug!(published, "one-time batch complete");

        while !*shutdown.borrow() {
            // Tie-break: when both cadences are due in the same evaluation
            // the slow batch is serviced first, then the fast tick.
            if self.slow_due() {
                let published = self.run_slow().await;
                self.last_slow = Some(Instant::now());
                debug!(published, "slow batch complete");
            }

            let started = Instant::now();
            let published = self.run_fast().await;
            debug!(published, "fast tick complete");

            // The blocking combined sample normally consumes the whole
            // window; sleep only the remainder (sources that return early,
            // e.g. canned ones) so the effective period never drifts.
            let elapsed = started.elapsed();
            if elapsed < self.fast_interval && !*shutdown.borrow() {
                tokio::select! {
                    _ = tokio::time::sleep(self.fast_interval - elapsed) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        self.state = SchedulerState::Stopping;
        info!("shutdown requested, current batch already flushed");
        self.state = SchedulerState::Stopped;
        info!("scheduler stopped");
    }

    /// The one-time sensor batch.
    pub async fn run_onetime(&self) -> usize {
        self.publish_batch(Cadence::OneTime, None).await
    }

    /// The slow batch; each sensor uses its own direct probe.
    pub async fn run_slow(&self) -> usize {
        self.publish_batch(Cadence::Slow, None).await
    }

    /// One fast tick: refresh the shared sample, then publish every fast
    /// sensor from it (or from its direct probe).
    pub async fn run_fast(&self) -> usize {
        let measurement = match self.cache.refresh(self.source.as_ref()).await {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(error = %e, "combined sample failed, cached sensors skip this tick");
                None
            }
        };
        self.publish_batch(Cadence::Fast, measurement.as_ref()).await
    }

    /// Extract and publish every sensor of one cadence. A failing sensor is
    /// logged and skipped; it never stops the rest of the batch.
    async fn publish_batch(&self, cadence: Cadence, measurement: Option<&Measurement>) -> usize {
        let mut published = 0;

        for sensor in self.catalog.sensors_for(cadence) {
            let value = match &sensor.source {
                ValueSource::Cached(_) => match measurement {
                    Some(m) => sensor.extract(m),
                    None => {
                        debug!(sensor = %sensor.id, "no shared sample this tick");
                        continue;
                    }
                },
                ValueSource::Probe(kind) => self.source.collect(kind).await,
                ValueSource::Alias => continue,
            };

            match value {
                Ok(value) => {
                    let topic = self.topics.state_topic(&sensor.topic_key);
                    match self.gateway.publish(&topic, value.render(), false).await {
                        Ok(()) => published += 1,
                        Err(e) => {
                            warn!(sensor = %sensor.id, error = %e, "publish failed, next tick retries");
                        }
                    }
                }
                Err(e) => {
                    warn!(sensor = %sensor.id, group = cadence.group(), error = %e, "sensor skipped for this tick");
                }
            }
        }

        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::facts::{DiskEntity, HostFacts};
    use crate::measurement::{DiskIo, StateValue};
    use crate::probe::{FixedSource, ProbeKind};
    use crate::publish::DryRunGateway;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn device() -> Device {
        Device {
            id: "testhost".to_string(),
            name: "testhost".to_string(),
            sw_version: "test".to_string(),
            model: "Linux System Monitor".to_string(),
        }
    }

    fn facts() -> HostFacts {
        let mut facts = HostFacts::default();
        facts.disks.insert(
            "sda".to_string(),
            DiskEntity {
                name: "sda".to_string(),
                model: None,
                size: None,
                transport: Some("sata".to_string()),
                serial: None,
            },
        );
        facts.interfaces.insert("eth0".to_string());
        facts
    }

    fn measurement_with_sda() -> Measurement {
        let mut disks = BTreeMap::new();
        disks.insert(
            "sda".to_string(),
            DiskIo {
                read_kb_s: 1.0,
                write_kb_s: 2.0,
                util_pct: 3.0,
            },
        );
        Measurement::new(90.0, disks)
    }

    fn source_with_all_probes(template: Measurement) -> FixedSource {
        FixedSource::new(template)
            .with_value(ProbeKind::Uptime, StateValue::Json(json!({"uptime": 360})))
            .with_value(
                ProbeKind::CpuTemperature,
                StateValue::Json(json!({"temperature": 44.0, "attrs": {}})),
            )
            .with_value(
                ProbeKind::MemoryUsage,
                StateValue::Json(json!({"mem_usage": 41.5})),
            )
            .with_value(
                ProbeKind::DiskTemperature {
                    device: "/dev/sda".to_string(),
                },
                StateValue::Number(36.0),
            )
            .with_value(
                ProbeKind::DiskHealth {
                    device: "/dev/sda".to_string(),
                },
                StateValue::Text("PASSED".to_string()),
            )
            .with_value(
                ProbeKind::InterfaceRx {
                    interface: "eth0".to_string(),
                },
                StateValue::Number(10.0),
            )
            .with_value(
                ProbeKind::InterfaceTx {
                    interface: "eth0".to_string(),
                },
                StateValue::Number(20.0),
            )
    }

    fn scheduler_with(
        source: FixedSource,
        fast: Duration,
        slow: Duration,
    ) -> (Scheduler, Arc<DryRunGateway>) {
        let catalog = Arc::new(Catalog::build(&device(), &facts()));
        let gateway = Arc::new(DryRunGateway::new());
        let scheduler = Scheduler::new(
            catalog,
            Arc::new(source),
            gateway.clone(),
            TopicScheme::new("homeassistant", "testhost"),
            fast,
            slow,
        );
        (scheduler, gateway)
    }

    // Nine fast sensors for one disk and one interface: cpu_usage,
    // cpu_temp, memory_usage, four disk metrics, rx and tx.
    const FAST_SENSORS: usize = 9;

    #[test]
    fn slow_cadence_is_due_at_first_evaluation() {
        let (scheduler, _) = scheduler_with(
            source_with_all_probes(measurement_with_sda()),
            Duration::from_secs(10),
            Duration::from_secs(3600),
        );
        assert!(scheduler.slow_due());
    }

    #[tokio::test]
    async fn fast_tick_publishes_every_extractable_sensor() {
        let (scheduler, gateway) = scheduler_with(
            source_with_all_probes(measurement_with_sda()),
            Duration::from_millis(10),
            Duration::from_secs(3600),
        );

        let published = scheduler.run_fast().await;
        assert_eq!(published, FAST_SENSORS);
        assert_eq!(gateway.records().len(), FAST_SENSORS);
        assert!(gateway.records().iter().all(|r| !r.retain));
    }

    #[tokio::test]
    async fn missing_disk_skips_only_its_sensors() {
        // Combined sample without sda: its three cached sensors drop out,
        // everything else still publishes.
        let (scheduler, gateway) = scheduler_with(
            source_with_all_probes(Measurement::new(90.0, BTreeMap::new())),
            Duration::from_millis(10),
            Duration::from_secs(3600),
        );

        let published = scheduler.run_fast().await;
        assert_eq!(published, FAST_SENSORS - 3);

        let topics: Vec<String> = gateway.records().iter().map(|r| r.topic.clone()).collect();
        assert!(topics.iter().any(|t| t.contains("cpu_usage")));
        assert!(topics.iter().any(|t| t.contains("disk_temp_sda")));
        assert!(!topics.iter().any(|t| t.contains("disk_read_sda")));
    }

    #[tokio::test]
    async fn failing_direct_probe_does_not_stop_the_batch() {
        // No cpu temperature value configured; the other sensors publish.
        let source = FixedSource::new(measurement_with_sda())
            .with_value(ProbeKind::Uptime, StateValue::Json(json!({"uptime": 1})))
            .with_value(
                ProbeKind::MemoryUsage,
                StateValue::Json(json!({"mem_usage": 41.5})),
            )
            .with_value(
                ProbeKind::DiskTemperature {
                    device: "/dev/sda".to_string(),
                },
                StateValue::Number(36.0),
            )
            .with_value(
                ProbeKind::InterfaceRx {
                    interface: "eth0".to_string(),
                },
                StateValue::Number(10.0),
            )
            .with_value(
                ProbeKind::InterfaceTx {
                    interface: "eth0".to_string(),
                },
                StateValue::Number(20.0),
            );

        let (scheduler, gateway) = scheduler_with(
            source,
            Duration::from_millis(10),
            Duration::from_secs(3600),
        );

        let published = scheduler.run_fast().await;
        assert_eq!(published, FAST_SENSORS - 1);
        assert!(!gateway
            .records()
            .iter()
            .any(|r| r.topic.contains("cpu_temp")));
    }

    #[tokio::test]
    async fn run_fires_onetime_once_and_slow_before_fast() {
        let (mut scheduler, gateway) = scheduler_with(
            source_with_all_probes(measurement_with_sda()),
            Duration::from_millis(10),
            Duration::from_secs(3600),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            scheduler.run(rx).await;
            scheduler
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        let scheduler = handle.await.unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        let records = gateway.records();
        let uptime_count = records
            .iter()
            .filter(|r| r.topic.contains("_uptime/"))
            .count();
        assert_eq!(uptime_count, 1);

        let first_slow = records
            .iter()
            .position(|r| r.topic.contains("disk_health"))
            .unwrap();
        let first_fast = records
            .iter()
            .position(|r| r.topic.contains("cpu_usage"))
            .unwrap();
        assert!(first_slow < first_fast);
        // Slow interval far in the future: exactly one slow batch fired.
        assert_eq!(
            records
                .iter()
                .filter(|r| r.topic.contains("disk_health"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn shutdown_mid_tick_completes_the_batch() {
        let source = source_with_all_probes(measurement_with_sda())
            .with_sample_delay(Duration::from_millis(50));
        let (mut scheduler, gateway) = scheduler_with(
            source,
            Duration::from_secs(5),
            Duration::from_secs(3600),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            scheduler.run(rx).await;
        });
        // Raise the flag while the first fast sample is still in flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let fast_records = gateway
            .records()
            .iter()
            .filter(|r| {
                !r.topic.contains("_uptime/") && !r.topic.contains("disk_health")
            })
            .count();
        assert_eq!(fast_records, FAST_SENSORS);
    }
}
