//! End-to-end dry-run pipeline: discovery, then every cadence, driven by a
//! canned metric source so record counts are exact.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mqtt_sysmon::catalog::{Cadence, Catalog};
use mqtt_sysmon::device::Device;
use mqtt_sysmon::discovery::{self, TopicScheme};
use mqtt_sysmon::facts::{DiskEntity, HostFacts};
use mqtt_sysmon::measurement::{DiskIo, Measurement, StateValue};
use mqtt_sysmon::probe::{FixedSource, ProbeKind};
use mqtt_sysmon::publish::{DryRunGateway, PublishGateway};
use mqtt_sysmon::scheduler::Scheduler;

fn device() -> Device {
    Device {
        id: "nas".to_string(),
        name: "nas".to_string(),
        sw_version: "Linux 6.1".to_string(),
        model: "Linux System Monitor".to_string(),
    }
}

fn facts() -> HostFacts {
    let mut facts = HostFacts::default();
    for name in ["sda", "nvme0n1"] {
        facts.disks.insert(
            name.to_string(),
            DiskEntity {
                name: name.to_string(),
                model: Some("Test Disk".to_string()),
                size: Some("1T".to_string()),
                transport: Some("sata".to_string()),
                serial: Some(format!("SN-{name}")),
            },
        );
    }
    facts.interfaces.insert("eth0".to_string());
    facts
}

fn measurement() -> Measurement {
    let mut disks = BTreeMap::new();
    for name in ["sda", "nvme0n1"] {
        disks.insert(
            name.to_string(),
            DiskIo {
                read_kb_s: 5.0,
                write_kb_s: 7.0,
                util_pct: 2.0,
            },
        );
    }
    Measurement::new(88.0, disks)
}

fn source() -> FixedSource {
    let mut source = FixedSource::new(measurement())
        .with_value(ProbeKind::Uptime, StateValue::Json(json!({"uptime": 7200})))
        .with_value(
            ProbeKind::CpuTemperature,
            StateValue::Json(json!({"temperature": 52.0, "attrs": {"sensor": "coretemp"}})),
        )
        .with_value(
            ProbeKind::MemoryUsage,
            StateValue::Json(json!({"mem_usage": 63.2, "swap_usage": 0.0})),
        )
        .with_value(
            ProbeKind::InterfaceRx {
                interface: "eth0".to_string(),
            },
            StateValue::Number(120.0),
        )
        .with_value(
            ProbeKind::InterfaceTx {
                interface: "eth0".to_string(),
            },
            StateValue::Number(48.0),
        );
    for disk in ["sda", "nvme0n1"] {
        source = source
            .with_value(
                ProbeKind::DiskTemperature {
                    device: format!("/dev/{disk}"),
                },
                StateValue::Number(35.0),
            )
            .with_value(
                ProbeKind::DiskHealth {
                    device: format!("/dev/{disk}"),
                },
                StateValue::Text("PASSED".to_string()),
            );
    }
    source
}

#[tokio::test]
async fn dry_run_pipeline_produces_the_expected_record_ledger() {
    let device = device();
    let catalog = Arc::new(Catalog::build(&device, &facts()));
    let topics = TopicScheme::new("homeassistant", &device.id);
    let gateway = Arc::new(DryRunGateway::new());

    // Discovery goes out first, retained.
    let document = discovery::build_document(&device, &catalog, &topics);
    let payload = serde_json::to_string(&document).unwrap();
    gateway
        .publish(&topics.discovery_topic(), payload, true)
        .await
        .unwrap();

    let scheduler = Scheduler::new(
        Arc::clone(&catalog),
        Arc::new(source()),
        gateway.clone(),
        topics.clone(),
        Duration::from_millis(10),
        Duration::from_secs(3600),
    );

    let onetime = scheduler.run_onetime().await;
    let slow = scheduler.run_slow().await;
    let fast_ticks = 3;
    let mut fast = 0;
    for _ in 0..fast_ticks {
        fast += scheduler.run_fast().await;
    }

    let onetime_sensors = catalog.sensors_for(Cadence::OneTime).count();
    let slow_sensors = catalog.sensors_for(Cadence::Slow).count();
    let fast_sensors = catalog.sensors_for(Cadence::Fast).count();

    assert_eq!(onetime, onetime_sensors);
    assert_eq!(slow, slow_sensors);
    assert_eq!(fast, fast_sensors * fast_ticks);

    let records = gateway.records();
    assert_eq!(
        records.len(),
        1 + onetime_sensors + slow_sensors + fast_sensors * fast_ticks
    );

    // The retained discovery message precedes every state message.
    assert_eq!(records[0].topic, topics.discovery_topic());
    assert!(records[0].retain);
    assert!(records[1..].iter().all(|r| !r.retain));

    // Every state topic was registered by the discovery document.
    let registered: Vec<String> = document
        .cmps
        .values()
        .map(|c| c.state_topic.clone())
        .collect();
    for record in &records[1..] {
        assert!(
            registered.contains(&record.topic),
            "state topic {} missing from discovery",
            record.topic
        );
    }
}

#[tokio::test]
async fn discovery_is_idempotent_across_restarts() {
    let device = device();
    let catalog = Catalog::build(&device, &facts());
    let topics = TopicScheme::new("homeassistant", &device.id);

    let first = serde_json::to_string(&discovery::build_document(&device, &catalog, &topics)).unwrap();
    let again = Catalog::build(&device, &facts());
    let second = serde_json::to_string(&discovery::build_document(&device, &again, &topics)).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn per_disk_sensor_counts_scale_with_discovered_disks() {
    let catalog = Catalog::build(&device(), &facts());

    let per_disk_fast = catalog
        .sensors_for(Cadence::Fast)
        .filter(|s| s.object.starts_with("disk_"))
        .count();
    let per_disk_slow = catalog.sensors_for(Cadence::Slow).count();

    // Two disks, four fast metrics and one slow metric each.
    assert_eq!(per_disk_fast, 2 * 4);
    assert_eq!(per_disk_slow, 2);
}
