//! Home Assistant device-based discovery.
//!
//! Renders the whole catalog into one retained discovery document so a
//! consumer sees every sensor's metadata before the first state message.
//! Key ordering is stable (`BTreeMap` + fixed struct field order), so
//! rebuilding from the same catalog yields byte-identical output and
//! repeated startups cause no discovery churn.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::Catalog;
use crate::device::Device;

/// Topic layout under the configured discovery prefix.
#[derive(Debug, Clone)]
pub struct TopicScheme {
    prefix: String,
    device_id: String,
}

impl TopicScheme {
    pub fn new(prefix: &str, device_id: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            device_id: device_id.to_string(),
        }
    }

    pub fn discovery_topic(&self) -> String {
        format!("{}/device/{}/config", self.prefix, self.device_id)
    }

    pub fn state_topic(&self, topic_key: &str) -> String {
        format!("{}/sensor/{}_{}/state", self.prefix, self.device_id, topic_key)
    }
}

/// The retained registration message.
#[derive(Debug, Serialize)]
pub struct DiscoveryDocument {
    pub dev: DeviceBlock,
    pub o: OriginBlock,
    pub cmps: BTreeMap<String, Component>,
}

#[derive(Debug, Serialize)]
pub struct DeviceBlock {
    pub ids: String,
    pub name: String,
    pub sw_version: String,
    pub mdl: String,
}

#[derive(Debug, Serialize)]
pub struct OriginBlock {
    pub name: &'static str,
    pub sw_version: &'static str,
}

/// One sensor's discovery fragment.
#[derive(Debug, Serialize)]
pub struct Component {
    pub p: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'static str>,
    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_attributes_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_attributes_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
    pub unique_id: String,
}

/// Aggregate every catalog sensor under the device descriptor.
pub fn build_document(device: &Device, catalog: &Catalog, topics: &TopicScheme) -> DiscoveryDocument {
    let mut cmps = BTreeMap::new();

    for sensor in catalog.all() {
        let state_topic = topics.state_topic(&sensor.topic_key);
        let json_attributes_topic = sensor
            .attributes_template
            .is_some()
            .then(|| state_topic.clone());

        cmps.insert(
            sensor.id.clone(),
            Component {
                p: "sensor",
                name: sensor.name.clone(),
                unit_of_measurement: sensor.unit,
                state_topic,
                json_attributes_topic,
                json_attributes_template: sensor.attributes_template.clone(),
                value_template: sensor.value_template.clone(),
                device_class: sensor.device_class,
                state_class: sensor.state_class,
                icon: sensor.icon,
                unique_id: sensor.id.clone(),
            },
        );
    }

    DiscoveryDocument {
        dev: DeviceBlock {
            ids: device.id.clone(),
            name: device.name.clone(),
            sw_version: device.sw_version.clone(),
            mdl: device.model.clone(),
        },
        o: OriginBlock {
            name: env!("CARGO_PKG_NAME"),
            sw_version: env!("CARGO_PKG_VERSION"),
        },
        cmps,
    }
}
