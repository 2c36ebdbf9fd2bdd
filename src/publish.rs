//! Publish gateway.
//!
//! One seam with two variants picked at startup: the live MQTT client, or
//! a dry-run recorder that never touches the network.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{error, info};

use crate::config::MqttConfig;
use crate::error::PublishError;

/// Accepts (topic, payload, retain) messages bound for the broker.
#[async_trait]
pub trait PublishGateway: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool)
        -> Result<(), PublishError>;
}

/// Live broker transport.
pub struct MqttGateway {
    client: AsyncClient,
}

impl MqttGateway {
    /// Configure the client and spawn its event loop in the background.
    pub fn connect(config: &MqttConfig, device_id: &str) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("mqtt-sysmon-{device_id}"));

        let mut options = MqttOptions::new(client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        info!(
            broker = %format!("{}:{}", config.broker_host, config.broker_port),
            "MQTT gateway ready"
        );
        Self { client }
    }
}

#[async_trait]
impl PublishGateway for MqttGateway {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        retain: bool,
    ) -> Result<(), PublishError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|source| PublishError::Mqtt {
                topic: topic.to_string(),
                source,
            })
    }
}

/// One recorded message in dry-run mode.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
    pub at: DateTime<Utc>,
}

/// Records every message instead of sending it; append-only, for
/// inspection and tests.
#[derive(Default)]
pub struct DryRunGateway {
    records: Mutex<Vec<PublishRecord>>,
}

impl DryRunGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<PublishRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl PublishGateway for DryRunGateway {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        retain: bool,
    ) -> Result<(), PublishError> {
        info!(topic, retain, payload = %payload, "[dry-run]");
        self.records.lock().push(PublishRecord {
            topic: topic.to_string(),
            payload,
            retain,
            at: Utc::now(),
        });
        Ok(())
    }
}
