use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::{info, warn};

use super::{NotificationBridge, RideEvent};
use crate::config::KafkaSettings;

/// Publishes ride events to a Kafka topic keyed by trip id, so one trip's
/// events stay ordered within a partition.
#[derive(Clone)]
pub struct KafkaBridge {
    producer: FutureProducer,
    topic: String,
}

impl KafkaBridge {
    /// Builds a producer with SASL authentication.
    pub fn connect(settings: &KafkaSettings) -> anyhow::Result<Self> {
        info!("Initializing Kafka producer for topic: {}", settings.topic);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.bootstrap_servers)
            .set("message.timeout.ms", "5000")
            // SASL Configuration
            .set("security.protocol", &settings.security_protocol)
            .set("sasl.mechanism", &settings.sasl_mechanism)
            .set("sasl.username", &settings.username)
            .set("sasl.password", &settings.password)
            .create()?;

        Ok(Self {
            producer,
            topic: settings.topic.clone(),
        })
    }
}

impl NotificationBridge for KafkaBridge {
    fn emit(&self, event: RideEvent) {
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => {
                warn!("Could not encode ride event: {}", e);
                return;
            }
        };
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        let key = event.trip_id().to_string();

        // Send in the background so the caller never waits on the broker
        tokio::spawn(async move {
            let record = FutureRecord::to(&topic).key(&key).payload(&payload);
            if let Err((e, _)) = producer.send(record, Duration::from_secs(1)).await {
                warn!(trip_id = %key, "Kafka delivery failed: {}", e);
            }
        });
    }
}
