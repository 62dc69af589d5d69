use async_trait::async_trait;
use farmgate_core::Notifier;
use farmgate_shared::SettlementEvent;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                debug!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

/// Publishes settlement events as JSON, keyed by order id so one order's
/// history lands on one partition in sequence.
#[derive(Clone)]
pub struct KafkaNotifier {
    producer: EventProducer,
    topic: String,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer, topic: &str) -> Self {
        Self { producer, topic: topic.to_string() }
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn publish(
        &self,
        event: &SettlementEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_string(event)?;
        let key = event.order_id().to_string();
        self.producer.publish(&self.topic, &key, &payload).await?;
        Ok(())
    }
}
