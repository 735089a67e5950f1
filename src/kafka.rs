//! Kafka broker client built on `rdkafka`.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::info;

use crate::broker::{Broker, Delivery, OutgoingMessage, PendingDelivery};
use crate::error::{DeliveryFailure, Error, Result};
use crate::producer::{Acks, Compression, DeliveryPolicy, ProducerConfig};

/// A connected Kafka producer.
///
/// Batching, compression, acknowledgments and transport retries are handled
/// by librdkafka according to the [`DeliveryPolicy`] it was created with.
pub struct KafkaBroker {
    producer: FutureProducer,
}

impl KafkaBroker {
    /// Creates the client and checks that the cluster answers a metadata
    /// request within the configured connect timeout.
    ///
    /// Fails with [`Error::ProducerInit`] when librdkafka rejects the
    /// configuration and with [`Error::Connection`] when no broker answers.
    pub async fn connect(config: &ProducerConfig) -> Result<Self> {
        let policy = config.policy();
        let producer: FutureProducer = client_config(config, &policy)
            .create()
            .map_err(|e| Error::ProducerInit(e.to_string()))?;

        let probe = producer.clone();
        let timeout = config.connect_timeout();
        let reachable = tokio::task::spawn_blocking(move || {
            probe.client().fetch_metadata(None, timeout).map(|m| m.brokers().len())
        })
        .await
        .map_err(|e| Error::ProducerInit(format!("metadata probe panicked: {e}")))?
        .map_err(|e| Error::Connection(e.to_string()))?;

        info!(
            brokers = %config.brokers().join(","),
            reachable,
            mode = ?config.mode(),
            "kafka producer connected"
        );

        Ok(Self { producer })
    }
}

/// librdkafka properties for `config` under `policy`.
pub fn client_config(config: &ProducerConfig, policy: &DeliveryPolicy) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.brokers().join(","))
        .set("client.id", config.client_id())
        .set("acks", match policy.acks {
            Acks::Leader => "1",
            Acks::All => "all",
        })
        .set("compression.type", match policy.compression {
            Compression::None => "none",
            Compression::Snappy => "snappy",
        })
        .set(
            "linger.ms",
            policy.flush_interval.map_or(0, |d| d.as_millis()).to_string(),
        )
        .set("message.send.max.retries", policy.max_retries.to_string())
        .set("retry.backoff.ms", policy.retry_backoff.as_millis().to_string())
        .set("message.timeout.ms", policy.send_timeout.as_millis().to_string());
    client_config
}

#[async_trait]
impl Broker for KafkaBroker {
    /// `send_result` copies the record into librdkafka's queue before
    /// returning; a full queue fails here, not in the returned future.
    fn enqueue(&self, message: OutgoingMessage) -> PendingDelivery {
        let mut headers = OwnedHeaders::new_with_capacity(message.headers.len());
        for (key, value) in message.headers.iter() {
            headers = headers.insert(Header { key, value: Some(value) });
        }

        let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(&message.topic)
            .payload(&message.payload[..])
            .headers(headers);
        if let Some(key) = message.key.as_deref() {
            record = record.key(key);
        }

        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((e, _)) => {
                let failure = delivery_failure(&message.topic, &e);
                return Box::pin(async move { Err(failure) });
            }
        };

        let topic = message.topic;
        Box::pin(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => Ok(Delivery { partition, offset }),
                Ok(Err((e, _))) => Err(delivery_failure(&topic, &e)),
                Err(_) => Err(DeliveryFailure::new(topic, "producer dropped before delivery report")),
            }
        })
    }

    async fn close(&self, timeout: Duration) -> Result<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| Error::Flush(e.to_string()))?
            .map_err(|e| Error::Flush(e.to_string()))?;
        info!("kafka producer flushed");
        Ok(())
    }
}

/// librdkafka has already retried transport errors by the time a failure
/// surfaces; only a full local queue is worth another attempt.
fn delivery_failure(topic: &str, e: &KafkaError) -> DeliveryFailure {
    match e.rdkafka_error_code() {
        Some(RDKafkaErrorCode::QueueFull) => DeliveryFailure::retriable(topic, e.to_string()),
        _ => DeliveryFailure::new(topic, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::DeliveryMode;

    #[test]
    fn async_mode_batches_and_compresses() {
        let config = ProducerConfig::parse("k1:9094,k2:9094").unwrap().with_mode(DeliveryMode::Async);
        let cc = client_config(&config, &config.policy());
        assert_eq!(cc.get("bootstrap.servers"), Some("k1:9094,k2:9094"));
        assert_eq!(cc.get("acks"), Some("1"));
        assert_eq!(cc.get("compression.type"), Some("snappy"));
        assert_eq!(cc.get("linger.ms"), Some("500"));
    }

    #[test]
    fn sync_mode_waits_for_all_replicas() {
        let config = ProducerConfig::parse("localhost:9094").unwrap().with_mode(DeliveryMode::Sync);
        let cc = client_config(&config, &config.policy());
        assert_eq!(cc.get("acks"), Some("all"));
        assert_eq!(cc.get("message.send.max.retries"), Some("10"));
        assert_eq!(cc.get("linger.ms"), Some("0"));
        assert_eq!(cc.get("message.timeout.ms"), Some("5000"));
    }

    #[test]
    fn only_queue_full_is_retriable() {
        let full = KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull);
        assert!(delivery_failure("chat", &full).retriable);
        let too_large = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        assert!(!delivery_failure("chat", &too_large).retriable);
    }

    #[tokio::test]
    async fn unreachable_cluster_is_a_connection_error() {
        let config = ProducerConfig::parse("127.0.0.1:1")
            .unwrap()
            .with_connect_timeout(Duration::from_millis(300));
        let err = KafkaBroker::connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }
}
