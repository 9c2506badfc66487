//! Pulsar-backed bus endpoints.
//!
//! The consumer is owned by a pump task: receives flow out through a
//! bounded channel and acknowledgements flow back through another, so the
//! single consumer object never sees contention between the two.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use pulsar::consumer::{ConsumerOptions, InitialPosition};
use pulsar::proto::MessageIdData;
use pulsar::{producer, Consumer, Producer, Pulsar, SubType, TokioExecutor};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::source::{
    AckHandle, AckInner, BusError, InboundMessage, MessageSink, MessageSource, SendCallback,
};

/// Receiver queue depth, and the depth of the pump's outbound channel.
const RECEIVER_QUEUE_SIZE: u32 = 2000;

// ── Configuration ────────────────────────────────────────────────────

/// One bus endpoint with its TLS material.
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {
    pub url: String,
    /// Path to the CA certificate pem, empty for none.
    pub trust_certs: String,
    /// Client certificate/key paths. Accepted for CLI compatibility; this
    /// client has no TLS client-certificate auth, so a warning is logged.
    pub cert_file: String,
    pub key_file: String,
    pub allow_insecure: bool,
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topics: Vec<String>,
    pub subscription: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub topic: String,
    pub name: String,
    pub batch_max_messages: u32,
    pub batch_max_size: usize,
    /// Accepted but not forwarded: the client batches by count/size only.
    pub batch_max_publish_delay_ms: u64,
}

async fn build_client(endpoint: &EndpointConfig) -> Result<Pulsar<TokioExecutor>, BusError> {
    let mut builder = Pulsar::builder(&endpoint.url, TokioExecutor);

    if !endpoint.trust_certs.is_empty() {
        let pem = tokio::fs::read(&endpoint.trust_certs)
            .await
            .map_err(|e| BusError::Connection(format!("read {}: {e}", endpoint.trust_certs)))?;
        builder = builder.with_certificate_chain(pem);
    }
    if !endpoint.cert_file.is_empty() || !endpoint.key_file.is_empty() {
        warn!(
            url = %endpoint.url,
            "client certificate auth is not supported by this pulsar client; ignoring cert/key files"
        );
    }
    builder = builder.with_allow_insecure_connection(endpoint.allow_insecure);

    Ok(builder.build().await?)
}

// ── Source ───────────────────────────────────────────────────────────

pub struct PulsarSource {
    messages: Mutex<mpsc::Receiver<InboundMessage>>,
    acks: mpsc::Sender<(String, MessageIdData)>,
}

impl PulsarSource {
    /// Connect, subscribe, and start the pump task.
    pub async fn connect(
        endpoint: &EndpointConfig,
        config: &ConsumerConfig,
    ) -> Result<Arc<Self>, BusError> {
        let client = build_client(endpoint).await?;
        let consumer: Consumer<Vec<u8>, TokioExecutor> = client
            .consumer()
            .with_topics(&config.topics)
            .with_subscription(&config.subscription)
            .with_consumer_name(&config.name)
            .with_subscription_type(SubType::Exclusive)
            .with_batch_size(RECEIVER_QUEUE_SIZE)
            .with_options(ConsumerOptions {
                initial_position: InitialPosition::Latest,
                ..Default::default()
            })
            .build()
            .await?;
        info!(
            url = %endpoint.url,
            topics = ?config.topics,
            subscription = %config.subscription,
            "subscribed"
        );

        let (msg_tx, msg_rx) = mpsc::channel(RECEIVER_QUEUE_SIZE as usize);
        let (ack_tx, ack_rx) = mpsc::channel(RECEIVER_QUEUE_SIZE as usize);
        tokio::spawn(pump(consumer, msg_tx, ack_rx));

        Ok(Arc::new(Self {
            messages: Mutex::new(msg_rx),
            acks: ack_tx,
        }))
    }
}

#[async_trait]
impl MessageSource for PulsarSource {
    async fn recv(&self) -> Option<InboundMessage> {
        self.messages.lock().await.recv().await
    }

    async fn ack(&self, msg: &InboundMessage) -> Result<(), BusError> {
        match &msg.ack.0 {
            AckInner::Pulsar { topic, id } => self
                .acks
                .send((topic.clone(), id.clone()))
                .await
                .map_err(|_| BusError::Ack("consumer pump is gone".to_string())),
            AckInner::Seq(_) => Ok(()),
        }
    }
}

async fn pump(
    mut consumer: Consumer<Vec<u8>, TokioExecutor>,
    msg_tx: mpsc::Sender<InboundMessage>,
    mut ack_rx: mpsc::Receiver<(String, MessageIdData)>,
) {
    loop {
        tokio::select! {
            received = consumer.try_next() => match received {
                Ok(Some(msg)) => {
                    let publish_time = publish_time(msg.metadata().publish_time);
                    let inbound = InboundMessage {
                        payload: Bytes::from(msg.payload.data.clone()),
                        publish_time,
                        ack: AckHandle(AckInner::Pulsar {
                            topic: msg.topic.clone(),
                            id: msg.message_id().clone(),
                        }),
                    };
                    if msg_tx.send(inbound).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    info!("consumer stream ended");
                    return;
                }
                Err(e) => error!("consumer receive: {e}"),
            },
            ack = ack_rx.recv() => match ack {
                Some((topic, id)) => {
                    if let Err(e) = consumer.ack_with_id(&topic, id).await {
                        warn!("ack: {e}");
                    }
                }
                None => return,
            },
        }
    }
}

fn publish_time(millis: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis as i64).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// ── Sink ─────────────────────────────────────────────────────────────

pub struct PulsarSink {
    producer: Mutex<Producer<TokioExecutor>>,
}

impl PulsarSink {
    pub async fn connect(
        endpoint: &EndpointConfig,
        config: &ProducerConfig,
    ) -> Result<Arc<Self>, BusError> {
        let client = build_client(endpoint).await?;
        let producer = client
            .producer()
            .with_topic(&config.topic)
            .with_name(&config.name)
            .with_options(producer::ProducerOptions {
                batch_size: Some(config.batch_max_messages),
                batch_byte_size: Some(config.batch_max_size),
                ..Default::default()
            })
            .build()
            .await?;
        info!(url = %endpoint.url, topic = %config.topic, "producer ready");

        Ok(Arc::new(Self {
            producer: Mutex::new(producer),
        }))
    }
}

#[async_trait]
impl MessageSink for PulsarSink {
    async fn send(&self, key: String, payload: Vec<u8>, done: SendCallback) {
        let message = producer::Message {
            payload,
            partition_key: Some(key),
            ..Default::default()
        };
        let queued = {
            let mut producer = self.producer.lock().await;
            producer.send_non_blocking(message).await
        };
        match queued {
            Ok(receipt) => {
                tokio::spawn(async move {
                    match receipt.await {
                        Ok(_) => done(Ok(())),
                        Err(e) => done(Err(e.to_string())),
                    }
                });
            }
            Err(e) => done(Err(e.to_string())),
        }
    }
}
