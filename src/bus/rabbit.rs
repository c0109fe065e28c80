//! Real AMQP-backed [`Bus`] implementation on top of `lapin`, mirroring
//! `nlds/rabbit/publisher.py` / the (absent, described-only) consumer
//! counterpart: a topic exchange, publisher confirms, `mandatory=true`
//! delivery, and a keepalive daemon per connection (spec §4.1, §4.8, §6).

use super::{Bus, Consumer, DeliveryTag, InboundMessage, KeepaliveDaemon};
use crate::config::RabbitMqConfig;
use crate::error::NldsError;
use crate::protocol::Envelope;
use crate::retry::{retry_transport, RetryPolicy};
use async_trait::async_trait;
use futures_lite::stream::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A live connection plus the channel consumers publish/consume through,
/// and the keepalive daemon bound to its lifetime.
pub struct RabbitBus {
    config: RabbitMqConfig,
    inner: Mutex<Option<Active>>,
}

struct Active {
    #[allow(dead_code)]
    connection: Connection,
    channel: Channel,
    keepalive: Arc<KeepaliveDaemon>,
}

impl RabbitBus {
    pub fn new(config: RabbitMqConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: Mutex::new(None),
        })
    }

    fn amqp_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.config.user,
            self.config.password,
            self.config.server,
            self.config.port,
            percent_encode_vhost(&self.config.vhost),
        )
    }

    /// Establish (or re-establish) the connection, declare the topic
    /// exchange, and start a fresh keepalive daemon. Retried under the
    /// bus-transport backoff policy so a broker that is briefly
    /// unreachable at startup does not abort the consumer process.
    async fn connect(&self) -> Result<(), NldsError> {
        let uri = self.amqp_uri();
        let heartbeat = self.config.heartbeat;
        let exchange = self.config.exchange.clone();
        let exchange_type = self.config.exchange_type.clone();

        let (connection, channel) = retry_transport(
            RetryPolicy::bus_transport(),
            "rabbitmq connect",
            || {
                let uri = uri.clone();
                async move {
                    let props = ConnectionProperties::default()
                        .with_executor(tokio_executor_trait::Tokio::current())
                        .with_reactor(tokio_reactor_trait::Tokio);
                    let connection = Connection::connect(&uri, props)
                        .await
                        .map_err(|e| NldsError::BusTransport(e.to_string()))?;
                    let channel = connection
                        .create_channel()
                        .await
                        .map_err(|e| NldsError::BusTransport(e.to_string()))?;
                    channel
                        .confirm_select(lapin::options::ConfirmSelectOptions::default())
                        .await
                        .map_err(|e| NldsError::BusTransport(e.to_string()))?;
                    Ok((connection, channel))
                }
            },
        )
        .await?;

        let kind = match exchange_type.as_str() {
            "topic" => ExchangeKind::Topic,
            other => return Err(NldsError::Configuration {
                field: "rabbit_mq.exchange_type".to_string(),
                message: format!("unsupported exchange kind {other:?}, expected \"topic\""),
            }),
        };
        channel
            .exchange_declare(
                &exchange,
                kind,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| NldsError::BusTransport(e.to_string()))?;

        let pump_channel = channel.clone();
        let keepalive = Arc::new(KeepaliveDaemon::spawn(heartbeat, move || {
            let channel = pump_channel.clone();
            Box::pin(async move {
                // lapin pumps I/O internally via its reactor; a
                // lightweight status check is enough to surface a dead
                // channel so the next publish/consume reconnects.
                if !channel.status().connected() {
                    warn!("keepalive observed closed channel");
                }
            })
        }));

        *self.inner.lock().await = Some(Active {
            connection,
            channel,
            keepalive,
        });
        info!(exchange = %self.config.exchange, "rabbitmq bus connected");
        Ok(())
    }

    async fn channel(&self) -> Result<Channel, NldsError> {
        {
            let guard = self.inner.lock().await;
            if let Some(active) = guard.as_ref() {
                if active.channel.status().connected() {
                    return Ok(active.channel.clone());
                }
            }
        }
        self.connect().await?;
        Ok(self.inner.lock().await.as_ref().unwrap().channel.clone())
    }
}

fn percent_encode_vhost(vhost: &str) -> String {
    if vhost == "/" {
        "%2f".to_string()
    } else {
        vhost.to_string()
    }
}

#[async_trait]
impl Bus for RabbitBus {
    async fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<bool, NldsError> {
        let body = serde_json::to_vec(envelope).map_err(NldsError::from)?;
        let exchange = self.config.exchange.clone();
        let routing_key = routing_key.to_string();

        retry_transport(RetryPolicy::bus_transport(), "publish", || {
            let exchange = exchange.clone();
            let routing_key = routing_key.clone();
            let body = body.clone();
            async move {
                let channel = self.channel().await?;
                let confirm = channel
                    .basic_publish(
                        &exchange,
                        &routing_key,
                        BasicPublishOptions {
                            mandatory: true,
                            immediate: false,
                        },
                        &body,
                        BasicProperties::default().with_delivery_mode(2),
                    )
                    .await
                    .map_err(|e| NldsError::BusTransport(e.to_string()))?;

                match confirm.await {
                    Ok(lapin::publisher_confirm::Confirmation::NotRequested) => Ok(true),
                    Ok(lapin::publisher_confirm::Confirmation::Ack(_)) => Ok(true),
                    Ok(lapin::publisher_confirm::Confirmation::Nack(_)) => Ok(false),
                    Err(e) => Err(NldsError::BusTransport(e.to_string())),
                }
            }
        })
        .await
        .or_else(|e| {
            // An unrouted message (basic.return) surfaces as a broker
            // notification rather than a publish error in lapin; treat
            // any residual error here as unroutable per spec §4.1
            // ("logged but not re-raised").
            if e.is_retryable() {
                Err(e)
            } else {
                warn!(routing_key = %routing_key, error = %e, "message unroutable");
                Ok(false)
            }
        })
    }

    async fn consume(
        &self,
        queue: &str,
        binding_key: &str,
    ) -> Result<Box<dyn Consumer>, NldsError> {
        let channel = self.channel().await?;
        channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map_err(|e| NldsError::BusTransport(e.to_string()))?;
        channel
            .queue_bind(
                queue,
                &self.config.exchange,
                binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| NldsError::BusTransport(e.to_string()))?;

        let consumer = channel
            .basic_consume(
                queue,
                queue,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| NldsError::BusTransport(e.to_string()))?;

        let keepalive = self
            .inner
            .lock()
            .await
            .as_ref()
            .map(|a| Arc::clone(&a.keepalive))
            .ok_or_else(|| NldsError::BusTransport("not connected".to_string()))?;

        Ok(Box::new(RabbitConsumer {
            channel,
            consumer,
            keepalive,
        }))
    }
}

struct RabbitConsumer {
    channel: Channel,
    consumer: lapin::Consumer,
    keepalive: Arc<KeepaliveDaemon>,
}

#[async_trait]
impl Consumer for RabbitConsumer {
    async fn next(&mut self) -> Result<Option<(DeliveryTag, InboundMessage)>, NldsError> {
        self.keepalive.start_polling();
        let delivery = self.consumer.next().await;
        self.keepalive.stop_polling();

        let delivery = match delivery {
            None => return Ok(None),
            Some(Err(e)) => return Err(NldsError::BusTransport(e.to_string())),
            Some(Ok(d)) => d,
        };

        let mut envelope: Envelope =
            serde_json::from_slice(&delivery.data).map_err(NldsError::from)?;
        envelope.decompress()?;

        Ok(Some((
            DeliveryTag(delivery.delivery_tag),
            InboundMessage {
                routing_key: delivery.routing_key.to_string(),
                envelope,
            },
        )))
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), NldsError> {
        self.channel
            .basic_ack(tag.0, BasicAckOptions::default())
            .await
            .map_err(|e| NldsError::BusTransport(e.to_string()))
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), NldsError> {
        self.channel
            .basic_nack(tag.0, BasicNackOptions { requeue, multiple: false })
            .await
            .map_err(|e| NldsError::BusTransport(e.to_string()))
    }

    fn keepalive(&self) -> Arc<KeepaliveDaemon> {
        Arc::clone(&self.keepalive)
    }
}
