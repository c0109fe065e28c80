//! In-memory bus used by integration tests: no real broker, but the same
//! topic-exchange routing semantics (spec §6), so consumer-loop tests can
//! assert on what gets published without a RabbitMQ instance.

use super::{Bus, Consumer, DeliveryTag, InboundMessage, KeepaliveDaemon};
use crate::error::NldsError;
use crate::protocol::Envelope;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// AMQP topic-exchange pattern match: `*` matches exactly one dot-segment,
/// `#` matches zero or more segments.
fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pat: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_segments(&pat, &key)
}

fn matches_segments(pat: &[&str], key: &[&str]) -> bool {
    match pat.first() {
        None => key.is_empty(),
        Some(&"#") => {
            if pat.len() == 1 {
                return true;
            }
            (0..=key.len()).any(|i| matches_segments(&pat[1..], &key[i..]))
        }
        Some(&"*") => !key.is_empty() && matches_segments(&pat[1..], &key[1..]),
        Some(seg) => key.first() == Some(seg) && matches_segments(&pat[1..], &key[1..]),
    }
}

struct Binding {
    pattern: String,
    sender: mpsc::UnboundedSender<(DeliveryTag, InboundMessage)>,
}

/// A deterministic, single-process stand-in for the AMQP bus.
pub struct InMemoryBus {
    bindings: Mutex<HashMap<String, Binding>>,
    next_tag: AtomicU64,
    /// Routing keys that matched no binding at publish time, retained for
    /// test assertions (spec: "an unrouted message is logged but not
    /// re-raised").
    pub unrouted: Mutex<Vec<String>>,
}

impl InMemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bindings: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
            unrouted: Mutex::new(Vec::new()),
        })
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
            unrouted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<bool, NldsError> {
        let bindings = self.bindings.lock().await;
        let mut routed = false;
        for binding in bindings.values() {
            if topic_matches(&binding.pattern, routing_key) {
                let tag = DeliveryTag(self.next_tag.fetch_add(1, Ordering::SeqCst));
                let msg = InboundMessage {
                    routing_key: routing_key.to_string(),
                    envelope: envelope.clone(),
                };
                // A disconnected receiver means the queue handle was
                // dropped; treat as unrouted rather than erroring the
                // publisher.
                if binding.sender.send((tag, msg)).is_ok() {
                    routed = true;
                }
            }
        }
        if !routed {
            self.unrouted.lock().await.push(routing_key.to_string());
        }
        Ok(routed)
    }

    async fn consume(
        &self,
        queue: &str,
        binding_key: &str,
    ) -> Result<Box<dyn Consumer>, NldsError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.bindings.lock().await.insert(
            queue.to_string(),
            Binding {
                pattern: binding_key.to_string(),
                sender: tx,
            },
        );
        Ok(Box::new(MemoryConsumer {
            receiver: rx,
            keepalive: Arc::new(KeepaliveDaemon::spawn(Duration::from_secs(2), || {
                Box::pin(async {})
            })),
        }))
    }
}

struct MemoryConsumer {
    receiver: mpsc::UnboundedReceiver<(DeliveryTag, InboundMessage)>,
    keepalive: Arc<KeepaliveDaemon>,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Option<(DeliveryTag, InboundMessage)>, NldsError> {
        self.keepalive.start_polling();
        let next = self.receiver.recv().await;
        self.keepalive.stop_polling();
        Ok(next)
    }

    async fn ack(&mut self, _tag: DeliveryTag) -> Result<(), NldsError> {
        Ok(())
    }

    async fn nack(&mut self, _tag: DeliveryTag, _requeue: bool) -> Result<(), NldsError> {
        Ok(())
    }

    fn keepalive(&self) -> Arc<KeepaliveDaemon> {
        Arc::clone(&self.keepalive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Details, Envelope, MessageType};

    fn sample_envelope() -> Envelope {
        Envelope::new(
            Details::new("alice", "gws_test", "PUT"),
            serde_json::json!({}),
            MessageType::Standard,
        )
    }

    #[test]
    fn wildcard_action_matches_any_step() {
        assert!(topic_matches("nlds.cat.*", "nlds.cat.complete"));
        assert!(topic_matches("nlds.cat.*", "nlds.cat.init"));
        assert!(!topic_matches("nlds.cat.*", "nlds.tran.complete"));
    }

    #[test]
    fn hash_matches_multiple_segments() {
        assert!(topic_matches("nlds.#", "nlds.cat.complete"));
        assert!(topic_matches("#", "nlds.cat.complete"));
    }

    #[tokio::test]
    async fn publish_reaches_bound_queue() {
        let bus = InMemoryBus::new();
        let mut consumer = bus.consume("cat_q", "nlds.cat.*").await.unwrap();
        let routed = bus.publish("nlds.cat.complete", &sample_envelope()).await.unwrap();
        assert!(routed);
        let (_, msg) = consumer.next().await.unwrap().unwrap();
        assert_eq!(msg.routing_key, "nlds.cat.complete");
    }

    #[tokio::test]
    async fn publish_with_no_binding_is_unrouted_not_error() {
        let bus = InMemoryBus::new();
        let routed = bus.publish("nlds.cat.complete", &sample_envelope()).await.unwrap();
        assert!(!routed);
        assert_eq!(bus.unrouted.lock().await.len(), 1);
    }
}
