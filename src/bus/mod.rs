//! Message bus abstraction: a topic-routed AMQP exchange (spec §6), plus
//! the keepalive daemon that pumps broker I/O while a consumer's handler
//! is busy (spec §4.8).
//!
//! The engine has no central orchestrator — the routing key *is* the
//! program counter, so [`Bus::publish`] and [`Bus::consume`] are the only
//! two verbs every consumer needs.

pub mod keepalive;
pub mod memory;
pub mod rabbit;

pub use keepalive::KeepaliveDaemon;
pub use memory::InMemoryBus;
pub use rabbit::RabbitBus;

use crate::error::NldsError;
use crate::protocol::Envelope;
use async_trait::async_trait;
use std::sync::Arc;

/// A message pulled off a queue: the routing key it arrived on plus its
/// decoded envelope (already transparently decompressed).
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub routing_key: String,
    pub envelope: Envelope,
}

/// Publisher-side contract every consumer shares: request confirms and
/// `mandatory=true` (spec §4.1). An unrouted message is logged, not
/// re-raised, so a typo'd routing key cannot wedge the pipeline into an
/// infinite republish loop.
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Publish `envelope` to `routing_key` on the named exchange. Retried
    /// under [`crate::retry::RetryPolicy::bus_transport`] on transport
    /// failure; an unroutable message returns `Ok(false)` rather than an
    /// error.
    async fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<bool, NldsError>;

    /// Bind `queue` with `binding_key` (a routing-key pattern, possibly
    /// containing `*`/`#` wildcards) and return a handle that yields
    /// messages as they arrive. Declares the queue if it does not exist.
    async fn consume(
        &self,
        queue: &str,
        binding_key: &str,
    ) -> Result<Box<dyn Consumer>, NldsError>;
}

/// A bound queue's consumption handle. `ack`/`nack` let the caller control
/// redelivery semantics explicitly (spec §5 "unacked messages are
/// redelivered by the broker").
#[async_trait]
pub trait Consumer: Send + Sync {
    async fn next(&mut self) -> Result<Option<(DeliveryTag, InboundMessage)>, NldsError>;
    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), NldsError>;
    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), NldsError>;

    /// Hand the daemon a signal that this consumer is actively polling,
    /// so the keepalive loop pumps the connection in the background
    /// while the handler does its (possibly slow) work.
    fn keepalive(&self) -> Arc<KeepaliveDaemon>;
}

/// Opaque broker delivery tag, echoed back on ack/nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub u64);
