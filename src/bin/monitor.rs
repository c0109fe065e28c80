//! `nlds-monitor`: the live-monitoring sink (spec §11, grounded in
//! `nlds_processors/monitor.py`). Subscribes to `nlds.monitor.*` — the
//! same level-tagged action space the logger uses on `nlds.log.*`, just
//! mirrored onto a separate routing key so a dashboard can bind to it
//! independently of durable log storage — and turns each message into
//! a `tracing` event.
//!
//! This is distinct from [`nlds::monitor::store::MonitorStore`], the
//! per-sub-transaction progress store every other consumer writes to
//! directly in-process; this binary has no database of its own.

use anyhow::Result;
use nlds::bootstrap;
use nlds::bus::rabbit::RabbitBus;
use nlds::bus::Bus;
use nlds::logging;
use tracing::{error, info, warn};

const QUEUE: &str = "nlds_monitor";
const BINDING: &str = "nlds.monitor.*";

#[tokio::main]
async fn main() -> Result<()> {
    let config = bootstrap::load_config()?;
    bootstrap::init_tracing(&config.logging);
    info!("nlds-monitor starting");

    let bus = RabbitBus::new(config.rabbit_mq.clone());
    let mut consumer = bus.consume(QUEUE, BINDING).await?;

    loop {
        let Some((tag, inbound)) = consumer.next().await? else {
            break;
        };

        if let Err(e) = logging::dispatch(&inbound.envelope) {
            warn!(error = %e, routing_key = %inbound.routing_key, "malformed monitor message, dropping");
            consumer.nack(tag, false).await?;
            continue;
        }

        consumer.ack(tag).await?;
    }

    error!("nlds-monitor consumer stream ended");
    Ok(())
}
