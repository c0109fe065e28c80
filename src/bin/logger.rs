//! `nlds-logger`: the logging consumer (spec §11, grounded in
//! `nlds_processors/logger.py`). Subscribes to `nlds.log.*` and turns
//! every envelope it receives into a `tracing` event at the matching
//! level via [`nlds::logging::dispatch`], so a single transaction's
//! trail through the other consumers can be grepped out of aggregate
//! process output by `transaction_id`/`sub_id`.
//!
//! This binary has no database of its own: durable persistence of log
//! records, if required, is the concern of whatever `tracing-subscriber`
//! layer the deployment's `logging` config section selects (spec §6),
//! not this crate.

use anyhow::Result;
use nlds::bootstrap;
use nlds::bus::rabbit::RabbitBus;
use nlds::bus::Bus;
use nlds::logging;
use tracing::{error, info, warn};

const QUEUE: &str = "nlds_log";
const BINDING: &str = "nlds.log.*";

#[tokio::main]
async fn main() -> Result<()> {
    let config = bootstrap::load_config()?;
    bootstrap::init_tracing(&config.logging);
    info!("nlds-logger starting");

    let bus = RabbitBus::new(config.rabbit_mq.clone());
    let mut consumer = bus.consume(QUEUE, BINDING).await?;

    loop {
        let Some((tag, inbound)) = consumer.next().await? else {
            break;
        };

        if let Err(e) = logging::dispatch(&inbound.envelope) {
            warn!(error = %e, routing_key = %inbound.routing_key, "malformed log message, dropping");
            consumer.nack(tag, false).await?;
            continue;
        }

        consumer.ack(tag).await?;
    }

    error!("nlds-logger consumer stream ended");
    Ok(())
}
