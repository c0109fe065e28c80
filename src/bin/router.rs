//! `nlds-router`: the NLDS worker (spec §4.7). In a real deployment the
//! external REST façade (out of scope, spec §1) injects the first
//! message; this binary is the bus-facing half that turns one such
//! inbound request into a monitor transaction plus the first workflow
//! message, and runs the periodic `archive-next` sweep.

use anyhow::Result;
use nlds::bootstrap;
use nlds::bus::rabbit::RabbitBus;
use nlds::monitor::store::MonitorStore;
use nlds::router::{send_archive_next, RouterContext};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = bootstrap::load_config()?;
    bootstrap::init_tracing(&config.logging);
    info!("nlds-router starting");

    let bus = RabbitBus::new(config.rabbit_mq.clone());
    let monitor = Arc::new(MonitorStore::connect(&config.monitor.database_url, 5).await?);
    let ctx = RouterContext::new(bus, monitor);

    let mut interval = tokio::time::interval(config.router.archive_next_interval);
    loop {
        interval.tick().await;
        match send_archive_next(&ctx).await {
            Ok(routed) => info!(
                transaction_id = %routed.transaction_id,
                routing_key = %routed.routing_key,
                "archive-next swept"
            ),
            Err(e) => error!(error = %e, "archive-next sweep failed"),
        }
    }
}
