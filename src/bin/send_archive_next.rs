//! `nlds-send-archive-next`: the administrative CLI surface (spec §6)
//! for triggering one `archive-next` sweep on demand, independent of
//! `nlds-router`'s own periodic timer. Publishes a single empty-filelist
//! `ARCHIVE_INIT` message and exits; the `cat` consumer populates it
//! with eligible-for-archive candidates downstream.
//!
//! Exit code 0 on a successfully published sweep, non-zero on a fatal
//! config or publish error (spec §6 CLI surface).

use anyhow::Result;
use nlds::bootstrap;
use nlds::bus::rabbit::RabbitBus;
use nlds::monitor::store::MonitorStore;
use nlds::router::{send_archive_next, RouterContext};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "send-archive-next failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = bootstrap::load_config()?;
    bootstrap::init_tracing(&config.logging);

    let bus = RabbitBus::new(config.rabbit_mq.clone());
    let monitor = Arc::new(MonitorStore::connect(&config.monitor.database_url, 5).await?);
    let ctx = RouterContext::new(bus, monitor);

    let routed = send_archive_next(&ctx).await?;
    info!(
        transaction_id = %routed.transaction_id,
        routing_key = %routed.routing_key,
        "archive-next sweep published"
    );
    Ok(())
}
