//! `nlds-indexer`: walks POSIX paths, checks access, and emits file
//! batches sized by count and bytes (spec §4.3). Subscribes to
//! `nlds.index.*`; complete batches move on to `nlds.cat.start`,
//! re-indexed problem paths loop back to `nlds.index.init`, and
//! terminally-failed paths are recorded against the monitor and
//! forwarded to `nlds.log.err`.

use anyhow::Result;
use nlds::bootstrap;
use nlds::bus::rabbit::RabbitBus;
use nlds::bus::Bus;
use nlds::indexer::{self, IndexerContext};
use nlds::monitor::state::State;
use nlds::monitor::store::MonitorStore;
use nlds::protocol::{Action, Envelope, RoutingKey, Workflow, ROOT};
use tracing::{error, info, warn};

const QUEUE: &str = "nlds_index";
const BINDING: &str = "nlds.index.*";

#[tokio::main]
async fn main() -> Result<()> {
    let config = bootstrap::load_config()?;
    bootstrap::init_tracing(&config.logging);
    info!("nlds-indexer starting");

    let bus = RabbitBus::new(config.rabbit_mq.clone());
    let monitor = MonitorStore::connect(&config.monitor.database_url, 5).await?;
    let mut consumer = bus.consume(QUEUE, BINDING).await?;

    let max_retries = config.indexer.max_retries;
    let filelist_max_length = config.indexer.filelist_max_length;
    let message_threshold = config.indexer.filelist_max_size;

    loop {
        let Some((tag, inbound)) = consumer.next().await? else {
            break;
        };

        let mut details = inbound.envelope.details.clone();
        let filelist = match inbound.envelope.filelist() {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, "malformed filelist, dropping message");
                consumer.nack(tag, false).await?;
                continue;
            }
        };

        let chunks = indexer::split_oversized(filelist, filelist_max_length);
        if chunks.len() > 1 {
            info!(sub_id = %details.sub_id, chunks = chunks.len(), "splitting oversized filelist");
            for chunk in chunks {
                let mut chunk_details = details.clone();
                chunk_details.append_route("indexer");
                let envelope = Envelope::with_filelist(chunk_details, &chunk)?;
                let rk = RoutingKey::new(ROOT, Workflow::Index, Action::Start);
                bus.publish(&rk.to_string(), &envelope).await?;
            }
            consumer.ack(tag).await?;
            continue;
        }

        // Resolve the *requesting* user's identity fresh for this
        // message (spec §4.3) rather than checking access as the
        // indexer service process itself.
        let (uid, gids) = match indexer::resolve_requester(&details.user, &details.group) {
            Ok(identity) => identity,
            Err(e) => {
                error!(error = %e, user = %details.user, sub_id = %details.sub_id, "cannot resolve requesting user, dropping message");
                consumer.nack(tag, false).await?;
                continue;
            }
        };
        let ctx = IndexerContext {
            uid,
            gids,
            max_retries,
            filelist_max_length,
            message_threshold,
        };

        let outcome = indexer::index(chunks.into_iter().next().unwrap_or_default(), &ctx);
        details.append_route("indexer");

        if !outcome.failed.is_empty() {
            if let Ok(sub) = monitor.get_sub_record(details.sub_id).await {
                for item in &outcome.failed {
                    let reason = item
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "retries_exhausted".to_string());
                    let _ = monitor.append_failed_file(sub.id, &item.original_path, &reason).await;
                }
            }
            let envelope = Envelope::with_filelist(details.clone(), &outcome.failed)?;
            let rk = RoutingKey::new(ROOT, Workflow::Index, Action::Failed);
            bus.publish(&rk.to_string(), &envelope).await?;
        }

        if !outcome.problem.is_empty() {
            warn!(sub_id = %details.sub_id, count = outcome.problem.len(), "re-queueing problem paths");
            let envelope = Envelope::with_filelist(details.clone(), &outcome.problem)?;
            let rk = RoutingKey::new(ROOT, Workflow::Index, Action::Init);
            bus.publish(&rk.to_string(), &envelope).await?;
        }

        if !outcome.complete.is_empty() {
            if monitor
                .transition(details.sub_id, State::CatalogPutting)
                .await
                .is_ok()
            {
                details.state = State::CatalogPutting;
            }
            for batch in outcome.complete {
                let envelope = Envelope::with_filelist(details.clone(), &batch)?;
                let rk = RoutingKey::new(ROOT, Workflow::Catalog, Action::Start);
                bus.publish(&rk.to_string(), &envelope).await?;
            }
        }

        consumer.ack(tag).await?;
    }

    Ok(())
}
