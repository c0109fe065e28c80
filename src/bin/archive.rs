//! `nlds-archive`: the `archive` consumer (spec §4.6). Bins the filelist
//! it receives into tape-sized aggregations, enforces the group's tape
//! quota before writing a byte, then writes each surviving bin to tape
//! as a tar-formatted aggregation and records the new locations against
//! the catalog.
//!
//! The tape client here is [`MockTapeClient`]: the real XRootD (or
//! equivalent) driver is an external collaborator this crate specifies
//! the interface for but does not implement (spec §1 Non-goals), same
//! as the object-store client in `nlds-transfer`.

use anyhow::Result;
use nlds::aggregator;
use nlds::archive::{self, MockTapeClient, TapeClient};
use nlds::bootstrap;
use nlds::bus::rabbit::RabbitBus;
use nlds::bus::Bus;
use nlds::catalog::models::StorageType;
use nlds::catalog::store::CatalogStore;
use nlds::logging::{log_envelope, monitor_envelope};
use nlds::monitor::state::{LogLevel, State};
use nlds::monitor::store::MonitorStore;
use nlds::transfer::{bucket_for, MockObjectStore, ObjectStoreClient};
use std::sync::Arc;
use tracing::{info, warn};

const QUEUE: &str = "nlds_archive";
const BINDING: &str = "nlds.archive.*";

#[tokio::main]
async fn main() -> Result<()> {
    let config = bootstrap::load_config()?;
    bootstrap::init_tracing(&config.logging);
    info!("nlds-archive starting");

    let bus = RabbitBus::new(config.rabbit_mq.clone());
    let catalog = CatalogStore::connect(&config.catalog.database_url, config.catalog.max_connections).await?;
    let monitor = MonitorStore::connect(&config.monitor.database_url, 5).await?;
    let store: Arc<dyn ObjectStoreClient> = Arc::new(MockObjectStore::new());
    let tape: Arc<dyn TapeClient> = Arc::new(MockTapeClient::new());
    let mut consumer = bus.consume(QUEUE, BINDING).await?;

    loop {
        let Some((tag, inbound)) = consumer.next().await? else {
            break;
        };

        let mut details = inbound.envelope.details.clone();
        let filelist = inbound.envelope.filelist().unwrap_or_default();
        details.append_route("archive");
        let bucket = details.tenancy.clone().unwrap_or_else(|| bucket_for(&details.transaction_id));

        if filelist.is_empty() {
            let _ = monitor.transition(details.sub_id, State::Complete).await;
            consumer.ack(tag).await?;
            continue;
        }

        let total_size: u64 = filelist.iter().map(|d| d.size).sum();
        let quota = catalog.quota(&details.group).await;
        if let Ok(q) = &quota {
            if q.would_exceed(total_size) {
                warn!(group = %details.group, total_size, "archive-put would exceed tape quota");
                if let Ok(sub) = monitor.get_sub_record(details.sub_id).await {
                    for detail in &filelist {
                        let _ = monitor
                            .append_failed_file(sub.id, &detail.original_path, "quota_exceeded")
                            .await;
                    }
                }
                let _ = monitor.transition(details.sub_id, State::Failed).await;
                consumer.ack(tag).await?;
                continue;
            }
        }

        let bins = match aggregator::aggregate(&filelist, config.archive.target_aggregation_size) {
            Ok(bins) => bins,
            Err(e) => {
                warn!(error = %e, sub_id = %details.sub_id, "aggregation failed");
                let _ = monitor.transition(details.sub_id, State::Failed).await;
                consumer.ack(tag).await?;
                continue;
            }
        };

        let _ = monitor.transition(details.sub_id, State::ArchivePutting).await;

        let mut failed = Vec::new();
        let mut archived_size: i64 = 0;

        for bin in bins {
            let outcome = match archive::put_bin(
                Arc::clone(&store),
                tape.as_ref(),
                &bucket,
                &config.archive.tape_url,
                bin.clone(),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, sub_id = %details.sub_id, "archive-put bin failed");
                    for detail in &bin {
                        failed.push((detail.clone(), e.failure_reason().to_string()));
                    }
                    continue;
                }
            };

            catalog
                .update_tape(&outcome.aggregation_id, &outcome.tarfile_path, outcome.checksum)
                .await?;

            for member in &outcome.members {
                if let Ok(Some(file)) = catalog.find_file_by_original_path(&member.original_path).await {
                    catalog
                        .add_location(
                            file.id,
                            StorageType::Tape,
                            &outcome.tarfile_path,
                            &config.archive.tape_url,
                            Some(outcome.checksum),
                            Some(&outcome.aggregation_id),
                        )
                        .await?;
                    archived_size += member.size as i64;
                }
            }

            let archived_paths: std::collections::HashSet<String> =
                outcome.members.iter().map(|d| d.original_path.clone()).collect();
            for detail in bin.iter().filter(|d| !archived_paths.contains(&d.original_path)) {
                failed.push((detail.clone(), "object_missing".to_string()));
            }
        }

        if archived_size > 0 {
            let _ = catalog.adjust_quota_used(&details.group, archived_size).await;
        }

        let _ = monitor.transition(details.sub_id, State::CatalogArchiveUpdating).await;

        if !failed.is_empty() {
            if let Ok(sub) = monitor.get_sub_record(details.sub_id).await {
                for (detail, reason) in &failed {
                    let _ = monitor.append_failed_file(sub.id, &detail.original_path, reason).await;
                }
            }
        }

        let terminal = if failed.is_empty() {
            State::Complete
        } else if archived_size > 0 {
            State::CompleteWithErrors
        } else {
            State::Failed
        };
        let _ = monitor.transition(details.sub_id, terminal).await;

        let level = if failed.is_empty() { LogLevel::Info } else { LogLevel::Warn };
        let message = format!("archive-put: {} members archived, {} failed", archived_size, failed.len());
        let (rk, envelope) = log_envelope(details.transaction_id, details.sub_id, "archive", level, message.clone());
        bus.publish(&rk.to_string(), &envelope).await?;
        let (mon_rk, mon_envelope) = monitor_envelope(details.transaction_id, details.sub_id, "archive", level, message);
        bus.publish(&mon_rk.to_string(), &mon_envelope).await?;

        consumer.ack(tag).await?;
    }

    Ok(())
}
