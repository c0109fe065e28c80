//! `nlds-transfer`: the `tran` consumer (spec §4.4/§4.6). Streams bytes
//! between disk and the object store, chunked and Adler-32 checksummed,
//! for PUT/GET/DEL alike — direction is read off `details.api_action`
//! since all three share the same `tran.start` entry point.
//!
//! The object-store client here is [`MockObjectStore`]: the real
//! S3-compatible driver is an external collaborator this crate
//! specifies the interface for but does not implement (spec §1
//! Non-goals).

use anyhow::Result;
use nlds::bootstrap;
use nlds::bus::rabbit::RabbitBus;
use nlds::bus::Bus;
use nlds::catalog::models::StorageType;
use nlds::catalog::store::CatalogStore;
use nlds::logging::{log_envelope, monitor_envelope};
use nlds::monitor::state::State;
use nlds::monitor::state::LogLevel;
use nlds::monitor::store::MonitorStore;
use nlds::transfer::{self, bucket_for, object_name_for, MockObjectStore, ObjectStoreClient};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const QUEUE: &str = "nlds_transfer";
const BINDING: &str = "nlds.tran.*";

#[tokio::main]
async fn main() -> Result<()> {
    let config = bootstrap::load_config()?;
    bootstrap::init_tracing(&config.logging);
    info!("nlds-transfer starting");

    let bus = RabbitBus::new(config.rabbit_mq.clone());
    let catalog = CatalogStore::connect(&config.catalog.database_url, config.catalog.max_connections).await?;
    let monitor = MonitorStore::connect(&config.monitor.database_url, 5).await?;
    let store: Arc<dyn ObjectStoreClient> = Arc::new(MockObjectStore::new());
    let mut consumer = bus.consume(QUEUE, BINDING).await?;

    loop {
        let Some((tag, inbound)) = consumer.next().await? else {
            break;
        };

        let mut details = inbound.envelope.details.clone();
        let filelist = inbound.envelope.filelist().unwrap_or_default();
        details.append_route("transfer");
        let bucket = bucket_for(&details.transaction_id);

        let mut failed = Vec::new();
        let mut succeeded = Vec::new();

        match details.api_action.as_str() {
            "PUTLIST" => {
                let (ok, fail) = transfer::put_filelist(
                    Arc::clone(&store),
                    &filelist,
                    &bucket,
                    &details.group,
                    config.transfer.chunk_size,
                )
                .await;
                for (detail, outcome) in ok {
                    if let Ok(Some(catalog_file)) = catalog.find_file_by_original_path(&detail.original_path).await {
                        let url = format!("{bucket}:{}", object_name_for(&detail));
                        let _ = catalog
                            .add_location(
                                catalog_file.id,
                                StorageType::ObjectStorage,
                                &url,
                                &bucket,
                                Some(outcome.checksum),
                                None,
                            )
                            .await;
                    }
                    succeeded.push(detail);
                }
                failed = fail;
            }
            "GETLIST" => {
                for detail in &filelist {
                    let object = object_name_for(detail);
                    let checksum = match catalog.find_file_by_original_path(&detail.original_path).await {
                        Ok(Some(file)) => catalog
                            .get_location(file.id, StorageType::ObjectStorage)
                            .await
                            .ok()
                            .flatten()
                            .and_then(|loc| loc.checksum)
                            .unwrap_or(0),
                        _ => 0,
                    };
                    let dest = Path::new(&detail.original_path);
                    match transfer::get_file(store.as_ref(), dest, &bucket, &object, checksum, config.transfer.chunk_size).await {
                        Ok(_) => succeeded.push(detail.clone()),
                        Err(e) => failed.push((detail.clone(), e.failure_reason().to_string())),
                    }
                }
            }
            "DEL" => {
                for detail in &filelist {
                    let object = object_name_for(detail);
                    match transfer::delete_object(store.as_ref(), &bucket, &object).await {
                        Ok(()) => {
                            if let Ok(Some(file)) = catalog.find_file_by_original_path(&detail.original_path).await {
                                let _ = catalog.remove_location(file.id, StorageType::ObjectStorage).await;
                            }
                            succeeded.push(detail.clone());
                        }
                        Err(e) => failed.push((detail.clone(), e.failure_reason().to_string())),
                    }
                }
            }
            other => {
                warn!(api_action = other, "transfer consumer received unhandled api_action");
            }
        }

        if !failed.is_empty() {
            if let Ok(sub) = monitor.get_sub_record(details.sub_id).await {
                for (detail, reason) in &failed {
                    let _ = monitor.append_failed_file(sub.id, &detail.original_path, reason).await;
                }
            }
        }

        let terminal = match (succeeded.is_empty(), failed.is_empty()) {
            (_, true) => State::Complete,
            (false, false) => State::CompleteWithErrors,
            (true, false) => State::Failed,
        };
        let level = if failed.is_empty() { LogLevel::Info } else { LogLevel::Warn };
        let message = format!(
            "transfer {}: {} succeeded, {} failed",
            details.api_action,
            succeeded.len(),
            failed.len()
        );
        let (rk, envelope) = log_envelope(details.transaction_id, details.sub_id, "transfer", level, message.clone());
        bus.publish(&rk.to_string(), &envelope).await?;
        let (mon_rk, mon_envelope) = monitor_envelope(details.transaction_id, details.sub_id, "transfer", level, message);
        bus.publish(&mon_rk.to_string(), &mon_envelope).await?;

        consumer.ack(tag).await?;
    }

    Ok(())
}
