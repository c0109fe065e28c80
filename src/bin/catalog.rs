//! `nlds-catalog`: the `cat` consumer (spec §4.5). Reached from three
//! directions per the pipeline diagram in spec §2 — PUT (catalogue new
//! files, hand off to transfer-put), GET (resolve the holding and
//! existing locations, hand off to transfer/archive-get) and the
//! periodic archive-next sweep (populate eligible-for-archive
//! candidates) — plus DEL (catalog-only holding/file removal).
//!
//! Permission checks use [`nlds::catalog::permissions`] against
//! `details.user`/`details.group`; role (MANAGER/DEPUTY) resolution
//! against the external identity provider requires a bearer token that
//! travels only on the API façade's request, not on the internal bus
//! envelope (spec §1 Non-goals: the façade is an external collaborator),
//! so this consumer enforces ownership equality and otherwise denies —
//! admin override happens upstream of the bus, see DESIGN.md.

use anyhow::Result;
use nlds::auth::GroupRole;
use nlds::bootstrap;
use nlds::bus::rabbit::RabbitBus;
use nlds::bus::Bus;
use nlds::catalog::models::{CatalogFile, StorageType};
use nlds::catalog::permissions;
use nlds::catalog::store::CatalogStore;
use nlds::catalog::PathQuery;
use nlds::monitor::state::State;
use nlds::monitor::store::MonitorStore;
use nlds::protocol::{Action, Envelope, PathDetails, RoutingKey, Workflow, ROOT};
use std::collections::HashMap;
use tracing::{info, warn};

const QUEUE: &str = "nlds_catalog";
const BINDING: &str = "nlds.cat.*";

fn catalog_file_from_detail(transaction_id: i64, detail: &PathDetails) -> CatalogFile {
    CatalogFile {
        id: 0,
        transaction_id,
        original_path: detail.original_path.clone(),
        path_type: detail.path_type,
        link_path: detail.link_path.clone(),
        size: detail.size,
        uid: detail.uid,
        group_name: String::new(),
        mode: detail.mode,
        access_time: detail.access_time,
        object_name: detail.object_name.clone(),
    }
}

fn detail_from_catalog_file(file: &CatalogFile) -> PathDetails {
    let mut detail = PathDetails::new(file.original_path.clone(), file.path_type, file.size);
    detail.link_path = file.link_path.clone();
    detail.mode = file.mode;
    detail.uid = file.uid;
    detail.access_time = file.access_time;
    detail.object_name = file.object_name.clone();
    detail
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = bootstrap::load_config()?;
    bootstrap::init_tracing(&config.logging);
    info!("nlds-catalog starting");

    let bus = RabbitBus::new(config.rabbit_mq.clone());
    let catalog = CatalogStore::connect(&config.catalog.database_url, config.catalog.max_connections).await?;
    let monitor = MonitorStore::connect(&config.monitor.database_url, 5).await?;
    let mut consumer = bus.consume(QUEUE, BINDING).await?;

    loop {
        let Some((tag, inbound)) = consumer.next().await? else {
            break;
        };

        let mut details = inbound.envelope.details.clone();
        let filelist = inbound.envelope.filelist().unwrap_or_default();
        details.append_route("catalog");

        match details.state {
            State::CatalogPutting => {
                let label = details.job_label.clone().unwrap_or_else(|| config.catalog.default_label.clone());
                let holdings = catalog.find_holding(&details.user, &details.group, Some(&label), None, None).await?;
                let holding = match holdings.into_iter().next() {
                    Some(h) => h,
                    None => catalog.new_holding(&details.user, &details.group, &label, &[]).await?,
                };
                let transaction_id = catalog.new_transaction(holding.id, details.transaction_id).await?;

                let files: Vec<CatalogFile> = filelist
                    .iter()
                    .map(|d| {
                        let mut f = catalog_file_from_detail(transaction_id, d);
                        f.group_name = details.group.clone();
                        f
                    })
                    .collect();

                match catalog.add_files(transaction_id, &files).await {
                    Ok(_) => {
                        if monitor.transition(details.sub_id, State::TransferPutting).await.is_ok() {
                            details.state = State::TransferPutting;
                        }
                        let envelope = Envelope::with_filelist(details.clone(), &filelist)?;
                        let rk = RoutingKey::new(ROOT, Workflow::Transfer, Action::Start);
                        bus.publish(&rk.to_string(), &envelope).await?;
                    }
                    Err(e) => {
                        warn!(error = %e, sub_id = %details.sub_id, "catalog-put failed");
                        let _ = monitor.transition(details.sub_id, State::Failed).await;
                    }
                }
            }

            State::CatalogGetting => {
                let label = details.job_label.clone();
                let holdings = catalog
                    .find_holding(&details.user, &details.group, label.as_deref(), None, None)
                    .await?;

                let mut matched = Vec::new();
                for holding in &holdings {
                    if !permissions::user_has_get_holding_permission(holding, &details.user, GroupRole::Member) {
                        continue;
                    }
                    let pattern = details.target_path.clone().unwrap_or_default();
                    let query = PathQuery::parse(&pattern);
                    matched.extend(catalog.get_files(holding.id, &query).await?);
                }

                if monitor.transition(details.sub_id, State::TransferGetting).await.is_ok() {
                    details.state = State::TransferGetting;
                }
                let out_filelist: Vec<PathDetails> = matched.iter().map(detail_from_catalog_file).collect();
                let envelope = Envelope::with_filelist(details.clone(), &out_filelist)?;
                let rk = RoutingKey::new(ROOT, Workflow::Transfer, Action::Start);
                bus.publish(&rk.to_string(), &envelope).await?;
            }

            State::CatalogDeleting => {
                let label = details.job_label.clone();
                let holdings = catalog
                    .find_holding(&details.user, &details.group, label.as_deref(), None, None)
                    .await?;

                let mut removed = 0usize;
                for holding in &holdings {
                    if !permissions::user_has_delete_from_holding_permission(
                        holding,
                        &details.user,
                        &details.group,
                        GroupRole::Member,
                    ) {
                        continue;
                    }
                    let pattern = details.target_path.clone().unwrap_or_default();
                    let query = PathQuery::parse(&pattern);
                    let files = catalog.get_files(holding.id, &query).await?;
                    let ids: Vec<i64> = files.iter().map(|f| f.id).collect();
                    removed += ids.len();
                    catalog.delete_files(&ids).await?;
                }

                let _ = monitor.transition(details.sub_id, State::CatalogRemoving).await;
                let terminal = if removed > 0 { State::Complete } else { State::CompleteWithErrors };
                let _ = monitor.transition(details.sub_id, terminal).await;
                info!(sub_id = %details.sub_id, removed, "catalog-delete complete");
            }

            State::ArchiveInit => {
                let eligible = catalog.eligible_for_archive().await?;

                // Archive's `put_bin` fetches every bin member from one
                // object-store bucket, and a bucket is scoped to the PUT
                // transaction that wrote it (spec §6), so eligible files
                // are grouped by `(group, bucket)`, not just `group`. The
                // bucket travels to the archive worker on `tenancy`
                // (already an envelope field for object-store overrides)
                // rather than inventing a new one.
                let mut by_group_bucket: HashMap<(String, String), Vec<CatalogFile>> = HashMap::new();
                for file in eligible {
                    let bucket = catalog
                        .get_location(file.id, StorageType::ObjectStorage)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|loc| loc.url.split(':').next().map(str::to_string))
                        .unwrap_or_default();
                    by_group_bucket
                        .entry((file.group_name.clone(), bucket))
                        .or_default()
                        .push(file);
                }

                if monitor.transition(details.sub_id, State::ArchivePreparing).await.is_ok() {
                    details.state = State::ArchivePreparing;
                }

                for ((group, bucket), files) in by_group_bucket {
                    let mut group_details = details.clone();
                    group_details.group = group;
                    group_details.tenancy = Some(bucket);
                    let out_filelist: Vec<PathDetails> = files.iter().map(detail_from_catalog_file).collect();
                    let envelope = Envelope::with_filelist(group_details, &out_filelist)?;
                    let rk = RoutingKey::new(ROOT, Workflow::Archive, Action::Start);
                    bus.publish(&rk.to_string(), &envelope).await?;
                }
            }

            other => {
                warn!(state = ?other, sub_id = %details.sub_id, "catalog consumer received unexpected state");
            }
        }

        consumer.ack(tag).await?;
    }

    Ok(())
}
