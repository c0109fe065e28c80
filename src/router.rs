//! Router / NLDS worker (spec §4.7): accepts one inbound API request,
//! opens its `TransactionRecord`/`SubRecord` pair in the monitor store,
//! and publishes the first workflow message — the routing key *is* the
//! program counter for everything that follows.
//!
//! Request shape grounded in `nlds/routers/probe.py`; the periodic
//! `archive-next` trigger is grounded in
//! `nlds_processors/archiver/send_archive_next.py` (spec §11).

use crate::bus::Bus;
use crate::error::NldsError;
use crate::monitor::state::State;
use crate::monitor::store::MonitorStore;
use crate::protocol::envelope::{Details, Envelope, PathDetails};
use crate::protocol::routing::{Action, RoutingKey, Workflow, ROOT};
use std::sync::Arc;
use uuid::Uuid;

/// The four entry points into the workflow engine a user-facing API
/// call can make (spec §2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiAction {
    Put,
    Get,
    Del,
    ArchiveNext,
}

impl ApiAction {
    /// The sub-record state this action enters at, and the routing key
    /// its first downstream message goes out on, per the transition
    /// relation in [`State::can_transition_to`].
    fn entry(self) -> (State, Workflow, Action) {
        match self {
            ApiAction::Put => (State::Splitting, Workflow::Index, Action::Start),
            ApiAction::Get => (State::CatalogGetting, Workflow::Catalog, Action::Start),
            ApiAction::Del => (State::CatalogDeleting, Workflow::Catalog, Action::Start),
            ApiAction::ArchiveNext => (State::ArchiveInit, Workflow::Archive, Action::Init),
        }
    }

    fn label(self) -> &'static str {
        match self {
            ApiAction::Put => "PUTLIST",
            ApiAction::Get => "GETLIST",
            ApiAction::Del => "DEL",
            ApiAction::ArchiveNext => "ARCHIVE_NEXT",
        }
    }
}

/// One inbound API call, before any transaction/sub-record exists.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub api_action: ApiAction,
    pub user: String,
    pub group: String,
    pub target_path: Option<String>,
    pub job_label: Option<String>,
    pub filelist: Vec<PathDetails>,
    pub tenancy: Option<String>,
}

pub struct RouterContext {
    pub bus: Arc<dyn Bus>,
    pub monitor: Arc<MonitorStore>,
    pub root: String,
}

impl RouterContext {
    pub fn new(bus: Arc<dyn Bus>, monitor: Arc<MonitorStore>) -> Self {
        Self {
            bus,
            monitor,
            root: ROOT.to_string(),
        }
    }
}

/// Outcome of routing one inbound request.
#[derive(Debug, Clone)]
pub struct RoutedTransaction {
    pub transaction_id: Uuid,
    pub sub_id: Uuid,
    pub routing_key: RoutingKey,
}

/// Route one inbound API request: assign transaction/sub ids, open the
/// monitor records, transition `Initialising -> Routing -> <entry
/// state>`, and publish the first workflow message (spec §4.7).
pub async fn handle_request(
    ctx: &RouterContext,
    request: ApiRequest,
) -> Result<RoutedTransaction, NldsError> {
    let transaction_id = Uuid::new_v4();
    let sub_id = Uuid::new_v4();

    let txn_record = ctx
        .monitor
        .create_transaction_record(transaction_id, &request.user, &request.group)
        .await?;
    ctx.monitor
        .create_sub_record(txn_record.id, sub_id, State::Initialising)
        .await?;
    ctx.monitor.transition(sub_id, State::Routing).await?;

    let (entry_state, workflow, action) = request.api_action.entry();
    ctx.monitor.transition(sub_id, entry_state).await?;

    let mut details = Details::new(
        request.user.clone(),
        request.group.clone(),
        request.api_action.label(),
    );
    details.transaction_id = transaction_id;
    details.sub_id = sub_id;
    details.target_path = request.target_path.clone();
    details.job_label = request.job_label.clone();
    details.tenancy = request.tenancy.clone();
    details.state = entry_state;
    details.append_route("router");

    let envelope = Envelope::with_filelist(details, &request.filelist)?;
    let routing_key = RoutingKey::new(&ctx.root, workflow, action);

    ctx.bus.publish(&routing_key.to_string(), &envelope).await?;

    Ok(RoutedTransaction {
        transaction_id,
        sub_id,
        routing_key,
    })
}

/// Build and route the periodic `archive-next` trigger: an
/// empty-filelist `ARCHIVE_INIT` addressed to a fixed placeholder
/// user/group, fired on `RouterConfig::archive_next_interval` by the
/// `nlds-router` binary and on demand by the `nlds-send-archive-next`
/// CLI.
pub async fn send_archive_next(ctx: &RouterContext) -> Result<RoutedTransaction, NldsError> {
    handle_request(
        ctx,
        ApiRequest {
            api_action: ApiAction::ArchiveNext,
            user: "admin-placeholder".to_string(),
            group: "admin-placeholder".to_string(),
            target_path: None,
            job_label: Some("archive-next".to_string()),
            filelist: Vec::new(),
            tenancy: None,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::protocol::envelope::PathType;

    async fn test_ctx() -> RouterContext {
        let monitor = MonitorStore::connect("sqlite::memory:", 1).await.unwrap();
        RouterContext::new(InMemoryBus::new(), Arc::new(monitor))
    }

    #[tokio::test]
    async fn put_request_enters_splitting_and_publishes_to_index_start() {
        let ctx = test_ctx().await;
        let request = ApiRequest {
            api_action: ApiAction::Put,
            user: "alice".to_string(),
            group: "gws_test".to_string(),
            target_path: Some("/holding/a".to_string()),
            job_label: None,
            filelist: vec![PathDetails::new("/data/a.nc", PathType::File, 10)],
            tenancy: None,
        };

        let routed = handle_request(&ctx, request).await.unwrap();
        assert_eq!(routed.routing_key.to_string(), "nlds.index.start");

        let sub = ctx.monitor.get_sub_record(routed.sub_id).await.unwrap();
        assert_eq!(sub.state, State::Splitting);
    }

    #[tokio::test]
    async fn get_request_enters_catalog_getting() {
        let ctx = test_ctx().await;
        let request = ApiRequest {
            api_action: ApiAction::Get,
            user: "alice".to_string(),
            group: "gws_test".to_string(),
            target_path: Some("/holding/a".to_string()),
            job_label: None,
            filelist: Vec::new(),
            tenancy: None,
        };

        let routed = handle_request(&ctx, request).await.unwrap();
        assert_eq!(routed.routing_key.to_string(), "nlds.cat.start");
        let sub = ctx.monitor.get_sub_record(routed.sub_id).await.unwrap();
        assert_eq!(sub.state, State::CatalogGetting);
    }

    #[tokio::test]
    async fn del_request_enters_catalog_deleting() {
        let ctx = test_ctx().await;
        let request = ApiRequest {
            api_action: ApiAction::Del,
            user: "alice".to_string(),
            group: "gws_test".to_string(),
            target_path: Some("/holding/a".to_string()),
            job_label: None,
            filelist: Vec::new(),
            tenancy: None,
        };

        let routed = handle_request(&ctx, request).await.unwrap();
        let sub = ctx.monitor.get_sub_record(routed.sub_id).await.unwrap();
        assert_eq!(sub.state, State::CatalogDeleting);
    }

    #[tokio::test]
    async fn archive_next_enters_archive_init_with_empty_filelist() {
        let ctx = test_ctx().await;
        let routed = send_archive_next(&ctx).await.unwrap();
        assert_eq!(routed.routing_key.to_string(), "nlds.archive.init");
        let sub = ctx.monitor.get_sub_record(routed.sub_id).await.unwrap();
        assert_eq!(sub.state, State::ArchiveInit);
    }
}
