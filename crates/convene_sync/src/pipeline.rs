//! The record sync pipeline.
//!
//! A [`RecordSyncOperation`] drains the pending changes of one scope
//! against the remote, one batched round per loop iteration. Every round
//! re-plans from the current pending state: an open query cursor continues
//! first, then queued queries start, then fetches, then modifies, and the
//! pipeline finishes when nothing is left.
//!
//! Each round's results are applied in a single store transaction together
//! with a snapshot of the pending collections; a failed round rolls both
//! back so a later run can repeat it. Retriable service errors shrink the
//! batch budget or rewrite the pending work in place, everything else
//! fails the operation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use convene_records::{
    QueryPage, RecordId, RemoteRecord, SavePolicy, Scope, ServiceError,
};
use convene_store::{LocalStore, StoreTxn};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::context::WorkflowContext;
use crate::entity::{self, EntityRegistry, MergeContext, MergeDisposition};
use crate::error::{SyncError, SyncResult};
use crate::pending::{ModifyBatch, PendingChanges};
use crate::service::RemoteService;
use crate::task::{TaskMeta, WorkflowTask};

/// What the pipeline does next.
enum Step {
    Query(QueryPage),
    Fetch(Vec<RecordId>),
    Modify(ModifyBatch),
    Done,
}

/// One remote call's results, normalized across the three call families.
struct RoundOutcome {
    /// Server records to merge: matched, fetched or freshly saved.
    records: Vec<RemoteRecord>,
    /// Identities the remote confirmed as deleted.
    deleted: Vec<RecordId>,
    /// Fetch ids this round asked for. Ids the remote silently omits are
    /// dropped from the fetch queue, otherwise the pipeline would request
    /// them forever.
    requested: Vec<RecordId>,
    /// Failure condition of the call, if any.
    error: Option<ServiceError>,
    /// Whether `records` came back from a modify call.
    from_modify: bool,
}

/// How a processed round leaves the state machine.
#[derive(Debug, PartialEq)]
enum RoundResolution {
    /// The round completed; a query advances to its cursor.
    Advance,
    /// The round's work stays queued and is retried, possibly rewritten.
    Retry,
}

/// Task syncing all pending record changes of one scope.
pub struct RecordSyncOperation {
    meta: TaskMeta,
    scope: Scope,
    remote: Arc<dyn RemoteService>,
    store: Arc<LocalStore>,
    registry: Arc<EntityRegistry>,
    pending: Mutex<PendingChanges>,
    budget: AtomicUsize,
    max_batch: usize,
    save_policy: SavePolicy,
}

impl RecordSyncOperation {
    /// Creates a pipeline for `scope` with an empty pending set.
    pub fn new(
        scope: Scope,
        context: Arc<WorkflowContext>,
        remote: Arc<dyn RemoteService>,
        store: Arc<LocalStore>,
        registry: Arc<EntityRegistry>,
        config: &SyncConfig,
    ) -> Arc<Self> {
        let name = match scope {
            Scope::Private => "sync.private",
            Scope::Public => "sync.public",
        };
        Arc::new(RecordSyncOperation {
            meta: TaskMeta::new(name, context),
            scope,
            remote,
            store,
            registry,
            pending: Mutex::new(PendingChanges::new()),
            budget: AtomicUsize::new(config.max_batch),
            max_batch: config.max_batch,
            save_policy: SavePolicy::FailOnChange,
        })
    }

    /// The scope this pipeline syncs.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Runs a closure over the pending changes under their lock.
    pub fn with_pending<T>(&self, work: impl FnOnce(&mut PendingChanges) -> T) -> T {
        work(&mut self.pending.lock())
    }

    fn plan_step(&self, active: Option<QueryPage>, budget: usize) -> Step {
        if let Some(page) = active {
            return Step::Query(page);
        }
        let mut pending = self.pending.lock();
        if let Some(query) = pending.next_query() {
            return Step::Query(QueryPage::Start(query));
        }
        if pending.fetch_count() > 0 {
            return Step::Fetch(pending.fetch_batch(budget));
        }
        let batch = pending.modify_batch(budget);
        if !batch.is_empty() {
            return Step::Modify(batch);
        }
        Step::Done
    }

    /// Applies one round inside a store transaction, rolling the pending
    /// collections back alongside the store when it fails.
    fn process_round(&self, round: &RoundOutcome) -> SyncResult<RoundResolution> {
        let mut pending = self.pending.lock();
        let snapshot = pending.snapshot();
        let result = self
            .store
            .with_transaction(|txn| self.apply_round(txn, &mut pending, round));
        if result.is_err() {
            pending.restore(snapshot);
        }
        result
    }

    fn apply_round(
        &self,
        txn: &mut StoreTxn,
        pending: &mut PendingChanges,
        round: &RoundOutcome,
    ) -> SyncResult<RoundResolution> {
        let ctx = MergeContext::from_context(self.meta.context());

        for id in &round.deleted {
            entity::delete_record(txn, id, self.scope)?;
            pending.purge(id);
        }

        let mut records = round.records.clone();
        self.registry.sort_for_merge(&mut records);
        for record in &records {
            self.merge_one(txn, pending, record, round.from_modify, &ctx)?;
        }

        match &round.error {
            None => {
                for id in &round.requested {
                    pending.record_merged(id, true, None);
                }
                self.budget.store(self.max_batch, Ordering::Relaxed);
                Ok(RoundResolution::Advance)
            }
            Some(error) => self.handle_service_error(txn, pending, error, &ctx),
        }
    }

    fn merge_one(
        &self,
        txn: &mut StoreTxn,
        pending: &mut PendingChanges,
        record: &RemoteRecord,
        from_modify: bool,
        ctx: &MergeContext,
    ) -> SyncResult<()> {
        let disposition = entity::merge_server_record(
            txn,
            &self.registry,
            pending,
            record,
            self.scope,
            from_modify,
            ctx,
        )?;
        match disposition {
            MergeDisposition::Applied | MergeDisposition::PendingDeletion => {
                pending.record_merged(&record.id, false, None);
            }
            MergeDisposition::NeedsPush(updated) => {
                pending.record_merged(&record.id, true, Some(updated));
            }
        }
        Ok(())
    }

    fn handle_service_error(
        &self,
        txn: &mut StoreTxn,
        pending: &mut PendingChanges,
        error: &ServiceError,
        ctx: &MergeContext,
    ) -> SyncResult<RoundResolution> {
        match error {
            ServiceError::LimitExceeded => {
                let halved = (self.budget.load(Ordering::Relaxed) / 2).max(1);
                self.budget.store(halved, Ordering::Relaxed);
                warn!(
                    scope = %self.scope,
                    budget = halved,
                    "remote rejected the batch size, halving and retrying"
                );
                Ok(RoundResolution::Retry)
            }
            ServiceError::UnknownItem { id } => {
                debug!(scope = %self.scope, record = %id, "remote does not know record");
                entity::handle_unknown_item(txn, id, self.scope)?;
                pending.purge(id);
                Ok(RoundResolution::Retry)
            }
            ServiceError::RecordChanged { server } => {
                self.merge_one(txn, pending, server, true, ctx)?;
                Ok(RoundResolution::Retry)
            }
            ServiceError::PartialFailure { failures } => {
                for (id, failure) in failures {
                    match failure {
                        ServiceError::UnknownItem { .. } => {
                            warn!(
                                scope = %self.scope,
                                record = %id,
                                "remote no longer knows record, dropping stale reference"
                            );
                            entity::handle_unknown_item(txn, id, self.scope)?;
                            pending.purge(id);
                        }
                        ServiceError::RecordChanged { server } => {
                            self.merge_one(txn, pending, server, true, ctx)?;
                        }
                        fatal => return Err(SyncError::Service(fatal.clone())),
                    }
                }
                Ok(RoundResolution::Retry)
            }
            fatal => Err(SyncError::Service(fatal.clone())),
        }
    }
}

#[async_trait]
impl WorkflowTask for RecordSyncOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        let mut active: Option<QueryPage> = None;
        loop {
            if self.meta.is_cancelled() {
                self.meta.finish();
                return;
            }
            let budget = self.budget.load(Ordering::Relaxed);
            match self.plan_step(active.take(), budget) {
                Step::Query(page) => {
                    let outcome = self
                        .remote
                        .query_records(self.scope, page.clone(), budget)
                        .await;
                    let round = RoundOutcome {
                        records: outcome.matched,
                        deleted: Vec::new(),
                        requested: Vec::new(),
                        error: outcome.error,
                        from_modify: false,
                    };
                    match self.process_round(&round) {
                        Ok(RoundResolution::Advance) => {
                            active = outcome.cursor.map(QueryPage::Continue);
                        }
                        Ok(RoundResolution::Retry) => {
                            active = Some(page);
                        }
                        Err(error) => {
                            self.meta.finish_with_error(error);
                            return;
                        }
                    }
                }
                Step::Fetch(ids) => {
                    let fields = self.registry.desired_fields(self.scope);
                    let outcome = self
                        .remote
                        .fetch_records(self.scope, ids.clone(), Some(fields))
                        .await;
                    let round = RoundOutcome {
                        records: outcome.records,
                        deleted: Vec::new(),
                        requested: ids,
                        error: outcome.error,
                        from_modify: false,
                    };
                    if let Err(error) = self.process_round(&round) {
                        self.meta.finish_with_error(error);
                        return;
                    }
                }
                Step::Modify(batch) => {
                    let outcome = self
                        .remote
                        .modify_records(self.scope, batch.save, batch.delete, self.save_policy)
                        .await;
                    let round = RoundOutcome {
                        records: outcome.saved,
                        deleted: outcome.deleted,
                        requested: Vec::new(),
                        error: outcome.error,
                        from_modify: true,
                    };
                    if let Err(error) = self.process_round(&round) {
                        self.meta.finish_with_error(error);
                        return;
                    }
                }
                Step::Done => {
                    debug!(scope = %self.scope, "record sync drained");
                    self.meta.finish();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EventKind;
    use crate::entity::SyncableEntityKind;
    use crate::service::MockRemote;
    use convene_records::{
        event_fields, identities_match, FetchOutcome, FieldValue, ModifyOutcome, QueryCursor,
        QueryOutcome, RecordQuery, EVENT_RECORD_TYPE,
    };
    use convene_store::{LocalId, SharedEvent, StoreError, SyncReference, User};
    use std::time::{Duration, SystemTime};

    struct Fixture {
        remote: Arc<MockRemote>,
        store: Arc<LocalStore>,
        context: Arc<WorkflowContext>,
        pipeline: Arc<RecordSyncOperation>,
    }

    fn fixture(scope: Scope) -> Fixture {
        fixture_with_config(scope, SyncConfig::default())
    }

    fn fixture_with_config(scope: Scope, config: SyncConfig) -> Fixture {
        let remote = Arc::new(MockRemote::new());
        let store = Arc::new(LocalStore::new());
        let context = Arc::new(WorkflowContext::new());
        let pipeline = RecordSyncOperation::new(
            scope,
            Arc::clone(&context),
            remote.clone() as Arc<dyn RemoteService>,
            Arc::clone(&store),
            Arc::new(EntityRegistry::standard()),
            &config,
        );
        Fixture {
            remote,
            store,
            context,
            pipeline,
        }
    }

    /// Event entity with an owner, queued for saving like the collect
    /// stage would.
    fn seed_event_save(fixture: &Fixture) -> (LocalId, RecordId) {
        let (owner, event, record) = fixture
            .store
            .with_transaction(|txn| {
                let owner = txn.add_user(User::new());
                let event = txn.add_event(SharedEvent::new(owner, "test-device"));
                let record_id = entity::ensure_reference(txn, event, Scope::Public)?;
                let mut record = RemoteRecord::new(EVENT_RECORD_TYPE, record_id);
                EventKind.update_record(txn, event, &mut record, Scope::Public)?;
                Ok::<_, SyncError>((owner, event, record))
            })
            .unwrap();
        fixture.context.set_linked_local_user(owner);
        let id = record.id.clone();
        fixture.pipeline.with_pending(|pending| {
            pending.map_local(id.clone(), event);
            pending.add_save(record);
        });
        (event, id)
    }

    #[tokio::test]
    async fn saving_a_new_event_synchronizes_its_reference() {
        let fx = fixture(Scope::Public);
        let (event, record_id) = seed_event_save(&fx);

        fx.pipeline.clone().execute().await;

        assert!(fx.pipeline.meta().outcome().is_none());
        assert_eq!(fx.remote.call_count("modify_records"), 1);
        fx.store.read(|txn| {
            let reference = txn.reference(event, Scope::Public).unwrap();
            assert!(reference.synchronized);
            assert!(reference.change_tag().is_some(), "server tag cached");
            assert!(identities_match(&reference.record_id, &record_id));
        });
        fx.pipeline
            .with_pending(|pending| assert!(!pending.has_work()));
    }

    #[tokio::test]
    async fn limit_exceeded_halves_the_budget_and_success_resets_it() {
        let fx = fixture_with_config(Scope::Public, SyncConfig::default().with_max_batch(8));
        seed_event_save(&fx);
        fx.remote.push_modify_outcome(ModifyOutcome {
            error: Some(ServiceError::LimitExceeded),
            ..ModifyOutcome::default()
        });
        fx.remote.push_modify_outcome(ModifyOutcome {
            error: Some(ServiceError::LimitExceeded),
            ..ModifyOutcome::default()
        });

        fx.pipeline.clone().execute().await;

        assert!(fx.pipeline.meta().outcome().is_none());
        assert_eq!(
            fx.remote.call_count("modify_records"),
            3,
            "two rejected rounds, then the echo succeeds"
        );
        assert_eq!(
            fx.pipeline.budget.load(Ordering::Relaxed),
            8,
            "budget resets after a clean round"
        );
    }

    #[test]
    fn budget_halving_floors_at_one() {
        let fx = fixture_with_config(Scope::Public, SyncConfig::default().with_max_batch(2));
        let round = RoundOutcome {
            records: Vec::new(),
            deleted: Vec::new(),
            requested: Vec::new(),
            error: Some(ServiceError::LimitExceeded),
            from_modify: true,
        };

        assert_eq!(fx.pipeline.process_round(&round).unwrap(), RoundResolution::Retry);
        assert_eq!(fx.pipeline.budget.load(Ordering::Relaxed), 1);
        assert_eq!(fx.pipeline.process_round(&round).unwrap(), RoundResolution::Retry);
        assert_eq!(fx.pipeline.budget.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unknown_item_drops_the_stale_reference_and_retries() {
        let fx = fixture(Scope::Public);
        let record_id = RecordId::in_default_zone("gone");
        let event = fx
            .store
            .with_transaction(|txn| {
                let owner = txn.add_user(User::new());
                let event = txn.add_event(SharedEvent::new(owner, "test-device"));
                txn.set_reference(SyncReference::new(event, Scope::Public, record_id.clone()))?;
                Ok::<_, StoreError>(event)
            })
            .unwrap();
        fx.pipeline
            .with_pending(|pending| pending.add_delete(record_id.clone()));
        fx.remote.push_modify_outcome(ModifyOutcome {
            error: Some(ServiceError::UnknownItem {
                id: record_id.clone(),
            }),
            ..ModifyOutcome::default()
        });

        fx.pipeline.clone().execute().await;

        assert!(fx.pipeline.meta().outcome().is_none());
        fx.store.read(|txn| {
            assert!(txn.reference(event, Scope::Public).is_none());
            assert!(txn.contains_entity(event), "not marked, so the entity stays");
        });
        fx.pipeline
            .with_pending(|pending| assert!(!pending.has_work(), "purged, nothing to retry"));
    }

    #[tokio::test]
    async fn conflicting_save_converges_on_the_newer_server_copy() {
        let fx = fixture(Scope::Public);
        let (event, record_id) = seed_event_save(&fx);

        let server_time = SystemTime::now() + Duration::from_secs(60);
        let mut server = RemoteRecord::new(EVENT_RECORD_TYPE, record_id.clone());
        server.change_tag = Some("server-tag".into());
        server.modified_at = Some(server_time);
        server.created_at = Some(server_time);
        server.set(
            event_fields::CREATED_BY_DEVICE,
            FieldValue::Text("other-device".into()),
        );
        fx.remote.push_modify_outcome(ModifyOutcome {
            error: Some(ServiceError::RecordChanged {
                server: Box::new(server),
            }),
            ..ModifyOutcome::default()
        });

        fx.pipeline.clone().execute().await;

        assert!(fx.pipeline.meta().outcome().is_none());
        fx.store.read(|txn| {
            let stored = txn.event(event).unwrap();
            assert_eq!(stored.created_by_device, "other-device");
            let reference = txn.reference(event, Scope::Public).unwrap();
            assert!(reference.synchronized);
            assert_eq!(reference.change_tag().as_deref(), Some("server-tag"));
        });
        fx.pipeline
            .with_pending(|pending| assert_eq!(pending.save_count(), 0, "push dropped"));
    }

    #[tokio::test]
    async fn fatal_partial_failure_rolls_back_the_round() {
        let fx = fixture(Scope::Public);
        let (_, record_id) = seed_event_save(&fx);
        let other_id = RecordId::in_default_zone("other");
        fx.pipeline
            .with_pending(|pending| pending.add_delete(other_id.clone()));

        let fatal = ServiceError::network("connection reset");
        fx.remote.push_modify_outcome(ModifyOutcome {
            deleted: vec![other_id.clone()],
            error: Some(ServiceError::PartialFailure {
                failures: vec![(record_id.clone(), fatal.clone())],
            }),
            ..ModifyOutcome::default()
        });

        fx.pipeline.clone().execute().await;

        assert_eq!(
            fx.pipeline.meta().outcome(),
            Some(SyncError::Service(fatal.clone()))
        );
        assert_eq!(fx.context.first_error(), Some(SyncError::Service(fatal)));
        fx.pipeline.with_pending(|pending| {
            assert_eq!(pending.save_count(), 1, "rolled back save stays queued");
            assert_eq!(pending.delete_count(), 1, "rolled back delete stays queued");
        });
    }

    #[tokio::test]
    async fn query_cursor_continues_before_queued_queries() {
        let fx = fixture(Scope::Public);
        fx.pipeline.with_pending(|pending| {
            pending.push_query(RecordQuery::all(EVENT_RECORD_TYPE));
            pending.push_query(RecordQuery::all("User"));
        });
        fx.remote.push_query_outcome(QueryOutcome {
            cursor: Some(QueryCursor::new()),
            ..QueryOutcome::default()
        });

        fx.pipeline.clone().execute().await;

        assert!(fx.pipeline.meta().outcome().is_none());
        assert_eq!(
            fx.remote.call_count("query_records"),
            3,
            "first page, its continuation, then the second query"
        );
    }

    #[test]
    fn planning_prefers_an_open_cursor_over_everything_else() {
        let fx = fixture(Scope::Public);
        fx.pipeline.with_pending(|pending| {
            pending.push_query(RecordQuery::all(EVENT_RECORD_TYPE));
            pending.add_fetch(RecordId::in_default_zone("r1"));
        });

        let step = fx
            .pipeline
            .plan_step(Some(QueryPage::Continue(QueryCursor::new())), 10);
        assert!(matches!(step, Step::Query(QueryPage::Continue(_))));

        let step = fx.pipeline.plan_step(None, 10);
        assert!(matches!(step, Step::Query(QueryPage::Start(_))));

        let step = fx.pipeline.plan_step(None, 10);
        assert!(matches!(step, Step::Fetch(ids) if ids.len() == 1));
    }

    #[tokio::test]
    async fn silently_omitted_fetches_leave_the_queue() {
        let fx = fixture(Scope::Public);
        fx.pipeline
            .with_pending(|pending| pending.add_fetch(RecordId::in_default_zone("ghost")));
        fx.remote.push_fetch_outcome(FetchOutcome::default());

        fx.pipeline.clone().execute().await;

        assert!(fx.pipeline.meta().outcome().is_none());
        assert_eq!(fx.remote.call_count("fetch_records"), 1);
        fx.pipeline
            .with_pending(|pending| assert_eq!(pending.fetch_count(), 0));
    }

    #[tokio::test]
    async fn cancelled_pipelines_finish_without_touching_the_remote() {
        let fx = fixture(Scope::Public);
        seed_event_save(&fx);
        fx.pipeline.meta().cancel();

        fx.pipeline.clone().execute().await;

        assert!(fx.pipeline.meta().is_finished());
        assert_eq!(fx.remote.call_count("modify_records"), 0);
        assert!(matches!(
            fx.pipeline.meta().outcome(),
            Some(SyncError::OperationCancelled { underlying: None })
        ));
    }
}
