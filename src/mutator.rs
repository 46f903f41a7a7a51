// Optimistic resource mutator
// Creates a resource against the backend while the cache already shows it:
// cancel refetches -> snapshot -> optimistic insert -> create call -> reconcile or roll back -> settle

use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiRequest, ResourceApi};
use crate::cache::{
    next_client_id, CacheEntry, CacheSnapshot, OptimisticRecord, PartitionCache, PartitionKey,
};
use crate::resources::{fetch_partition, Resource, ResourceKind};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MutationError {
    #[error("Missing required fields: {}", .0.join(", "))]
    InvalidInput(Vec<String>),

    #[error("Duplicate {kind}: {parent} already has one")]
    DuplicateResource { kind: &'static str, parent: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("{message}")]
    ServerRejection { status: Option<u16>, message: String },

    #[error("Could not build request: {0}")]
    InvalidRequest(String),
}

impl From<ApiError> for MutationError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Network(message) => MutationError::Network(message),
            ApiError::Rejected { status, message } => {
                MutationError::ServerRejection { status, message }
            }
            ApiError::Decode(message) => MutationError::ServerRejection {
                status: None,
                message: format!("Unexpected response from server: {message}"),
            },
            ApiError::InvalidRequest(message) => MutationError::InvalidRequest(message),
        }
    }
}

// Image or other follow-up upload that failed after the resource itself was created.
// Only ever logged; the creation still counts as a success.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Upload for {kind} {resource_id} failed: {source}")]
pub struct SecondaryUploadError {
    pub kind: &'static str,
    pub resource_id: String,
    pub source: ApiError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    Staging,
    InFlight,
    Reconciled,
    RolledBack,
    Settled,
}

impl MutationPhase {
    pub fn can_advance_to(self, next: MutationPhase) -> bool {
        use MutationPhase::*;
        matches!(
            (self, next),
            (Idle, Staging)
                | (Idle, Settled)
                | (Staging, InFlight)
                | (Staging, RolledBack)
                | (InFlight, Reconciled)
                | (InFlight, RolledBack)
                | (Reconciled, Settled)
                | (RolledBack, Settled)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == MutationPhase::Settled
    }
}

/// One run of the create state machine.
///
/// `Idle -> Staging -> InFlight -> Reconciled | RolledBack -> Settled`. A
/// duplicate found while staging goes straight to `RolledBack`, and a
/// payload rejected before anything was staged goes `Idle -> Settled`.
#[derive(Debug, Clone)]
pub struct MutationAttempt {
    kind: ResourceKind,
    client_id: String,
    history: Vec<MutationPhase>,
}

impl MutationAttempt {
    fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            client_id: next_client_id(),
            history: vec![MutationPhase::Idle],
        }
    }

    pub fn phase(&self) -> MutationPhase {
        self.history
            .last()
            .copied()
            .unwrap_or(MutationPhase::Idle)
    }

    pub fn history(&self) -> &[MutationPhase] {
        &self.history
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn advance(&mut self, next: MutationPhase) {
        let current = self.phase();
        if current.can_advance_to(next) {
            debug!(
                kind = self.kind.as_str(),
                client_id = %self.client_id,
                from = ?current,
                to = ?next,
                "mutation phase"
            );
            self.history.push(next);
        } else {
            warn!(
                kind = self.kind.as_str(),
                client_id = %self.client_id,
                from = ?current,
                to = ?next,
                "refusing illegal mutation phase transition"
            );
        }
    }
}

pub struct OptimisticMutator<R, C>
where
    R: Resource,
    C: PartitionCache<R::Entity> + ?Sized,
{
    api: Arc<dyn ResourceApi>,
    cache: Arc<C>,
    _resource: PhantomData<fn() -> R>,
}

impl<R, C> OptimisticMutator<R, C>
where
    R: Resource,
    C: PartitionCache<R::Entity> + ?Sized,
{
    pub fn new(api: Arc<dyn ResourceApi>, cache: Arc<C>) -> Self {
        Self {
            api,
            cache,
            _resource: PhantomData,
        }
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// Creates the resource, keeping every partition it belongs to in step.
    ///
    /// On success each partition holds the server's entity in place of the
    /// optimistic one. On failure each partition is back to exactly what it
    /// held before the call, before the error is returned. Either way the
    /// partitions are left stale so the next read refetches.
    pub async fn create(&self, payload: R::Payload) -> Result<R::Entity, MutationError> {
        self.create_tracked(payload).await.0
    }

    pub async fn create_tracked(
        &self,
        payload: R::Payload,
    ) -> (Result<R::Entity, MutationError>, MutationAttempt) {
        let mut attempt = MutationAttempt::new(R::KIND);

        let missing = R::missing_fields(&payload);
        if !missing.is_empty() {
            attempt.advance(MutationPhase::Settled);
            let error = MutationError::InvalidInput(missing.into_iter().map(String::from).collect());
            return (Err(error), attempt);
        }

        let partitions = R::partitions(&payload);
        for key in &partitions {
            self.cache.cancel_refetch(key);
        }
        let snapshot = CacheSnapshot::capture(&*self.cache, &partitions);
        self.stage(&partitions, &payload, attempt.client_id());
        attempt.advance(MutationPhase::Staging);

        let result = self.commit(&payload, &snapshot, &mut attempt).await;
        match &result {
            Ok(entity) => {
                self.reconcile(&partitions, entity, attempt.client_id());
                attempt.advance(MutationPhase::Reconciled);
                info!(kind = R::KIND.as_str(), id = R::entity_id(entity), "resource created");
            }
            Err(error) => {
                snapshot.restore(&*self.cache);
                attempt.advance(MutationPhase::RolledBack);
                warn!(
                    kind = R::KIND.as_str(),
                    client_id = %attempt.client_id(),
                    %error,
                    "creation failed, cache rolled back"
                );
            }
        }

        for key in &partitions {
            self.cache.invalidate(key);
        }
        attempt.advance(MutationPhase::Settled);

        (result, attempt)
    }

    fn stage(&self, partitions: &[PartitionKey], payload: &R::Payload, client_id: &str) {
        let record = OptimisticRecord::new(R::provisional(payload, client_id), client_id.to_string());
        for key in partitions {
            let mut entries = self.cache.get(key).unwrap_or_default();
            entries.push(CacheEntry::Optimistic(record.clone()));
            self.cache.set(key, entries);
        }
    }

    async fn commit(
        &self,
        payload: &R::Payload,
        snapshot: &CacheSnapshot<R::Entity>,
        attempt: &mut MutationAttempt,
    ) -> Result<R::Entity, MutationError> {
        if let Some(scope) = R::duplicate_scope(payload) {
            self.ensure_no_duplicate(&scope, snapshot).await?;
        }

        attempt.advance(MutationPhase::InFlight);
        let request = R::create_request(payload)?;
        let data = self.api.send(request).await?;
        let entity: R::Entity = serde_json::from_value(data)
            .map_err(|e| MutationError::from(ApiError::Decode(e.to_string())))?;

        self.upload_attachments(payload, &entity).await;
        Ok(entity)
    }

    // Client-side convenience only; the server still decides
    async fn ensure_no_duplicate(
        &self,
        scope: &PartitionKey,
        snapshot: &CacheSnapshot<R::Entity>,
    ) -> Result<(), MutationError> {
        // Prefer the pre-insert copy; the live partition already holds our optimistic entry
        let known = match snapshot.get(scope) {
            Some(captured) => captured.clone(),
            None => self.cache.get(scope),
        };
        let exists = match known {
            Some(entries) => entries.iter().any(|entry| !entry.is_optimistic()),
            None if scope.list_path().is_some() => {
                let listed = fetch_partition::<R>(Arc::clone(&self.api), scope.clone()).await?;
                let exists = !listed.is_empty();
                self.populate(scope, listed);
                exists
            }
            None => false,
        };

        if exists {
            return Err(MutationError::DuplicateResource {
                kind: R::KIND.as_str(),
                parent: scope.to_string(),
            });
        }
        Ok(())
    }

    // Fills a partition from a list response, keeping optimistic entries already staged
    fn populate(&self, key: &PartitionKey, listed: Vec<R::Entity>) {
        let staged = self.cache.get(key).unwrap_or_default();
        let mut entries: Vec<_> = listed.into_iter().map(CacheEntry::confirmed).collect();
        entries.extend(staged.into_iter().filter(CacheEntry::is_optimistic));
        self.cache.set(key, entries);
    }

    async fn upload_attachments(&self, payload: &R::Payload, entity: &R::Entity) {
        let attachments = R::attachments(payload);
        if attachments.is_empty() {
            return;
        }

        let id = R::entity_id(entity);
        let request = ApiRequest::multipart(R::attachment_path(id), attachments);
        if let Err(source) = self.api.send(request).await {
            let error = SecondaryUploadError {
                kind: R::KIND.as_str(),
                resource_id: id.to_string(),
                source,
            };
            warn!(%error, "secondary upload failed, keeping created resource");
        }
    }

    /// Swaps the server's entity in for the optimistic entries.
    ///
    /// The entity takes the slot of this attempt's own record, or of the first
    /// optimistic entry when that record is gone. Every other optimistic entry
    /// and any earlier copy of the entity are dropped, so the partition holds
    /// the entity exactly once and nothing optimistic.
    fn reconcile(&self, partitions: &[PartitionKey], entity: &R::Entity, client_id: &str) {
        let id = R::entity_id(entity);
        for key in partitions {
            let entries = self.cache.get(key).unwrap_or_default();
            let slot = entries
                .iter()
                .position(|entry| is_own_record(entry, client_id))
                .or_else(|| entries.iter().position(CacheEntry::is_optimistic));

            let mut reconciled = Vec::with_capacity(entries.len());
            for (index, entry) in entries.into_iter().enumerate() {
                if Some(index) == slot {
                    reconciled.push(CacheEntry::confirmed(entity.clone()));
                } else if !entry.is_optimistic() && R::entity_id(entry.entity()) != id {
                    reconciled.push(entry);
                }
            }
            if slot.is_none() {
                debug!(partition = %key, "optimistic entry gone, appending created entity");
                reconciled.push(CacheEntry::confirmed(entity.clone()));
            }
            self.cache.set(key, reconciled);
        }
    }
}

fn is_own_record<T>(entry: &CacheEntry<T>, client_id: &str) -> bool {
    matches!(entry, CacheEntry::Optimistic(record) if record.client_id == client_id)
}
