// Partition cache
// Client-side list cache the optimistic mutator writes through. Each partition is one
// independently addressable list (all rooms, rooms of one service, ...).

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{AbortHandle, Abortable};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::resources::{ParentKind, ResourceKind};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionScope {
    All,
    Parent { parent: ParentKind, id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub resource: ResourceKind,
    pub scope: PartitionScope,
}

impl PartitionKey {
    pub fn all(resource: ResourceKind) -> Self {
        Self {
            resource,
            scope: PartitionScope::All,
        }
    }

    pub fn by_parent(resource: ResourceKind, parent: ParentKind, id: &str) -> Self {
        Self {
            resource,
            scope: PartitionScope::Parent {
                parent,
                id: id.to_string(),
            },
        }
    }

    // Path of the list-by-parent endpoint backing this partition, if it has one
    pub fn list_path(&self) -> Option<String> {
        match &self.scope {
            PartitionScope::All => None,
            PartitionScope::Parent { parent, id } => Some(format!(
                "{}/{}/{}",
                self.resource.endpoint(),
                parent.as_str(),
                id
            )),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            PartitionScope::All => write!(f, "{}", self.resource.as_str()),
            PartitionScope::Parent { parent, id } => {
                write!(f, "{}:{}:{}", self.resource.as_str(), parent.as_str(), id)
            }
        }
    }
}

// A tentative entity shown before the server has confirmed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimisticRecord<T> {
    pub entity: T,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
}

impl<T> OptimisticRecord<T> {
    pub fn new(entity: T, client_id: String) -> Self {
        Self {
            entity,
            client_id,
            created_at: Utc::now(),
        }
    }
}

// "optimistic-<millis>-<hex>"; the real id is unknown until creation succeeds
pub fn next_client_id() -> String {
    format!(
        "optimistic-{}-{:04x}",
        Utc::now().timestamp_millis(),
        rand::random::<u16>()
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CacheEntry<T> {
    Confirmed { entity: T },
    Optimistic(OptimisticRecord<T>),
}

impl<T> CacheEntry<T> {
    pub fn confirmed(entity: T) -> Self {
        CacheEntry::Confirmed { entity }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, CacheEntry::Optimistic(_))
    }

    pub fn entity(&self) -> &T {
        match self {
            CacheEntry::Confirmed { entity } => entity,
            CacheEntry::Optimistic(record) => &record.entity,
        }
    }
}

/// Key-addressed table of cached lists.
///
/// `get` returns `None` for a partition that was never populated, which is
/// different from an empty list. Writes replace a partition wholesale.
pub trait PartitionCache<T>: Send + Sync {
    fn get(&self, key: &PartitionKey) -> Option<Vec<CacheEntry<T>>>;

    fn set(&self, key: &PartitionKey, entries: Vec<CacheEntry<T>>);

    // Back to "never populated"
    fn remove(&self, key: &PartitionKey);

    // Keep the data but mark it stale so the next read refetches
    fn invalidate(&self, key: &PartitionKey);

    // Abort outstanding background refetches for the partition, returns how many were aborted
    fn cancel_refetch(&self, key: &PartitionKey) -> usize;
}

// Copy of a set of partitions taken right before an optimistic write
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot<T> {
    partitions: Vec<(PartitionKey, Option<Vec<CacheEntry<T>>>)>,
}

impl<T> CacheSnapshot<T> {
    pub fn capture<C>(cache: &C, keys: &[PartitionKey]) -> Self
    where
        C: PartitionCache<T> + ?Sized,
    {
        Self {
            partitions: keys.iter().map(|key| (key.clone(), cache.get(key))).collect(),
        }
    }

    pub fn get(&self, key: &PartitionKey) -> Option<&Option<Vec<CacheEntry<T>>>> {
        self.partitions
            .iter()
            .find(|(captured, _)| captured == key)
            .map(|(_, entries)| entries)
    }

    pub fn restore<C>(self, cache: &C)
    where
        C: PartitionCache<T> + ?Sized,
    {
        for (key, entries) in self.partitions {
            match entries {
                Some(entries) => cache.set(&key, entries),
                None => cache.remove(&key),
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub reads: AtomicUsize,
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
    pub writes: AtomicUsize,
    pub invalidations: AtomicUsize,
    pub refetches_started: AtomicUsize,
    pub refetches_applied: AtomicUsize,
    pub refetches_cancelled: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheStatsReport {
    pub reads: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub writes: usize,
    pub invalidations: usize,
    pub refetches_started: usize,
    pub refetches_applied: usize,
    pub refetches_cancelled: usize,
    pub partitions: usize,
    pub stale_partitions: usize,
}

struct Partition<T> {
    entries: Vec<CacheEntry<T>>,
    stale: bool,
}

impl<T> Partition<T> {
    fn fresh(entries: Vec<CacheEntry<T>>) -> Self {
        Self {
            entries,
            stale: false,
        }
    }
}

struct Refetch {
    id: u64,
    handle: AbortHandle,
}

pub struct InMemoryPartitionCache<T> {
    partitions: Arc<DashMap<PartitionKey, Partition<T>>>,
    refetches: Arc<DashMap<PartitionKey, Vec<Refetch>>>,
    next_refetch_id: AtomicU64,
    stats: Arc<CacheStats>,
}

impl<T> Default for InMemoryPartitionCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InMemoryPartitionCache<T> {
    pub fn new() -> Self {
        Self {
            partitions: Arc::new(DashMap::new()),
            refetches: Arc::new(DashMap::new()),
            next_refetch_id: AtomicU64::new(0),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn is_stale(&self, key: &PartitionKey) -> bool {
        self.partitions
            .get(key)
            .map_or(true, |partition| partition.stale)
    }

    pub fn pending_refetches(&self, key: &PartitionKey) -> usize {
        self.refetches.get(key).map_or(0, |pending| pending.len())
    }

    pub fn stats(&self) -> CacheStatsReport {
        let stale_partitions = self
            .partitions
            .iter()
            .filter(|partition| partition.stale)
            .count();

        CacheStatsReport {
            reads: self.stats.reads.load(Ordering::SeqCst),
            hit_count: self.stats.hit_count.load(Ordering::SeqCst),
            miss_count: self.stats.miss_count.load(Ordering::SeqCst),
            writes: self.stats.writes.load(Ordering::SeqCst),
            invalidations: self.stats.invalidations.load(Ordering::SeqCst),
            refetches_started: self.stats.refetches_started.load(Ordering::SeqCst),
            refetches_applied: self.stats.refetches_applied.load(Ordering::SeqCst),
            refetches_cancelled: self.stats.refetches_cancelled.load(Ordering::SeqCst),
            partitions: self.partitions.len(),
            stale_partitions,
        }
    }
}

impl<T> InMemoryPartitionCache<T>
where
    T: Send + Sync + 'static,
{
    /// Loads the partition in the background and replaces it with the result.
    ///
    /// The load is abortable through [`PartitionCache::cancel_refetch`]; an
    /// aborted or failed load leaves the partition untouched. The join handle
    /// resolves to `true` when the result was written.
    pub fn spawn_refetch<F>(&self, key: PartitionKey, loader: F) -> JoinHandle<bool>
    where
        F: Future<Output = Result<Vec<T>, ApiError>> + Send + 'static,
    {
        let (handle, registration) = AbortHandle::new_pair();
        let id = self.next_refetch_id.fetch_add(1, Ordering::SeqCst);
        self.refetches
            .entry(key.clone())
            .or_default()
            .push(Refetch { id, handle });
        self.stats.refetches_started.fetch_add(1, Ordering::SeqCst);
        debug!(partition = %key, refetch = id, "refetch started");

        let partitions = Arc::clone(&self.partitions);
        let refetches = Arc::clone(&self.refetches);
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let outcome = Abortable::new(loader, registration).await;

            // The registration guard is held across the write, so a cancel either
            // removes this id first or waits until the write is done.
            let mut pending = match refetches.entry(key.clone()) {
                Entry::Occupied(pending) if pending.get().iter().any(|r| r.id == id) => pending,
                _ => {
                    debug!(partition = %key, refetch = id, "refetch cancelled, result dropped");
                    return false;
                }
            };

            let applied = match outcome {
                Ok(Ok(entities)) => {
                    let entries = entities.into_iter().map(CacheEntry::confirmed).collect();
                    partitions.insert(key.clone(), Partition::fresh(entries));
                    stats.refetches_applied.fetch_add(1, Ordering::SeqCst);
                    debug!(partition = %key, refetch = id, "refetch applied");
                    true
                }
                Ok(Err(error)) => {
                    warn!(partition = %key, refetch = id, %error, "refetch failed");
                    false
                }
                Err(_aborted) => {
                    debug!(partition = %key, refetch = id, "refetch aborted");
                    false
                }
            };

            pending.get_mut().retain(|refetch| refetch.id != id);
            if pending.get().is_empty() {
                pending.remove();
            }
            applied
        })
    }

    // Starts a refetch when the partition is missing or stale
    pub fn ensure_fresh<F>(&self, key: &PartitionKey, loader: F) -> Option<JoinHandle<bool>>
    where
        F: Future<Output = Result<Vec<T>, ApiError>> + Send + 'static,
    {
        if self.is_stale(key) {
            Some(self.spawn_refetch(key.clone(), loader))
        } else {
            None
        }
    }
}

impl<T> PartitionCache<T> for InMemoryPartitionCache<T>
where
    T: Clone + Send + Sync,
{
    fn get(&self, key: &PartitionKey) -> Option<Vec<CacheEntry<T>>> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        match self.partitions.get(key) {
            Some(partition) => {
                self.stats.hit_count.fetch_add(1, Ordering::SeqCst);
                Some(partition.entries.clone())
            }
            None => {
                self.stats.miss_count.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    fn set(&self, key: &PartitionKey, entries: Vec<CacheEntry<T>>) {
        self.partitions.insert(key.clone(), Partition::fresh(entries));
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn remove(&self, key: &PartitionKey) {
        self.partitions.remove(key);
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn invalidate(&self, key: &PartitionKey) {
        if let Some(mut partition) = self.partitions.get_mut(key) {
            partition.stale = true;
        }
        self.stats.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_refetch(&self, key: &PartitionKey) -> usize {
        let cancelled = match self.refetches.remove(key) {
            Some((_, pending)) => {
                for refetch in &pending {
                    refetch.handle.abort();
                }
                pending.len()
            }
            None => 0,
        };
        if cancelled > 0 {
            self.stats
                .refetches_cancelled
                .fetch_add(cancelled, Ordering::SeqCst);
            debug!(partition = %key, cancelled, "refetches cancelled");
        }
        cancelled
    }
}
