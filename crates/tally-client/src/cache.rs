use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

/// Partition names used by the calendar and settings screens.
pub mod keys {
    pub const WEEK: &str = "week";
    pub const SKIPPED_APPS: &str = "skipped_apps";
    pub const CATEGORIES: &str = "categories";
    pub const CAT_REGEX: &str = "cat_regex";

    /// Query id for partitions that cache a single "list everything" query.
    pub const ALL: &str = "all";
}

pub type QueryId = String;

pub type SharedCache = Arc<Mutex<QueryCache>>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CacheKey {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CachedQuery {
    data: Value,
    generation: u64,
}

/// Last-known results for one named slice of queries.
///
/// An entry is stale once the partition's generation has moved past the
/// generation the entry was fetched at.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CachePartition {
    entries: BTreeMap<QueryId, CachedQuery>,
    generation: u64,
}

impl CachePartition {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, query: &str) -> Option<&Value> {
        self.entries.get(query).map(|entry| &entry.data)
    }

    pub fn is_stale(&self, query: &str) -> bool {
        self.entries
            .get(query)
            .is_none_or(|entry| entry.generation < self.generation)
    }

    pub fn set(&mut self, query: impl Into<QueryId>, data: Value) {
        let generation = self.generation;
        self.entries
            .insert(query.into(), CachedQuery { data, generation });
    }

    /// Edits an existing entry in place. Returns false when the query was
    /// never cached.
    pub fn update(&mut self, query: &str, edit: impl FnOnce(&mut Value)) -> bool {
        match self.entries.get_mut(query) {
            Some(entry) => {
                edit(&mut entry.data);
                true
            }
            None => false,
        }
    }

    pub fn update_all(&mut self, mut edit: impl FnMut(&str, &mut Value)) {
        for (query, entry) in &mut self.entries {
            edit(query, &mut entry.data);
        }
    }

    pub fn remove(&mut self, query: &str) -> Option<Value> {
        self.entries.remove(query).map(|entry| entry.data)
    }

    pub fn queries(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exact copy of a partition taken before a mutation touches it.
/// `partition == None` records that the partition did not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSnapshot {
    key: CacheKey,
    partition: Option<CachePartition>,
}

impl PartitionSnapshot {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchToken {
    generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead {
    pub data: Value,
    pub stale: bool,
}

/// All cache partitions. Views read freely; writes other than fetch
/// completion are crate-private and go through the mutation pipeline.
#[derive(Debug, Default)]
pub struct QueryCache {
    partitions: BTreeMap<CacheKey, CachePartition>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCache {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn partition(&self, key: &CacheKey) -> Option<&CachePartition> {
        self.partitions.get(key)
    }

    pub fn read(&self, key: &CacheKey, query: &str) -> Option<CacheRead> {
        let partition = self.partitions.get(key)?;
        let data = partition.get(query)?.clone();
        Some(CacheRead {
            data,
            stale: partition.is_stale(query),
        })
    }

    /// Whether a view should (re)issue the query.
    pub fn needs_fetch(&self, key: &CacheKey, query: &str) -> bool {
        self.partitions
            .get(key)
            .is_none_or(|partition| partition.is_stale(query))
    }

    pub fn begin_fetch(&self, key: &CacheKey) -> FetchToken {
        FetchToken {
            generation: self.partitions.get(key).map_or(0, CachePartition::generation),
        }
    }

    /// Stores a fetch result. Data fetched before an invalidation is kept
    /// (it is still the best we have) but stays marked stale.
    pub fn complete_fetch(
        &mut self,
        key: &CacheKey,
        query: impl Into<QueryId>,
        data: Value,
        token: FetchToken,
    ) {
        let query = query.into();
        let partition = self.partitions.entry(key.clone()).or_default();
        if token.generation < partition.generation {
            debug!(
                key = %key,
                query = %query,
                fetched_at = token.generation,
                current = partition.generation,
                "fetch completed after invalidation; keeping result as stale"
            );
        }
        partition.entries.insert(
            query,
            CachedQuery {
                data,
                generation: token.generation,
            },
        );
    }

    pub(crate) fn snapshot(&self, key: &CacheKey) -> PartitionSnapshot {
        PartitionSnapshot {
            key: key.clone(),
            partition: self.partitions.get(key).cloned(),
        }
    }

    pub(crate) fn restore(&mut self, snapshot: PartitionSnapshot) {
        trace!(key = %snapshot.key, "restoring partition snapshot");
        match snapshot.partition {
            Some(partition) => {
                self.partitions.insert(snapshot.key, partition);
            }
            None => {
                self.partitions.remove(&snapshot.key);
            }
        }
    }

    pub(crate) fn invalidate(&mut self, key: &CacheKey) {
        let partition = self.partitions.entry(key.clone()).or_default();
        partition.generation += 1;
        debug!(key = %key, generation = partition.generation, "invalidated cache partition");
    }

    pub(crate) fn partition_mut(&mut self, key: &CacheKey) -> &mut CachePartition {
        self.partitions.entry(key.clone()).or_default()
    }
}

type PartitionEdit = Box<dyn FnOnce(&mut CachePartition) + Send>;

/// Speculative edits applied to the cache before a command confirms.
#[derive(Default)]
pub struct CachePatch {
    edits: Vec<(CacheKey, PartitionEdit)>,
}

impl CachePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edit<F>(mut self, key: impl Into<CacheKey>, edit: F) -> Self
    where
        F: FnOnce(&mut CachePartition) + Send + 'static,
    {
        self.edits.push((key.into(), Box::new(edit)));
        self
    }

    pub fn keys(&self) -> BTreeSet<CacheKey> {
        self.edits.iter().map(|(key, _)| key.clone()).collect()
    }

    pub(crate) fn apply(self, cache: &mut QueryCache) {
        for (key, edit) in self.edits {
            edit(cache.partition_mut(&key));
        }
    }
}

impl fmt::Debug for CachePatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePatch")
            .field("keys", &self.keys())
            .finish()
    }
}
