use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, CachePatch, PartitionSnapshot, SharedCache};
use crate::rpc::{CommandClient, CommandError, CommandTransport};
use crate::toast::{SharedToasts, ToastKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToastLabels {
    pub pending: String,
    pub success: String,
    pub failure: String,
}

impl ToastLabels {
    pub fn new(
        pending: impl Into<String>,
        success: impl Into<String>,
        failure: impl Into<String>,
    ) -> Self {
        Self {
            pending: pending.into(),
            success: success.into(),
            failure: failure.into(),
        }
    }

    fn for_command(command: &str) -> Self {
        Self::new(
            format!("Running {command}..."),
            format!("{command} succeeded"),
            format!("{command} failed"),
        )
    }
}

/// One remote command plus everything needed to show it optimistically and
/// undo it.
#[derive(Debug)]
pub struct MutationRequest {
    pub id: Uuid,
    pub command: String,
    pub payload: Value,
    pub optimistic_patch: Option<CachePatch>,
    /// Partitions invalidated on success and restored on failure.
    pub cache_keys: Vec<CacheKey>,
    pub labels: ToastLabels,
}

impl MutationRequest {
    pub fn new(command: impl Into<String>, payload: Value) -> Self {
        let command = command.into();
        let labels = ToastLabels::for_command(&command);
        Self {
            id: Uuid::new_v4(),
            command,
            payload,
            optimistic_patch: None,
            cache_keys: Vec::new(),
            labels,
        }
    }

    pub fn with_patch(mut self, patch: CachePatch) -> Self {
        self.optimistic_patch = Some(patch);
        self
    }

    pub fn invalidates(mut self, key: impl Into<CacheKey>) -> Self {
        let key = key.into();
        if !self.cache_keys.contains(&key) {
            self.cache_keys.push(key);
        }
        self
    }

    pub fn with_labels(mut self, labels: ToastLabels) -> Self {
        self.labels = labels;
        self
    }

    /// Every partition the request may touch: its cache keys and whatever
    /// the optimistic patch edits.
    pub fn touched_keys(&self) -> BTreeSet<CacheKey> {
        let mut keys: BTreeSet<CacheKey> = self.cache_keys.iter().cloned().collect();
        if let Some(patch) = self.optimistic_patch.as_ref() {
            keys.extend(patch.keys());
        }
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("another mutation is already in flight for cache key {0}")]
    KeyBusy(CacheKey),
}

impl MutationError {
    /// Structured detail for the error toast, in the backend's tagged shape.
    pub fn detail_json(&self) -> String {
        match self {
            Self::Command(err) => err.detail_json(),
            Self::KeyBusy(key) => {
                serde_json::to_string_pretty(&json!({ "type": "KeyBusy", "data": key.as_str() }))
                    .unwrap_or_else(|_| self.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutationSettings {
    pub reject_overlapping_keys: bool,
}

/// Wraps remote commands with an optimistic cache patch, a loading toast and
/// rollback on failure.
pub struct MutationPipeline<T> {
    client: CommandClient<T>,
    cache: SharedCache,
    toasts: SharedToasts,
    settings: MutationSettings,
    in_flight: Mutex<BTreeMap<CacheKey, usize>>,
}

impl<T: CommandTransport> MutationPipeline<T> {
    pub fn new(
        client: CommandClient<T>,
        cache: SharedCache,
        toasts: SharedToasts,
        settings: MutationSettings,
    ) -> Self {
        Self {
            client,
            cache,
            toasts,
            settings,
            in_flight: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn client(&self) -> &CommandClient<T> {
        &self.client
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn toasts(&self) -> &SharedToasts {
        &self.toasts
    }

    pub fn settings(&self) -> MutationSettings {
        self.settings
    }

    pub fn in_flight_keys(&self) -> Vec<CacheKey> {
        self.in_flight.lock().keys().cloned().collect()
    }

    /// Runs one mutation to completion. The cache and toast locks are only
    /// taken between awaits.
    #[instrument(skip_all, fields(mutation = %request.id, command = %request.command))]
    pub async fn execute(&self, request: MutationRequest) -> Result<Value, MutationError> {
        let touched = request.touched_keys();
        let _claim = match self.claim(&touched) {
            Ok(claim) => claim,
            Err(err) => {
                let message = format!("{}: {err}", request.labels.failure);
                self.toasts
                    .lock()
                    .show(message, ToastKind::Error, None, Some(err.detail_json()));
                return Err(err);
            }
        };

        let MutationRequest {
            command,
            payload,
            optimistic_patch,
            cache_keys,
            labels,
            ..
        } = request;

        let snapshots: Vec<PartitionSnapshot> = {
            let mut cache = self.cache.lock();
            let snapshots = touched.iter().map(|key| cache.snapshot(key)).collect();
            if let Some(patch) = optimistic_patch {
                debug!(?patch, "applying optimistic patch");
                patch.apply(&mut cache);
            }
            snapshots
        };

        let toast = self
            .toasts
            .lock()
            .show(labels.pending.as_str(), ToastKind::Loading, None, None);

        match self.client.call(&command, payload).await {
            Ok(data) => {
                {
                    let mut cache = self.cache.lock();
                    for key in &cache_keys {
                        cache.invalidate(key);
                    }
                }
                let updated =
                    self.toasts
                        .lock()
                        .update(toast, labels.success.as_str(), ToastKind::Success, None);
                if !updated {
                    debug!(%toast, "loading toast gone before success");
                }
                Ok(data)
            }
            Err(err) => {
                {
                    let mut cache = self.cache.lock();
                    for snapshot in snapshots {
                        cache.restore(snapshot);
                    }
                }
                error!(error = %err, "mutation failed; cache rolled back");

                let message = format!("{}: {err}", labels.failure);
                let detail = err.detail_json();
                let mut toasts = self.toasts.lock();
                let updated = toasts.update(
                    toast,
                    message.as_str(),
                    ToastKind::Error,
                    Some(detail.clone()),
                );
                if !updated {
                    warn!(%toast, "loading toast was evicted; showing a fresh error toast");
                    toasts.show(message, ToastKind::Error, None, Some(detail));
                }
                Err(MutationError::Command(err))
            }
        }
    }

    fn claim(&self, keys: &BTreeSet<CacheKey>) -> Result<KeyClaim<'_>, MutationError> {
        let mut in_flight = self.in_flight.lock();
        if let Some(busy) = keys.iter().find(|key| in_flight.contains_key(*key)) {
            if self.settings.reject_overlapping_keys {
                warn!(key = %busy, "rejecting mutation on a busy cache key");
                return Err(MutationError::KeyBusy(busy.clone()));
            }
            warn!(
                key = %busy,
                "overlapping mutations on one cache key; a rollback may hide the other's patch"
            );
        }
        for key in keys {
            *in_flight.entry(key.clone()).or_insert(0) += 1;
        }
        Ok(KeyClaim {
            in_flight: &self.in_flight,
            keys: keys.iter().cloned().collect(),
        })
    }
}

/// Releases the pipeline's in-flight markers when the mutation settles or
/// its future is dropped.
struct KeyClaim<'a> {
    in_flight: &'a Mutex<BTreeMap<CacheKey, usize>>,
    keys: Vec<CacheKey>,
}

impl Drop for KeyClaim<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        for key in &self.keys {
            if let Some(count) = in_flight.get_mut(key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    in_flight.remove(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::cache::{QueryCache, keys};
    use crate::clock::ManualClock;
    use crate::toast::{ToastScheduler, ToastSettings};

    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<Value, String>>>,
        calls: Mutex<Vec<String>>,
    }

    impl CommandTransport for Scripted {
        async fn invoke(&self, command: &str, _payload: Value) -> Result<Value, String> {
            self.calls.lock().push(command.to_string());
            let reply = self.replies.lock().pop_front();
            reply.unwrap_or_else(|| Err("no scripted reply".into()))
        }
    }

    fn pipeline(replies: Vec<Result<Value, String>>) -> MutationPipeline<Scripted> {
        let clock = ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 18, 9, 0, 0)
                .single()
                .expect("valid start"),
        );
        let transport = Scripted {
            replies: Mutex::new(replies.into()),
            ..Scripted::default()
        };
        MutationPipeline::new(
            CommandClient::new(transport),
            QueryCache::shared(),
            ToastScheduler::shared(Arc::new(clock), ToastSettings::default()),
            MutationSettings::default(),
        )
    }

    fn seed(pipeline: &MutationPipeline<Scripted>) {
        let mut cache = pipeline.cache().lock();
        let key = CacheKey::from(keys::SKIPPED_APPS);
        let token = cache.begin_fetch(&key);
        cache.complete_fetch(&key, keys::ALL, json!(["a"]), token);
    }

    fn push_b() -> CachePatch {
        CachePatch::new().edit(keys::SKIPPED_APPS, |partition| {
            partition.update(keys::ALL, |value| {
                if let Some(items) = value.as_array_mut() {
                    items.push(json!("b"));
                }
            });
        })
    }

    #[tokio::test]
    async fn success_invalidates_and_keeps_the_patch_visible() {
        let pipeline = pipeline(vec![Ok(json!(3))]);
        seed(&pipeline);

        let request = MutationRequest::new("insert_skipped_app", json!({}))
            .with_patch(push_b())
            .invalidates(keys::SKIPPED_APPS);
        let data = pipeline.execute(request).await.expect("success");
        assert_eq!(data, json!(3));

        let cache = pipeline.cache().lock();
        let read = cache
            .read(&CacheKey::from(keys::SKIPPED_APPS), keys::ALL)
            .expect("cached");
        assert_eq!(read.data, json!(["a", "b"]));
        assert!(read.stale);
        assert!(pipeline.in_flight_keys().is_empty());
    }

    #[tokio::test]
    async fn failure_restores_the_partition_exactly() {
        let pipeline = pipeline(vec![Ok(json!({ "type": "Db", "data": "locked" }))]);
        seed(&pipeline);
        let before = pipeline
            .cache()
            .lock()
            .partition(&CacheKey::from(keys::SKIPPED_APPS))
            .cloned();

        let request = MutationRequest::new("insert_skipped_app", json!({}))
            .with_patch(push_b())
            .invalidates(keys::SKIPPED_APPS);
        let err = pipeline.execute(request).await.expect_err("failure");
        assert_eq!(
            err,
            MutationError::Command(CommandError::Db("locked".into()))
        );

        let after = pipeline
            .cache()
            .lock()
            .partition(&CacheKey::from(keys::SKIPPED_APPS))
            .cloned();
        assert_eq!(after, before);

        let toasts = pipeline.toasts().lock();
        let toast = toasts.live().next().expect("error toast");
        assert_eq!(toast.kind, ToastKind::Error);
        assert!(
            toast
                .error_detail
                .as_deref()
                .is_some_and(|detail| detail.contains("locked"))
        );
    }

    #[tokio::test]
    async fn transport_failure_takes_the_error_path() {
        let pipeline = pipeline(vec![Err("bridge closed".into())]);
        let err = pipeline
            .execute(MutationRequest::new("delete_category", json!({ "id": 1 })))
            .await
            .expect_err("failure");
        assert!(matches!(
            err,
            MutationError::Command(CommandError::TransportFailure(_))
        ));
    }

    #[test]
    fn touched_keys_cover_patch_and_invalidation_targets() {
        let request = MutationRequest::new("x", Value::Null)
            .with_patch(push_b())
            .invalidates(keys::WEEK)
            .invalidates(keys::WEEK);
        assert_eq!(request.cache_keys.len(), 1);
        let touched: Vec<String> = request
            .touched_keys()
            .iter()
            .map(|key| key.to_string())
            .collect();
        assert_eq!(touched, vec!["skipped_apps", "week"]);
    }
}
