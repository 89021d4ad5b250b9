use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tally_shared::{
    CountMatchingLogsArgs, LogsForTimeBlockArgs, NewSkippedApp, NewSkippedAppArgs, SkippedAppDto,
    TimeBlockDto,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CachePartition, CachePatch, keys};
use crate::clock::SharedClock;
use crate::mutation::{MutationError, MutationPipeline, MutationRequest, ToastLabels};
use crate::rpc::{CommandError, CommandTransport, encode_args};
use crate::toast::ToastKind;
use crate::view::EventRef;

pub const COUNT_MATCHING_LOGS: &str = "count_matching_logs";
pub const INSERT_SKIPPED_APP_AND_DELETE_LOGS: &str = "insert_skipped_app_and_delete_logs";
pub const COUNT_LOGS_FOR_TIME_BLOCK: &str = "count_logs_for_time_block";
pub const DELETE_LOGS_FOR_TIME_BLOCK: &str = "delete_logs_for_time_block";

/// Id given to a skipped-app row shown before the backend assigns one.
const OPTIMISTIC_ID: i64 = -1;

/// A destructive command whose reach is counted server-side before the user
/// commits to it.
pub trait DestructiveOperation: Send + Sync {
    type Filter: Clone + PartialEq + fmt::Debug + Send + Sync;

    fn name(&self) -> &str;

    /// Local check run before anything goes over the wire. The message is
    /// shown inline.
    fn validate(&self, filter: &Self::Filter) -> Result<(), String>;

    fn count_command(&self) -> &str;

    fn count_payload(&self, filter: &Self::Filter) -> Result<Value, CommandError>;

    fn count_failure_label(&self) -> String {
        "Failed to count matching logs".to_string()
    }

    fn commit_request(&self, filter: &Self::Filter) -> Result<MutationRequest, CommandError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingConfirmation<F> {
    pub filter: F,
    pub preview_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("{0}")]
    Invalid(String),
    #[error("a confirmation is already being committed")]
    Busy,
    #[error("the filter changed while its preview was running")]
    Superseded,
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    NothingPending,
    Committed { data: Value, previewed: u64 },
}

struct GateState<F> {
    pending: Option<PendingConfirmation<F>>,
    committing: bool,
    edits: u64,
}

impl<F> Default for GateState<F> {
    fn default() -> Self {
        Self {
            pending: None,
            committing: false,
            edits: 0,
        }
    }
}

/// Preview, then confirm, then commit. The commit always uses the filter
/// captured by the preview the user saw.
pub struct ConfirmationGate<T, O: DestructiveOperation> {
    pipeline: Arc<MutationPipeline<T>>,
    operation: O,
    clock: SharedClock,
    state: Mutex<GateState<O::Filter>>,
}

impl<T, O> ConfirmationGate<T, O>
where
    T: CommandTransport,
    O: DestructiveOperation,
{
    pub fn new(pipeline: Arc<MutationPipeline<T>>, operation: O, clock: SharedClock) -> Self {
        Self {
            pipeline,
            operation,
            clock,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn operation(&self) -> &O {
        &self.operation
    }

    pub fn pending(&self) -> Option<PendingConfirmation<O::Filter>> {
        self.state.lock().pending.clone()
    }

    pub fn is_committing(&self) -> bool {
        self.state.lock().committing
    }

    /// Validates locally, then asks the backend how much the filter would
    /// touch. Nothing is mutated.
    #[instrument(skip(self), fields(operation = self.operation.name()))]
    pub async fn preview(
        &self,
        filter: O::Filter,
    ) -> Result<PendingConfirmation<O::Filter>, GateError> {
        if let Err(reason) = self.operation.validate(&filter) {
            debug!(%reason, "filter rejected locally");
            return Err(GateError::Invalid(reason));
        }

        let edits_at_start = self.state.lock().edits;
        let payload = self.operation.count_payload(&filter)?;
        let counted = self
            .pipeline
            .client()
            .call_as::<u64>(self.operation.count_command(), payload)
            .await;
        let preview_count = match counted {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "preview count failed");
                let message = format!("{}: {err}", self.operation.count_failure_label());
                self.pipeline.toasts().lock().show(
                    message,
                    ToastKind::Error,
                    None,
                    Some(err.detail_json()),
                );
                return Err(GateError::Command(err));
            }
        };

        let mut state = self.state.lock();
        if state.edits != edits_at_start {
            debug!("filter edited during preview; discarding count");
            return Err(GateError::Superseded);
        }
        let pending = PendingConfirmation {
            filter,
            preview_count,
            created_at: self.clock.now(),
        };
        debug!(preview_count, "confirmation pending");
        state.pending = Some(pending.clone());
        Ok(pending)
    }

    /// Commits the pending confirmation, if any. On failure the pending
    /// confirmation stays so the user can try again.
    #[instrument(skip(self), fields(operation = self.operation.name()))]
    pub async fn confirm(&self) -> Result<ConfirmOutcome, GateError> {
        let pending = {
            let mut state = self.state.lock();
            let Some(pending) = state.pending.clone() else {
                debug!("confirm without a pending preview");
                return Ok(ConfirmOutcome::NothingPending);
            };
            if state.committing {
                warn!("confirm while a commit is in flight");
                return Err(GateError::Busy);
            }
            state.committing = true;
            pending
        };
        let _committing = CommitFlag { state: &self.state };

        let request = self.operation.commit_request(&pending.filter)?;
        let data = self.pipeline.execute(request).await?;

        let mut state = self.state.lock();
        if state.pending.as_ref() == Some(&pending) {
            state.pending = None;
        }
        info!(previewed = pending.preview_count, "destructive operation committed");
        Ok(ConfirmOutcome::Committed {
            data,
            previewed: pending.preview_count,
        })
    }

    pub fn cancel(&self) -> bool {
        let cancelled = self.state.lock().pending.take().is_some();
        if cancelled {
            debug!(operation = self.operation.name(), "confirmation cancelled");
        }
        cancelled
    }

    /// Any edit to the filter input invalidates the pending confirmation and
    /// any preview still running.
    pub fn filter_edited(&self) -> bool {
        let mut state = self.state.lock();
        state.edits += 1;
        let cleared = state.pending.take().is_some();
        if cleared {
            debug!(operation = self.operation.name(), "filter edited; confirmation cleared");
        }
        cleared
    }
}

struct CommitFlag<'a, F> {
    state: &'a Mutex<GateState<F>>,
}

impl<F> Drop for CommitFlag<'_, F> {
    fn drop(&mut self) {
        self.state.lock().committing = false;
    }
}

/// Rejects what the backend's regex engine would reject. Inline flags such
/// as `(?i)` are part of that dialect.
pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    if pattern.trim().is_empty() {
        return Err("Pattern cannot be empty".to_string());
    }
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|err| format!("Invalid regex: {err}"))
}

/// Adds a skipped-app pattern and deletes every log it matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipPatternOperation;

impl DestructiveOperation for SkipPatternOperation {
    type Filter = String;

    fn name(&self) -> &str {
        "skip_pattern"
    }

    fn validate(&self, pattern: &String) -> Result<(), String> {
        validate_pattern(pattern)
    }

    fn count_command(&self) -> &str {
        COUNT_MATCHING_LOGS
    }

    fn count_payload(&self, pattern: &String) -> Result<Value, CommandError> {
        encode_args(&CountMatchingLogsArgs {
            regex: pattern.clone(),
        })
    }

    fn commit_request(&self, pattern: &String) -> Result<MutationRequest, CommandError> {
        let payload = encode_args(&NewSkippedAppArgs {
            new_app: NewSkippedApp {
                regex: pattern.clone(),
            },
        })?;
        let optimistic = SkippedAppDto {
            id: OPTIMISTIC_ID,
            regex: pattern.clone(),
        };
        let patch = CachePatch::new().edit(keys::SKIPPED_APPS, move |partition| {
            insert_skipped_app(partition, optimistic);
        });

        Ok(MutationRequest::new(INSERT_SKIPPED_APP_AND_DELETE_LOGS, payload)
            .with_patch(patch)
            .invalidates(keys::SKIPPED_APPS)
            .invalidates(keys::WEEK)
            .with_labels(ToastLabels::new(
                format!("Adding pattern \"{pattern}\"..."),
                format!("Pattern \"{pattern}\" added successfully"),
                "Failed to add pattern",
            )))
    }
}

fn insert_skipped_app(partition: &mut CachePartition, app: SkippedAppDto) {
    let mut apps: Vec<SkippedAppDto> = match partition.get(keys::ALL) {
        Some(current) => match serde_json::from_value(current.clone()) {
            Ok(apps) => apps,
            Err(err) => {
                warn!(error = %err, "cached skipped apps have an unexpected shape");
                return;
            }
        },
        None => Vec::new(),
    };
    apps.push(app);
    apps.sort_by(|a, b| a.regex.cmp(&b.regex));

    let value = match serde_json::to_value(apps) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "failed to encode optimistic skipped apps");
            return;
        }
    };
    if !partition.update(keys::ALL, |current| *current = value.clone()) {
        partition.set(keys::ALL, value);
    }
}

/// Deletes the logs behind one calendar time block.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeBlockDeletion;

impl TimeBlockDeletion {
    pub fn filter_for(event: &EventRef) -> LogsForTimeBlockArgs {
        LogsForTimeBlockArgs {
            app_names: event.apps.clone(),
            start_time: event.start,
            end_time: event.end,
        }
    }
}

impl DestructiveOperation for TimeBlockDeletion {
    type Filter = LogsForTimeBlockArgs;

    fn name(&self) -> &str {
        "delete_time_block"
    }

    fn validate(&self, filter: &LogsForTimeBlockArgs) -> Result<(), String> {
        if filter.app_names.is_empty() {
            return Err("Time block has no apps".to_string());
        }
        if filter.start_time >= filter.end_time {
            return Err("Time block ends before it starts".to_string());
        }
        Ok(())
    }

    fn count_command(&self) -> &str {
        COUNT_LOGS_FOR_TIME_BLOCK
    }

    fn count_payload(&self, filter: &LogsForTimeBlockArgs) -> Result<Value, CommandError> {
        encode_args(filter)
    }

    fn count_failure_label(&self) -> String {
        "Failed to count logs in time block".to_string()
    }

    fn commit_request(
        &self,
        filter: &LogsForTimeBlockArgs,
    ) -> Result<MutationRequest, CommandError> {
        let payload = encode_args(filter)?;
        let target = filter.clone();
        let patch = CachePatch::new().edit(keys::WEEK, move |partition| {
            partition.update_all(|_, week| drop_covered_blocks(week, &target));
        });

        Ok(MutationRequest::new(DELETE_LOGS_FOR_TIME_BLOCK, payload)
            .with_patch(patch)
            .invalidates(keys::WEEK)
            .with_labels(ToastLabels::new(
                "Deleting time block...",
                "Time block deleted",
                "Failed to delete time block",
            )))
    }
}

fn drop_covered_blocks(week: &mut Value, filter: &LogsForTimeBlockArgs) {
    let Ok(mut blocks) = serde_json::from_value::<Vec<TimeBlockDto>>(week.clone()) else {
        return;
    };
    let before = blocks.len();
    blocks.retain(|block| !covers(filter, block));
    if blocks.len() == before {
        return;
    }
    match serde_json::to_value(blocks) {
        Ok(value) => *week = value,
        Err(err) => warn!(error = %err, "failed to encode optimistic week"),
    }
}

fn covers(filter: &LogsForTimeBlockArgs, block: &TimeBlockDto) -> bool {
    let wanted: BTreeSet<&str> = filter.app_names.iter().map(String::as_str).collect();
    let apps: BTreeSet<&str> = block.apps.iter().map(|app| app.app.as_str()).collect();
    block.start_time >= filter.start_time.saturating_sub(1)
        && block.end_time <= filter.end_time.saturating_add(1)
        && apps == wanted
}
