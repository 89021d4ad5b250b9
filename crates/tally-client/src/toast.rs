use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::SharedClock;

pub const MAX_LIVE_TOASTS: usize = 4;
pub const COPIED_MESSAGE: &str = "✓ Copied to clipboard! Click to copy again.";
pub const COPY_FAILED_MESSAGE: &str = "Failed to copy to clipboard";

pub type SharedToasts = Arc<Mutex<ToastScheduler>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToastId(Uuid);

impl ToastId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ToastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
    Info,
    Loading,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CopyRevert {
    message: String,
    kind: ToastKind,
    due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToastEntry {
    pub id: ToastId,
    pub message: String,
    pub kind: ToastKind,
    pub error_detail: Option<String>,
    /// Always `None` for `Loading` entries.
    pub expires_at: Option<DateTime<Utc>>,
    copy_revert: Option<CopyRevert>,
}

impl ToastEntry {
    pub fn is_copyable(&self) -> bool {
        self.error_detail.is_some()
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToastSettings {
    pub default_duration: Duration,
    pub error_duration: Duration,
    pub copy_revert: Duration,
}

impl ToastSettings {
    pub fn duration_for(&self, kind: ToastKind) -> Duration {
        match kind {
            ToastKind::Error => self.error_duration,
            _ => self.default_duration,
        }
    }
}

impl Default for ToastSettings {
    fn default() -> Self {
        Self {
            default_duration: Duration::milliseconds(3_000),
            error_duration: Duration::milliseconds(5_000),
            copy_revert: Duration::milliseconds(2_000),
        }
    }
}

pub trait Clipboard {
    fn write_text(&self, text: &str) -> anyhow::Result<()>;
}

/// Bounded FIFO of ephemeral notifications.
///
/// Expiry is deadline data checked against the clock: `live`/`get` never
/// return an expired entry, and `sweep` physically drops them and applies
/// due copy reverts. Hosts call `sweep` from their frame tick.
pub struct ToastScheduler {
    clock: SharedClock,
    settings: ToastSettings,
    queue: VecDeque<ToastEntry>,
}

impl ToastScheduler {
    pub fn new(clock: SharedClock, settings: ToastSettings) -> Self {
        Self {
            clock,
            settings,
            queue: VecDeque::with_capacity(MAX_LIVE_TOASTS + 1),
        }
    }

    pub fn shared(clock: SharedClock, settings: ToastSettings) -> SharedToasts {
        Arc::new(Mutex::new(Self::new(clock, settings)))
    }

    pub fn settings(&self) -> &ToastSettings {
        &self.settings
    }

    /// `duration: None` picks the kind's default; a zero duration keeps the
    /// entry until dismissed. `Loading` entries never expire.
    pub fn show(
        &mut self,
        message: impl Into<String>,
        kind: ToastKind,
        duration: Option<Duration>,
        error_detail: Option<String>,
    ) -> ToastId {
        self.sweep();
        let now = self.clock.now();
        let duration = duration.unwrap_or_else(|| self.settings.duration_for(kind));
        let expires_at = if kind == ToastKind::Loading || duration <= Duration::zero() {
            None
        } else {
            Some(now + duration)
        };

        let entry = ToastEntry {
            id: ToastId::new(),
            message: message.into(),
            kind,
            error_detail,
            expires_at,
            copy_revert: None,
        };
        let id = entry.id;
        debug!(toast = %id, ?kind, message = %entry.message, "showing toast");
        self.queue.push_back(entry);

        while self.queue.len() > MAX_LIVE_TOASTS {
            let Some(evicted) = self.queue.pop_front() else {
                break;
            };
            if evicted.kind == ToastKind::Loading {
                warn!(
                    toast = %evicted.id,
                    message = %evicted.message,
                    "evicted a loading toast while its operation is still pending"
                );
            } else {
                debug!(toast = %evicted.id, "evicted oldest toast");
            }
        }

        id
    }

    /// Rewrites an entry in place and re-arms its expiry from the new kind's
    /// default. `error_detail: None` keeps the existing detail. Returns false
    /// when the entry is gone.
    pub fn update(
        &mut self,
        id: ToastId,
        message: impl Into<String>,
        kind: ToastKind,
        error_detail: Option<String>,
    ) -> bool {
        let now = self.clock.now();
        let settings = self.settings;
        let Some(entry) = self.live_entry_mut(id, now) else {
            debug!(toast = %id, "update for a toast that is no longer live");
            return false;
        };

        entry.message = message.into();
        entry.kind = kind;
        if error_detail.is_some() {
            entry.error_detail = error_detail;
        }
        entry.expires_at = match kind {
            ToastKind::Loading => None,
            other => Some(now + settings.duration_for(other)),
        };
        entry.copy_revert = None;
        true
    }

    pub fn dismiss(&mut self, id: ToastId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|entry| entry.id != id);
        before != self.queue.len()
    }

    /// Copies the entry's error detail to the clipboard and shows a short
    /// confirmation. The revert is decided when it comes due: an entry that
    /// was updated or removed in the meantime is left alone.
    pub fn copy_detail(&mut self, id: ToastId, clipboard: &dyn Clipboard) -> bool {
        let now = self.clock.now();
        let revert_after = self.settings.copy_revert;
        let Some(entry) = self.live_entry_mut(id, now) else {
            return false;
        };
        let Some(detail) = entry.error_detail.clone() else {
            return false;
        };

        match clipboard.write_text(&detail) {
            Ok(()) => {
                let (message, kind) = match entry.copy_revert.take() {
                    Some(previous) => (previous.message, previous.kind),
                    None => (entry.message.clone(), entry.kind),
                };
                entry.message = COPIED_MESSAGE.to_string();
                entry.kind = ToastKind::Success;
                entry.copy_revert = Some(CopyRevert {
                    message,
                    kind,
                    due_at: now + revert_after,
                });
            }
            Err(err) => {
                warn!(toast = %id, error = %err, "failed to copy toast detail");
                entry.message = COPY_FAILED_MESSAGE.to_string();
                entry.kind = ToastKind::Error;
                entry.copy_revert = None;
            }
        }
        true
    }

    pub fn sweep(&mut self) {
        let now = self.clock.now();
        for entry in &mut self.queue {
            let due = entry
                .copy_revert
                .as_ref()
                .is_some_and(|revert| revert.due_at <= now);
            if !due {
                continue;
            }
            if let Some(revert) = entry.copy_revert.take() {
                entry.message = revert.message;
                entry.kind = revert.kind;
                if entry.kind == ToastKind::Loading {
                    entry.expires_at = None;
                }
            }
        }
        self.queue.retain(|entry| !entry.expired(now));
    }

    pub fn live(&self) -> impl Iterator<Item = &ToastEntry> {
        let now = self.clock.now();
        self.queue.iter().filter(move |entry| !entry.expired(now))
    }

    pub fn get(&self, id: ToastId) -> Option<&ToastEntry> {
        self.live().find(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_entry_mut(&mut self, id: ToastId, now: DateTime<Utc>) -> Option<&mut ToastEntry> {
        self.queue
            .iter_mut()
            .find(|entry| entry.id == id && !entry.expired(now))
    }
}

impl fmt::Debug for ToastScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToastScheduler")
            .field("settings", &self.settings)
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;

    fn scheduler() -> (ManualClock, ToastScheduler) {
        let start = Utc
            .with_ymd_and_hms(2026, 2, 18, 9, 0, 0)
            .single()
            .expect("valid start");
        let clock = ManualClock::new(start);
        let scheduler = ToastScheduler::new(Arc::new(clock.clone()), ToastSettings::default());
        (clock, scheduler)
    }

    #[derive(Default)]
    struct RecordingClipboard {
        written: RefCell<Vec<String>>,
    }

    impl Clipboard for RecordingClipboard {
        fn write_text(&self, text: &str) -> anyhow::Result<()> {
            self.written.borrow_mut().push(text.to_string());
            Ok(())
        }
    }

    struct BrokenClipboard;

    impl Clipboard for BrokenClipboard {
        fn write_text(&self, _text: &str) -> anyhow::Result<()> {
            anyhow::bail!("clipboard unavailable")
        }
    }

    #[test]
    fn loading_then_success_expires_after_default_duration() {
        let (clock, mut toasts) = scheduler();
        let id = toasts.show("Saving...", ToastKind::Loading, Some(Duration::zero()), None);
        assert_eq!(toasts.get(id).expect("live").expires_at, None);

        clock.advance_ms(10_000);
        assert!(toasts.get(id).is_some(), "loading toasts never expire");

        assert!(toasts.update(id, "Saved", ToastKind::Success, None));
        clock.advance_ms(2_999);
        let entry = toasts.get(id).expect("still live before 3000ms");
        assert_eq!(entry.message, "Saved");
        assert_eq!(entry.kind, ToastKind::Success);

        clock.advance_ms(1);
        assert!(toasts.get(id).is_none());
        toasts.sweep();
        assert!(toasts.is_empty());
    }

    #[test]
    fn error_toasts_default_to_five_seconds() {
        let (clock, mut toasts) = scheduler();
        let id = toasts.show("Failed", ToastKind::Error, None, None);
        clock.advance_ms(4_999);
        assert!(toasts.get(id).is_some());
        clock.advance_ms(1);
        assert!(toasts.get(id).is_none());
    }

    #[test]
    fn explicit_duration_wins_over_kind_default() {
        let (clock, mut toasts) = scheduler();
        let id = toasts.show("Failed", ToastKind::Error, Some(Duration::seconds(1)), None);
        clock.advance_ms(1_000);
        assert!(toasts.get(id).is_none());
    }

    #[test]
    fn fifth_toast_evicts_the_oldest_even_if_loading() {
        let (_clock, mut toasts) = scheduler();
        let loading = toasts.show("Deleting...", ToastKind::Loading, None, None);
        let mut ids = vec![loading];
        for n in 0..4 {
            ids.push(toasts.show(format!("info {n}"), ToastKind::Info, None, None));
            assert!(toasts.len() <= MAX_LIVE_TOASTS);
        }
        assert_eq!(toasts.len(), MAX_LIVE_TOASTS);
        assert!(toasts.get(loading).is_none());
        assert!(!toasts.update(loading, "Deleted", ToastKind::Success, None));
        let live: Vec<ToastId> = toasts.live().map(|entry| entry.id).collect();
        assert_eq!(live, ids[1..].to_vec());
    }

    #[test]
    fn update_keeps_detail_when_none_is_given() {
        let (_clock, mut toasts) = scheduler();
        let id = toasts.show("Failed", ToastKind::Error, None, Some("{\"type\":\"NotFound\"}".into()));
        toasts.update(id, "Still failed", ToastKind::Error, None);
        assert_eq!(
            toasts.get(id).expect("live").error_detail.as_deref(),
            Some("{\"type\":\"NotFound\"}")
        );
    }

    #[test]
    fn copy_shows_confirmation_then_reverts() {
        let (clock, mut toasts) = scheduler();
        let id = toasts.show("Failed to delete", ToastKind::Error, Some(Duration::zero()), Some("detail".into()));
        let clipboard = RecordingClipboard::default();

        assert!(toasts.copy_detail(id, &clipboard));
        assert_eq!(clipboard.written.borrow().as_slice(), ["detail".to_string()]);
        assert_eq!(toasts.get(id).expect("live").message, COPIED_MESSAGE);

        clock.advance_ms(1_999);
        toasts.sweep();
        assert_eq!(toasts.get(id).expect("live").message, COPIED_MESSAGE);

        clock.advance_ms(1);
        toasts.sweep();
        let entry = toasts.get(id).expect("live");
        assert_eq!(entry.message, "Failed to delete");
        assert_eq!(entry.kind, ToastKind::Error);
    }

    #[test]
    fn copy_revert_skips_entries_updated_in_the_interim() {
        let (clock, mut toasts) = scheduler();
        let id = toasts.show("Failed", ToastKind::Error, Some(Duration::zero()), Some("detail".into()));
        toasts.copy_detail(id, &RecordingClipboard::default());

        clock.advance_ms(500);
        toasts.update(id, "Retried and failed again", ToastKind::Error, None);

        clock.advance_ms(2_000);
        toasts.sweep();
        assert_eq!(toasts.get(id).expect("live").message, "Retried and failed again");
    }

    #[test]
    fn copy_twice_reverts_to_the_original_message() {
        let (clock, mut toasts) = scheduler();
        let id = toasts.show("Failed", ToastKind::Error, Some(Duration::zero()), Some("detail".into()));
        let clipboard = RecordingClipboard::default();
        toasts.copy_detail(id, &clipboard);
        clock.advance_ms(1_000);
        toasts.copy_detail(id, &clipboard);
        clock.advance_ms(2_000);
        toasts.sweep();
        assert_eq!(toasts.get(id).expect("live").message, "Failed");
    }

    #[test]
    fn clipboard_failure_is_reported_on_the_entry() {
        let (_clock, mut toasts) = scheduler();
        let id = toasts.show("Failed", ToastKind::Error, None, Some("detail".into()));
        assert!(toasts.copy_detail(id, &BrokenClipboard));
        let entry = toasts.get(id).expect("live");
        assert_eq!(entry.message, COPY_FAILED_MESSAGE);
        assert_eq!(entry.kind, ToastKind::Error);
    }

    #[test]
    fn entries_without_detail_are_not_copyable() {
        let (_clock, mut toasts) = scheduler();
        let id = toasts.show("Saved", ToastKind::Success, None, None);
        assert!(!toasts.copy_detail(id, &RecordingClipboard::default()));
        assert_eq!(toasts.get(id).expect("live").message, "Saved");
    }
}
