use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tally_shared::TimeBlockDto;
use tracing::{debug, instrument, trace};

/// Two refs denote the same block when their bounds agree within this many
/// seconds.
const BLOCK_MATCH_TOLERANCE_SECS: i64 = 1;

/// The calendar event the side panel is showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub title: String,
    pub start: i64,
    pub end: i64,
    pub apps: Vec<String>,
}

impl EventRef {
    pub fn from_time_block(block: &TimeBlockDto) -> Self {
        Self {
            title: block.category.clone(),
            start: block.start_time,
            end: block.end_time,
            apps: block.apps.iter().map(|app| app.app.clone()).collect(),
        }
    }

    pub fn same_block(&self, other: &EventRef) -> bool {
        (self.start - other.start).abs() <= BLOCK_MATCH_TOLERANCE_SECS
            && (self.end - other.end).abs() <= BLOCK_MATCH_TOLERANCE_SECS
            && app_set(&self.apps) == app_set(&other.apps)
    }

    pub fn matches_block(&self, block: &TimeBlockDto) -> bool {
        self.same_block(&Self::from_time_block(block))
    }
}

fn app_set(apps: &[String]) -> BTreeSet<&str> {
    apps.iter().map(String::as_str).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SelectionState {
    #[default]
    None,
    DateSelected(NaiveDate),
    EventSelected(EventRef),
}

impl SelectionState {
    pub fn selected_date(&self) -> Option<NaiveDate> {
        match self {
            Self::DateSelected(date) => Some(*date),
            _ => None,
        }
    }

    pub fn selected_event(&self) -> Option<&EventRef> {
        match self {
            Self::EventSelected(event) => Some(event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewMode {
    #[default]
    Week,
    Day,
    Event,
    CategoryFilter,
}

/// The view a selection implies. An event outranks a category filter, which
/// outranks a selected day.
pub fn derive_view(selection: &SelectionState, category: Option<&str>) -> ViewMode {
    match (selection, category) {
        (SelectionState::EventSelected(_), _) => ViewMode::Event,
        (_, Some(_)) => ViewMode::CategoryFilter,
        (SelectionState::DateSelected(_), None) => ViewMode::Day,
        (SelectionState::None, None) => ViewMode::Week,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub view: ViewMode,
    /// False when the transition left the view where it was, so dependents
    /// can skip re-fetching.
    pub changed: bool,
}

/// Side-panel state machine. Every input is an explicit method that returns
/// the resulting view.
#[derive(Debug, Clone, Default)]
pub struct ViewSelector {
    selection: SelectionState,
    active_category: Option<String>,
    view: ViewMode,
}

impl ViewSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn active_category(&self) -> Option<&str> {
        self.active_category.as_deref()
    }

    /// Calendar background click: clears everything and forces `Week`.
    #[instrument(skip(self))]
    pub fn background_clicked(&mut self) -> Transition {
        self.selection = SelectionState::None;
        self.active_category = None;
        self.settle()
    }

    /// Opens the day panel from any view. The date replaces a selected event
    /// and the category filter is dropped.
    #[instrument(skip(self))]
    pub fn date_header_clicked(&mut self, date: NaiveDate) -> Transition {
        self.selection = SelectionState::DateSelected(date);
        self.active_category = None;
        self.settle()
    }

    #[instrument(skip(self, event), fields(start = event.start, end = event.end))]
    pub fn event_clicked(&mut self, event: EventRef) -> Transition {
        self.selection = SelectionState::EventSelected(event);
        self.settle()
    }

    #[instrument(skip(self))]
    pub fn category_row_clicked(&mut self, category: &str) -> Transition {
        if !matches!(self.view, ViewMode::Week | ViewMode::Day) {
            trace!(view = ?self.view, "category click ignored outside week/day");
            return self.unchanged();
        }
        self.active_category = Some(category.to_string());
        self.settle()
    }

    /// Leaves the detail panel for `Day` when a date is still selected,
    /// otherwise `Week`.
    #[instrument(skip(self))]
    pub fn back(&mut self) -> Transition {
        match self.view {
            ViewMode::Event => {
                self.selection = SelectionState::None;
                self.active_category = None;
            }
            ViewMode::CategoryFilter => {
                self.active_category = None;
            }
            ViewMode::Day => {
                self.selection = SelectionState::None;
            }
            ViewMode::Week => return self.unchanged(),
        }
        self.settle()
    }

    /// A delete of the shown event settled successfully.
    #[instrument(skip(self, event), fields(start = event.start, end = event.end))]
    pub fn event_deleted(&mut self, event: &EventRef) -> Transition {
        let shown = self
            .selection
            .selected_event()
            .is_some_and(|selected| selected.same_block(event));
        if !shown {
            return self.unchanged();
        }
        self.selection = SelectionState::None;
        self.active_category = None;
        self.settle()
    }

    /// The shown event lost some of its logs; keep it selected with the apps
    /// that remain.
    pub fn event_apps_changed(&mut self, apps: Vec<String>) -> Transition {
        if let SelectionState::EventSelected(event) = &mut self.selection {
            event.apps = apps;
        }
        self.unchanged()
    }

    #[instrument(skip(self))]
    pub fn category_deleted(&mut self, category: &str) -> Transition {
        if self.active_category.as_deref() != Some(category) {
            return self.unchanged();
        }
        self.selection = SelectionState::None;
        self.active_category = None;
        self.settle()
    }

    /// Previous/next/today navigation drops whatever was selected.
    pub fn week_changed(&mut self) -> Transition {
        self.background_clicked()
    }

    /// Drops the selected event when a refreshed week no longer contains it.
    pub fn retain_event(&mut self, blocks: &[TimeBlockDto]) -> Transition {
        let Some(event) = self.selection.selected_event() else {
            return self.unchanged();
        };
        if blocks.iter().any(|block| event.matches_block(block)) {
            return self.unchanged();
        }
        debug!(
            start = event.start,
            end = event.end,
            "selected event vanished after refresh"
        );
        self.selection = SelectionState::None;
        self.settle()
    }

    fn settle(&mut self) -> Transition {
        let next = derive_view(&self.selection, self.active_category.as_deref());
        let changed = next != self.view;
        if changed {
            debug!(from = ?self.view, to = ?next, "view changed");
        }
        self.view = next;
        Transition {
            view: next,
            changed,
        }
    }

    fn unchanged(&self) -> Transition {
        Transition {
            view: self.view,
            changed: false,
        }
    }
}
