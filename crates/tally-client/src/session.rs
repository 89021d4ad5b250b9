use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use tally_shared::{CategoryDto, EventLogDto, LogsForTimeBlockArgs, TimeBlockDto};
use tracing::{debug, instrument, warn};

use crate::commands::{self, GET_LOGS_FOR_TIME_BLOCK};
use crate::confirm::{
    ConfirmOutcome, ConfirmationGate, GateError, PendingConfirmation, TimeBlockDeletion,
};
use crate::date::{CalendarWidget, DateCoordinator};
use crate::mutation::{MutationError, MutationPipeline};
use crate::rpc::{CommandError, CommandTransport, encode_args};
use crate::toast::ToastKind;
use crate::view::{EventRef, Transition, ViewSelector};

/// The calendar screen: canonical week, widget, side panel and the
/// time-block delete flow wired together.
pub struct CalendarSession<T, W> {
    dates: DateCoordinator,
    widget: W,
    view: ViewSelector,
    pipeline: Arc<MutationPipeline<T>>,
    deletion: ConfirmationGate<T, TimeBlockDeletion>,
    /// Logs behind the selected event, longest first.
    event_logs: Vec<EventLogDto>,
}

impl<T, W> CalendarSession<T, W>
where
    T: CommandTransport,
    W: CalendarWidget,
{
    pub fn new(
        dates: DateCoordinator,
        widget: W,
        pipeline: Arc<MutationPipeline<T>>,
        deletion: ConfirmationGate<T, TimeBlockDeletion>,
    ) -> Self {
        Self {
            dates,
            widget,
            view: ViewSelector::new(),
            pipeline,
            deletion,
            event_logs: Vec::new(),
        }
    }

    pub fn dates(&self) -> &DateCoordinator {
        &self.dates
    }

    pub fn view(&self) -> &ViewSelector {
        &self.view
    }

    pub fn widget(&self) -> &W {
        &self.widget
    }

    pub fn deletion(&self) -> &ConfirmationGate<T, TimeBlockDeletion> {
        &self.deletion
    }

    pub fn event_logs(&self) -> &[EventLogDto] {
        &self.event_logs
    }

    pub fn set_canonical_date(&mut self, date: DateTime<Tz>) -> bool {
        self.dates.set_canonical_date(date, &mut self.widget)
    }

    /// Callback from the widget's own navigation. The selection is left
    /// alone; only the header buttons reset it.
    pub fn widget_navigated(&mut self, date: DateTime<Tz>) -> bool {
        self.dates.on_widget_navigated(date)
    }

    pub fn previous_week(&mut self) -> Transition {
        self.dates.previous_week(&mut self.widget);
        self.week_changed()
    }

    pub fn next_week(&mut self) -> Transition {
        self.dates.next_week(&mut self.widget);
        self.week_changed()
    }

    pub fn go_to_today(&mut self) -> Transition {
        self.dates.go_to_today(&mut self.widget);
        self.week_changed()
    }

    pub fn background_clicked(&mut self) -> Transition {
        self.selection_changed();
        self.view.background_clicked()
    }

    pub fn date_header_clicked(&mut self, date: NaiveDate) -> Transition {
        self.selection_changed();
        self.view.date_header_clicked(date)
    }

    /// Selects the event; follow with [`Self::load_event_logs`] to fill the
    /// panel.
    pub fn event_clicked(&mut self, event: EventRef) -> Transition {
        self.selection_changed();
        self.view.event_clicked(event)
    }

    pub fn category_row_clicked(&mut self, category: &str) -> Transition {
        self.view.category_row_clicked(category)
    }

    pub fn back(&mut self) -> Transition {
        self.selection_changed();
        self.view.back()
    }

    /// Reads the logs behind the selected event. A failed read leaves the
    /// panel empty and is toasted.
    #[instrument(skip(self))]
    pub async fn load_event_logs(&mut self) -> Result<&[EventLogDto], CommandError> {
        let Some(event) = self.view.selection().selected_event() else {
            self.event_logs.clear();
            return Ok(&self.event_logs);
        };
        let payload = encode_args(&TimeBlockDeletion::filter_for(event))?;
        let loaded = self
            .pipeline
            .client()
            .call_as::<Vec<EventLogDto>>(GET_LOGS_FOR_TIME_BLOCK, payload)
            .await;
        match loaded {
            Ok(mut logs) => {
                logs.sort_by(|a, b| b.duration.cmp(&a.duration));
                debug!(count = logs.len(), "event logs loaded");
                self.event_logs = logs;
                Ok(&self.event_logs)
            }
            Err(err) => {
                warn!(error = %err, "failed to load event logs");
                self.event_logs.clear();
                self.pipeline.toasts().lock().show(
                    format!("Failed to load logs: {err}"),
                    ToastKind::Error,
                    None,
                    Some(err.detail_json()),
                );
                Err(err)
            }
        }
    }

    /// Deletes some of the selected event's logs. The event stays shown with
    /// the apps that remain, or the panel returns to the week once none do.
    #[instrument(skip(self))]
    pub async fn delete_event_logs(&mut self, ids: &[i64]) -> Result<Transition, MutationError> {
        let request = commands::delete_logs(ids)?;
        self.pipeline.execute(request).await?;

        self.deletion.filter_edited();
        self.event_logs
            .retain(|log| !log.ids.iter().any(|id| ids.contains(id)));
        let selected = self.view.selection().selected_event().cloned();
        match selected {
            Some(event) if self.event_logs.is_empty() => Ok(self.view.event_deleted(&event)),
            _ => {
                let apps = self.event_logs.iter().map(|log| log.app.clone()).collect();
                Ok(self.view.event_apps_changed(apps))
            }
        }
    }

    /// Deletes a category; the panel leaves its filter if it was the active
    /// one.
    #[instrument(skip(self, category), fields(category = %category.name))]
    pub async fn delete_category(
        &mut self,
        category: &CategoryDto,
        cascade: bool,
    ) -> Result<Transition, MutationError> {
        let request = commands::delete_category(category, cascade)?;
        self.pipeline.execute(request).await?;
        Ok(self.view.category_deleted(&category.name))
    }

    /// Counts the logs behind the selected event.
    #[instrument(skip(self))]
    pub async fn preview_block_deletion(
        &self,
    ) -> Result<PendingConfirmation<LogsForTimeBlockArgs>, GateError> {
        let Some(event) = self.view.selection().selected_event() else {
            return Err(GateError::Invalid("No time block selected".to_string()));
        };
        let filter = TimeBlockDeletion::filter_for(event);
        self.deletion.preview(filter).await
    }

    /// Deletes the previewed block. The panel falls back to the week once
    /// the delete settles.
    #[instrument(skip(self))]
    pub async fn confirm_block_deletion(&mut self) -> Result<ConfirmOutcome, GateError> {
        let previewed = self.deletion.pending();
        let outcome = self.deletion.confirm().await?;
        if let (ConfirmOutcome::Committed { .. }, Some(previewed)) = (&outcome, previewed) {
            let deleted = self
                .view
                .selection()
                .selected_event()
                .filter(|event| TimeBlockDeletion::filter_for(event) == previewed.filter)
                .cloned();
            if let Some(event) = deleted {
                self.event_logs.clear();
                let transition = self.view.event_deleted(&event);
                debug!(view = ?transition.view, "time block deleted");
            }
        }
        Ok(outcome)
    }

    pub fn cancel_block_deletion(&self) -> bool {
        self.deletion.cancel()
    }

    /// Feed the re-read week after a refresh.
    pub fn week_refreshed(&mut self, blocks: &[TimeBlockDto]) -> Transition {
        self.view.retain_event(blocks)
    }

    fn week_changed(&mut self) -> Transition {
        self.selection_changed();
        self.view.week_changed()
    }

    fn selection_changed(&mut self) {
        self.deletion.filter_edited();
        self.event_logs.clear();
    }
}
