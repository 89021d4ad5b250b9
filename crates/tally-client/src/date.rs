use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use tally_shared::WeekRangeArgs;
use tracing::{debug, instrument, trace, warn};

use crate::clock::SharedClock;

/// The embedded calendar widget, as far as week reconciliation cares.
pub trait CalendarWidget {
    /// Date the widget is currently showing, `None` before it mounts.
    fn displayed_date(&self) -> Option<DateTime<Tz>>;

    fn goto_date(&mut self, date: NaiveDate);
}

fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days)).unwrap_or(date)
}

/// Monday of the week containing `day` (Sunday belongs to the week that
/// started six days earlier).
pub fn start_of_week(day: NaiveDate) -> NaiveDate {
    let offset = day.weekday().num_days_from_monday() as i64;
    add_days(day, -offset)
}

/// Local midnight of `day`. When midnight falls in a DST gap the first valid
/// instant after it is used.
pub fn local_midnight(tz: &Tz, day: NaiveDate) -> DateTime<Tz> {
    let midnight: NaiveDateTime = day.and_time(NaiveTime::MIN);

    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(local) => local,
        LocalResult::Ambiguous(first, second) => {
            trace!(%day, "ambiguous local midnight; using earliest");
            if first <= second { first } else { second }
        }
        LocalResult::None => {
            warn!(
                %day,
                timezone = %tz,
                "local midnight does not exist; using first valid instant"
            );
            (1..=24)
                .find_map(|step| {
                    tz.from_local_datetime(&(midnight + Duration::minutes(15 * step)))
                        .earliest()
                })
                .unwrap_or_else(|| tz.from_utc_datetime(&midnight))
        }
    }
}

/// Monday 00:00 local of the week containing `date`.
pub fn normalize(date: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = date.timezone();
    local_midnight(&tz, start_of_week(date.date_naive()))
}

pub fn from_unix_seconds(secs: i64, tz: &Tz) -> Option<DateTime<Tz>> {
    DateTime::<Utc>::from_timestamp(secs, 0).map(|utc| utc.with_timezone(tz))
}

pub fn to_unix_seconds<Z: TimeZone>(date: &DateTime<Z>) -> i64 {
    date.timestamp()
}

/// A date already normalized to the Monday 00:00 local boundary of its week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekAnchor(DateTime<Tz>);

impl WeekAnchor {
    pub fn containing(date: &DateTime<Tz>) -> Self {
        Self(normalize(date))
    }

    pub fn from_unix_seconds(secs: i64, tz: &Tz) -> Option<Self> {
        from_unix_seconds(secs, tz).map(|date| Self::containing(&date))
    }

    pub fn start(&self) -> &DateTime<Tz> {
        &self.0
    }

    pub fn monday(&self) -> NaiveDate {
        self.0.date_naive()
    }

    pub fn sunday(&self) -> NaiveDate {
        add_days(self.monday(), 6)
    }

    pub fn contains(&self, date: &DateTime<Tz>) -> bool {
        *self == Self::containing(date)
    }

    pub fn shifted(&self, weeks: i64) -> Self {
        let tz = self.0.timezone();
        Self(local_midnight(&tz, add_days(self.monday(), 7 * weeks)))
    }

    /// Unix-second bounds of the week as the backend expects them: Monday
    /// 00:00:00 through Sunday 23:59:59.
    pub fn range(&self) -> WeekRangeArgs {
        let week_start = to_unix_seconds(&self.0);
        let next = self.shifted(1);
        WeekRangeArgs {
            week_start,
            week_end: to_unix_seconds(next.start()) - 1,
        }
    }

    /// Cache query id for this week.
    pub fn query_id(&self) -> String {
        self.monday().format("%Y-%m-%d").to_string()
    }

    /// e.g. `Feb 16 – Feb 22, 2026`.
    pub fn header_title(&self) -> String {
        format!(
            "{} – {}",
            self.monday().format("%b %-d"),
            self.sunday().format("%b %-d, %Y")
        )
    }
}

/// Owns the canonical week and keeps the calendar widget in step with it.
///
/// Programmatic navigations open a suppression window during which the
/// widget's own navigation callbacks are treated as echoes. The window is
/// time based: a burst of `set_canonical_date` calls can let one echo through
/// as a user navigation, producing a single extra canonical update that the
/// next settle corrects.
pub struct DateCoordinator {
    tz: Tz,
    clock: SharedClock,
    suppression_window: Duration,
    canonical: WeekAnchor,
    suppressed_until: Option<DateTime<Utc>>,
    navigations_issued: u64,
}

impl DateCoordinator {
    pub fn new(tz: Tz, clock: SharedClock, suppression_window: Duration) -> Self {
        let today = clock.now().with_timezone(&tz);
        let canonical = WeekAnchor::containing(&today);
        debug!(
            timezone = %tz,
            week = %canonical.query_id(),
            "date coordinator created"
        );
        Self {
            tz,
            clock,
            suppression_window,
            canonical,
            suppressed_until: None,
            navigations_issued: 0,
        }
    }

    pub fn week_anchor(&self) -> &WeekAnchor {
        &self.canonical
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn week_range(&self) -> WeekRangeArgs {
        self.canonical.range()
    }

    pub fn navigations_issued(&self) -> u64 {
        self.navigations_issued
    }

    pub fn is_suppressing(&self) -> bool {
        let now = self.clock.now();
        self.suppressed_until.is_some_and(|until| now < until)
    }

    pub fn is_current_week(&self) -> bool {
        let today = self.clock.now().with_timezone(&self.tz);
        self.canonical.contains(&today)
    }

    /// Returns whether the canonical week changed.
    #[instrument(skip_all, fields(date = %date))]
    pub fn set_canonical_date<W: CalendarWidget + ?Sized>(
        &mut self,
        date: DateTime<Tz>,
        widget: &mut W,
    ) -> bool {
        let anchor = WeekAnchor::containing(&date.with_timezone(&self.tz));
        if anchor == self.canonical {
            trace!("canonical week unchanged");
            return false;
        }

        debug!(
            from = %self.canonical.query_id(),
            to = %anchor.query_id(),
            "canonical week changed"
        );
        self.canonical = anchor;

        let widget_week = widget
            .displayed_date()
            .map(|shown| WeekAnchor::containing(&shown.with_timezone(&self.tz)));
        if widget_week.as_ref() != Some(&self.canonical) {
            self.suppressed_until = Some(self.clock.now() + self.suppression_window);
            self.navigations_issued += 1;
            debug!(
                target_week = %self.canonical.query_id(),
                "navigating calendar widget"
            );
            widget.goto_date(self.canonical.monday());
        }

        true
    }

    /// Widget-originated navigation. Returns whether the canonical week
    /// changed.
    #[instrument(skip_all, fields(date = %date))]
    pub fn on_widget_navigated(&mut self, date: DateTime<Tz>) -> bool {
        if self.is_suppressing() {
            trace!("ignoring widget navigation inside suppression window");
            return false;
        }

        let anchor = WeekAnchor::containing(&date.with_timezone(&self.tz));
        if anchor == self.canonical {
            return false;
        }

        debug!(
            from = %self.canonical.query_id(),
            to = %anchor.query_id(),
            "widget moved canonical week"
        );
        self.canonical = anchor;
        true
    }

    pub fn previous_week<W: CalendarWidget + ?Sized>(&mut self, widget: &mut W) -> bool {
        let target = self.canonical.shifted(-1);
        self.set_canonical_date(target.start().clone(), widget)
    }

    pub fn next_week<W: CalendarWidget + ?Sized>(&mut self, widget: &mut W) -> bool {
        let target = self.canonical.shifted(1);
        self.set_canonical_date(target.start().clone(), widget)
    }

    pub fn go_to_today<W: CalendarWidget + ?Sized>(&mut self, widget: &mut W) -> bool {
        let today = self.clock.now().with_timezone(&self.tz);
        self.set_canonical_date(today, widget)
    }
}
