use crate::domain::dates::{day_window, format_time, parse_date};
use crate::domain::models::CalendarEvent;
use crate::domain::sections::NO_EVENTS_SENTINEL;
use crate::infrastructure::calendar_store::CalendarStore;
use crate::infrastructure::error::BridgeError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Renders a day's events from the selected calendars as checklist lines.
pub struct CalendarEventSource<S>
where
    S: CalendarStore,
{
    store: Arc<S>,
    timezone: Tz,
}

impl<S> CalendarEventSource<S>
where
    S: CalendarStore,
{
    pub fn new(store: Arc<S>, timezone: Tz) -> Self {
        Self { store, timezone }
    }

    /// Lines for `date_string`. An empty selection yields no lines at all; a
    /// selection with no events in the window yields the sentinel line.
    pub fn events_for(
        &self,
        date_string: &str,
        selected_calendar_ids: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, BridgeError> {
        if selected_calendar_ids.is_empty() {
            log::warn!("no calendars selected; skipping events for {date_string}");
            return Ok(Vec::new());
        }

        let date = parse_date(date_string).map_err(BridgeError::InvalidDate)?;
        let (start, end) = day_window(date, &self.timezone).ok_or_else(|| {
            BridgeError::InvalidDate(format!("no day window for {date_string}"))
        })?;

        let mut events = self
            .store
            .events_between(start, end, selected_calendar_ids)?;
        if events.is_empty() {
            return Ok(vec![NO_EVENTS_SENTINEL.to_string()]);
        }
        events.sort_by(|left, right| left.start.cmp(&right.start).then(left.end.cmp(&right.end)));

        Ok(events
            .iter()
            .map(|event| render_event_line(event, now, &self.timezone))
            .collect())
    }

    pub fn render_section_body(
        &self,
        date_string: &str,
        selected_calendar_ids: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<String, BridgeError> {
        Ok(self
            .events_for(date_string, selected_calendar_ids, now)?
            .join("\n"))
    }
}

pub fn render_event_line(event: &CalendarEvent, now: DateTime<Utc>, timezone: &Tz) -> String {
    let status = if event.end < now { 'x' } else { ' ' };
    format!(
        "- [{status}] {} - {}: {}",
        format_time(event.start, timezone),
        format_time(event.end, timezone),
        event.title.replace('\n', " ")
    )
}
