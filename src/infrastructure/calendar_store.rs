use crate::domain::models::CalendarEvent;
use crate::infrastructure::config::read_config;
use crate::infrastructure::error::BridgeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarInfo {
    pub id: String,
    pub title: String,
}

pub trait CalendarStore: Send + Sync {
    fn calendars(&self) -> Result<Vec<CalendarInfo>, BridgeError>;
    /// Events overlapping `[start, end)` in any of `calendar_ids`.
    fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        calendar_ids: &BTreeSet<String>,
    ) -> Result<Vec<CalendarEvent>, BridgeError>;
}

fn select_events<'a>(
    events: impl IntoIterator<Item = &'a CalendarEvent>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    calendar_ids: &BTreeSet<String>,
) -> Vec<CalendarEvent> {
    events
        .into_iter()
        .filter(|event| calendar_ids.contains(&event.calendar_id))
        .filter(|event| event.overlaps(start, end))
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
pub struct InMemoryCalendarStore {
    calendars: Mutex<Vec<CalendarInfo>>,
    events: Mutex<Vec<CalendarEvent>>,
}

impl InMemoryCalendarStore {
    pub fn add_calendar(&self, id: &str, title: &str) -> Result<(), BridgeError> {
        let mut calendars = self
            .calendars
            .lock()
            .map_err(|error| BridgeError::Calendar(format!("calendar store lock poisoned: {error}")))?;
        calendars.retain(|calendar| calendar.id != id);
        calendars.push(CalendarInfo {
            id: id.to_string(),
            title: title.to_string(),
        });
        Ok(())
    }

    pub fn add_event(&self, event: CalendarEvent) -> Result<(), BridgeError> {
        event.validate().map_err(BridgeError::Calendar)?;
        let mut events = self
            .events
            .lock()
            .map_err(|error| BridgeError::Calendar(format!("calendar store lock poisoned: {error}")))?;
        events.push(event);
        Ok(())
    }
}

impl CalendarStore for InMemoryCalendarStore {
    fn calendars(&self) -> Result<Vec<CalendarInfo>, BridgeError> {
        let calendars = self
            .calendars
            .lock()
            .map_err(|error| BridgeError::Calendar(format!("calendar store lock poisoned: {error}")))?;
        Ok(calendars.clone())
    }

    fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        calendar_ids: &BTreeSet<String>,
    ) -> Result<Vec<CalendarEvent>, BridgeError> {
        let events = self
            .events
            .lock()
            .map_err(|error| BridgeError::Calendar(format!("calendar store lock poisoned: {error}")))?;
        Ok(select_events(events.iter(), start, end, calendar_ids))
    }
}

#[derive(Debug, Deserialize)]
struct CalendarFile {
    #[serde(default)]
    calendars: Vec<CalendarInfo>,
    #[serde(default)]
    events: Vec<CalendarEvent>,
}

/// Reads calendars and events from a JSON export on every query. A missing
/// file is an empty calendar.
#[derive(Debug, Clone)]
pub struct JsonFileCalendarStore {
    path: PathBuf,
}

impl JsonFileCalendarStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn load(&self) -> Result<CalendarFile, BridgeError> {
        if !self.path.exists() {
            log::debug!("calendar file {} not found; no events", self.path.display());
            return Ok(CalendarFile {
                calendars: Vec::new(),
                events: Vec::new(),
            });
        }
        let parsed: CalendarFile = serde_json::from_value(read_config(&self.path)?)?;
        for event in &parsed.events {
            event.validate().map_err(|error| {
                BridgeError::Calendar(format!("{error} in {}", self.path.display()))
            })?;
        }
        Ok(parsed)
    }
}

impl CalendarStore for JsonFileCalendarStore {
    fn calendars(&self) -> Result<Vec<CalendarInfo>, BridgeError> {
        Ok(self.load()?.calendars)
    }

    fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        calendar_ids: &BTreeSet<String>,
    ) -> Result<Vec<CalendarEvent>, BridgeError> {
        let file = self.load()?;
        Ok(select_events(file.events.iter(), start, end, calendar_ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn event(calendar_id: &str, title: &str, start: &str, end: &str) -> CalendarEvent {
        CalendarEvent {
            calendar_id: calendar_id.to_string(),
            title: title.to_string(),
            start: fixed_time(start),
            end: fixed_time(end),
        }
    }

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn in_memory_store_filters_by_calendar_and_window() {
        let store = InMemoryCalendarStore::default();
        store
            .add_event(event("work", "Standup", "2024-06-15T09:00:00Z", "2024-06-15T09:15:00Z"))
            .expect("add");
        store
            .add_event(event("personal", "Gym", "2024-06-15T18:00:00Z", "2024-06-15T19:00:00Z"))
            .expect("add");
        store
            .add_event(event("work", "Tomorrow", "2024-06-16T09:00:00Z", "2024-06-16T10:00:00Z"))
            .expect("add");

        let found = store
            .events_between(
                fixed_time("2024-06-15T00:00:00Z"),
                fixed_time("2024-06-16T00:00:00Z"),
                &ids(&["work"]),
            )
            .expect("query");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Standup");
    }

    #[test]
    fn in_memory_store_rejects_inverted_events() {
        let store = InMemoryCalendarStore::default();
        let result = store.add_event(event("work", "Bad", "2024-06-15T10:00:00Z", "2024-06-15T09:00:00Z"));
        assert!(matches!(result, Err(BridgeError::Calendar(_))));
    }

    #[test]
    fn file_store_reads_export_and_treats_missing_file_as_empty() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("calendarEvents.json");
        let store = JsonFileCalendarStore::new(&path);
        assert!(store.calendars().expect("missing file").is_empty());

        fs::write(
            &path,
            serde_json::to_string(&serde_json::json!({
                "schema": 1,
                "calendars": [{"id": "work", "title": "Work"}],
                "events": [{
                    "calendarId": "work",
                    "title": "Review",
                    "start": "2024-06-15T14:00:00Z",
                    "end": "2024-06-15T15:00:00Z"
                }]
            }))
            .expect("serialize"),
        )
        .expect("write");

        assert_eq!(store.calendars().expect("calendars")[0].title, "Work");
        let found = store
            .events_between(
                fixed_time("2024-06-15T00:00:00Z"),
                fixed_time("2024-06-16T00:00:00Z"),
                &ids(&["work"]),
            )
            .expect("query");
        assert_eq!(found[0].title, "Review");
    }
}
