use crate::domain::dates::parse_date;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_CALENDAR_SECTION_HEADER: &str = "## Calendar Events";
pub const DEFAULT_DAILY_TEMPLATE_NAME: &str = "Daily";
pub const DEFAULT_DAILY_TAG: &str = "Daily Notes";
pub const SUPPORTED_DATE_FORMAT: &str = "yyyy-MM-dd";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_CALLBACK_SCHEME: &str = "fodabear";
pub const DEFAULT_SEARCH_TIMEOUT_SECONDS: u64 = 10;

const DEFAULT_DAILY_TEMPLATE_CONTENT: &str = concat!(
    "---\n",
    "type: daily\n",
    "date: %date()%\n",
    "---\n",
    "# %date()%\n",
    "\n\n\n\n\n\n\n",
    "<- [[%date(-1)%]] - [[%date(+1)%]] ->\n",
    "---"
);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub is_daily: bool,
}

impl Template {
    pub fn new(
        name: impl Into<String>,
        content: impl Into<String>,
        tag: impl Into<String>,
        is_daily: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            content: content.into(),
            tag: tag.into(),
            is_daily,
        }
    }

    pub fn default_daily() -> Self {
        Self::new(
            DEFAULT_DAILY_TEMPLATE_NAME,
            DEFAULT_DAILY_TEMPLATE_CONTENT,
            DEFAULT_DAILY_TAG,
            true,
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "template.id")?;
        validate_non_empty(&self.name, "template.name")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeftClickAction {
    #[default]
    Disabled,
    Home,
    Daily,
}

impl LeftClickAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Home => "home",
            Self::Daily => "daily",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub home_note_id: String,
    #[serde(default)]
    pub default_action: LeftClickAction,
    #[serde(default)]
    pub daily_note_tag: String,
    #[serde(default = "default_calendar_section_header")]
    pub calendar_section_header: String,
    #[serde(default)]
    pub selected_calendar_ids: BTreeSet<String>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub launch_at_login: bool,
    #[serde(default)]
    pub bear_api_token: String,
    #[serde(default = "default_callback_scheme")]
    pub callback_scheme: String,
    #[serde(default = "default_search_timeout_seconds")]
    pub search_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home_note_id: String::new(),
            default_action: LeftClickAction::default(),
            daily_note_tag: String::new(),
            calendar_section_header: default_calendar_section_header(),
            selected_calendar_ids: BTreeSet::new(),
            date_format: default_date_format(),
            timezone: default_timezone(),
            launch_at_login: false,
            bear_api_token: String::new(),
            callback_scheme: default_callback_scheme(),
            search_timeout_seconds: default_search_timeout_seconds(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.calendar_section_header, "settings.calendar_section_header")?;
        if self.calendar_section_header.contains('\n') {
            return Err("settings.calendar_section_header must be a single line".to_string());
        }
        if self.date_format != SUPPORTED_DATE_FORMAT {
            return Err(format!(
                "settings.date_format '{}' is not supported; use {SUPPORTED_DATE_FORMAT}",
                self.date_format
            ));
        }
        self.timezone()?;
        validate_scheme(&self.callback_scheme, "settings.callback_scheme")?;
        if self.search_timeout_seconds == 0 {
            return Err("settings.search_timeout_seconds must be > 0".to_string());
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, String> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| format!("settings.timezone '{}' is not a known timezone", self.timezone))
    }

    pub fn home_note_id(&self) -> Option<&str> {
        Some(self.home_note_id.trim()).filter(|value| !value.is_empty())
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub calendar_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CalendarEvent {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.calendar_id, "event.calendar_id")?;
        if self.end < self.start {
            return Err("event.end must be >= event.start".to_string());
        }
        Ok(())
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && (self.end > start || (self.end == self.start && self.start >= start))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    OpenHome,
    OpenDaily,
    UpdateDaily,
    CreateDaily,
    Search,
    SyncDate,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenHome => "open-home",
            Self::OpenDaily => "open-daily",
            Self::UpdateDaily => "update-daily",
            Self::CreateDaily => "create-daily",
            Self::Search => "search",
            Self::SyncDate => "sync-date",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::OpenHome,
            Self::OpenDaily,
            Self::UpdateDaily,
            Self::CreateDaily,
            Self::Search,
            Self::SyncDate,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == value.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Requested,
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub kind: OperationKind,
    pub context_date: String,
    pub context_note_id: Option<String>,
    pub state: OperationState,
    pub requested_at: DateTime<Utc>,
}

impl PendingOperation {
    pub fn validate(&self) -> Result<(), String> {
        validate_date(&self.context_date, "operation.context_date")?;
        if let Some(note_id) = &self.context_note_id {
            validate_non_empty(note_id, "operation.context_note_id")?;
        }
        Ok(())
    }
}

fn default_calendar_section_header() -> String {
    DEFAULT_CALENDAR_SECTION_HEADER.to_string()
}

fn default_date_format() -> String {
    SUPPORTED_DATE_FORMAT.to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_callback_scheme() -> String {
    DEFAULT_CALLBACK_SCHEME.to_string()
}

fn default_search_timeout_seconds() -> u64 {
    DEFAULT_SEARCH_TIMEOUT_SECONDS
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    parse_date(value).map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}

fn validate_scheme(value: &str, field_name: &str) -> Result<(), String> {
    let mut chars = value.chars();
    let starts_with_letter = chars.next().is_some_and(|first| first.is_ascii_alphabetic());
    let rest_valid = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !starts_with_letter || !rest_valid {
        return Err(format!("{field_name} '{value}' is not a valid URL scheme"));
    }
    Ok(())
}
