use crate::application::calendar_events::CalendarEventSource;
use crate::application::callback_router::{parse_search_hits, CallbackHost};
use crate::application::pending::{PendingOperations, WaitOutcome};
use crate::domain::dates::{date_string_with_offset, format_date, parse_date, today_in};
use crate::domain::models::{LeftClickAction, OperationKind, OperationState, Settings, Template};
use crate::domain::sections::{clean_note_content, replace_daily_link, replace_section};
use crate::domain::template::{expand, expand_for_date_string};
use crate::infrastructure::bear_request::{Callbacks, NoteRequestEncoder, Presentation};
use crate::infrastructure::calendar_store::CalendarStore;
use crate::infrastructure::config::ensure_single_daily;
use crate::infrastructure::error::BridgeError;
use crate::infrastructure::url_dispatcher::UrlDispatcher;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use url::Url;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Days synced on each side of the reference date.
pub const SYNC_RANGE_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Dispatched { requests: usize },
    Skipped(String),
}

impl OperationOutcome {
    pub fn requests(&self) -> usize {
        match self {
            Self::Dispatched { requests } => *requests,
            Self::Skipped(_) => 0,
        }
    }

    fn skipped(reason: &str) -> Self {
        Self::Skipped(reason.to_string())
    }
}

pub struct NoteOrchestrator<S, D>
where
    S: CalendarStore,
    D: UrlDispatcher,
{
    settings: Settings,
    timezone: Tz,
    templates: Vec<Template>,
    encoder: NoteRequestEncoder,
    calendar: CalendarEventSource<S>,
    dispatcher: Arc<D>,
    pending: Arc<PendingOperations>,
    now_provider: NowProvider,
    search_timeout: Duration,
}

impl<S, D> NoteOrchestrator<S, D>
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    pub fn new(
        settings: Settings,
        templates: Vec<Template>,
        store: Arc<S>,
        dispatcher: Arc<D>,
    ) -> Result<Self, BridgeError> {
        settings.validate().map_err(BridgeError::InvalidConfig)?;
        let timezone = settings.timezone().map_err(BridgeError::InvalidConfig)?;
        let (templates, _) = ensure_single_daily(templates);

        Ok(Self {
            encoder: NoteRequestEncoder::new(settings.callback_scheme.clone()),
            calendar: CalendarEventSource::new(store, timezone),
            search_timeout: settings.search_timeout(),
            settings,
            timezone,
            templates,
            dispatcher,
            pending: Arc::new(PendingOperations::new()),
            now_provider: Arc::new(Utc::now),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.pending = Arc::new(PendingOperations::new().with_now_provider(Arc::clone(&now_provider)));
        self.now_provider = now_provider;
        self
    }

    pub fn with_search_timeout(mut self, search_timeout: Duration) -> Self {
        self.search_timeout = search_timeout;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pending(&self) -> &PendingOperations {
        &self.pending
    }

    pub fn encoder(&self) -> &NoteRequestEncoder {
        &self.encoder
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn today(&self) -> NaiveDate {
        today_in(&self.timezone, self.now())
    }

    pub fn today_string(&self) -> String {
        format_date(self.today())
    }

    /// Opens the home note and, concurrently, refreshes its daily link and
    /// calendar section for today.
    pub async fn open_home_note(&self) -> Result<OperationOutcome, BridgeError> {
        let Some(home_note_id) = self.settings.home_note_id() else {
            log::warn!("open home note skipped: no home note configured");
            return Ok(OperationOutcome::skipped("no home note configured"));
        };
        let today = self.today_string();

        let (opened, updated) = tokio::join!(
            self.send("open home note", None, self.encoder.open_note(home_note_id)),
            self.update_home_note_if_needed(&today),
        );
        opened?;
        Ok(OperationOutcome::Dispatched {
            requests: 1 + updated?.requests(),
        })
    }

    pub async fn update_home_note_if_needed(&self, date: &str) -> Result<OperationOutcome, BridgeError> {
        validate_date(date)?;
        let Some(home_note_id) = self.settings.home_note_id() else {
            log::debug!("home note update skipped: no home note configured");
            return Ok(OperationOutcome::skipped("no home note configured"));
        };

        let (token, callbacks) = self.register_callbacks(
            OperationKind::OpenHome,
            CallbackHost::UpdateHomeNoteIfNeededSuccess,
            CallbackHost::UpdateHomeNoteIfNeededError,
            date,
            Some(home_note_id),
        )?;
        self.send(
            "fetch home note",
            Some(&token),
            self.encoder.fetch_note_by_id(home_note_id, &callbacks),
        )
        .await?;
        Ok(OperationOutcome::Dispatched { requests: 1 })
    }

    /// Fetches the note titled `date`; the router patches it on success and
    /// creates it on error.
    pub async fn open_daily_note(&self, date: &str) -> Result<OperationOutcome, BridgeError> {
        self.fetch_daily_note(
            date,
            OperationKind::OpenDaily,
            CallbackHost::OpenDailyNoteWithDateSuccess,
            CallbackHost::OpenDailyNoteWithDateError,
        )
        .await
    }

    pub async fn update_daily_note_if_needed(&self, date: &str) -> Result<OperationOutcome, BridgeError> {
        self.fetch_daily_note(
            date,
            OperationKind::UpdateDaily,
            CallbackHost::UpdateDailyNoteIfNeededSuccess,
            CallbackHost::UpdateDailyNoteIfNeededError,
        )
        .await
    }

    async fn fetch_daily_note(
        &self,
        date: &str,
        kind: OperationKind,
        success: CallbackHost,
        error: CallbackHost,
    ) -> Result<OperationOutcome, BridgeError> {
        validate_date(date)?;
        let (token, callbacks) = self.register_callbacks(kind, success, error, date, None)?;
        self.send(
            &format!("fetch daily note {date}"),
            Some(&token),
            self.encoder.fetch_note_by_title(date, &callbacks),
        )
        .await?;
        Ok(OperationOutcome::Dispatched { requests: 1 })
    }

    /// Fires one silent fetch per day in `[center - 7, center + 7]`. Each is
    /// resolved independently by the router.
    pub async fn sync_calendar_range(&self, center: NaiveDate) -> Result<OperationOutcome, BridgeError> {
        let mut requests: Vec<(String, String, Url)> = Vec::new();
        for offset in -SYNC_RANGE_DAYS..=SYNC_RANGE_DAYS {
            let Some(date) = date_string_with_offset(center, offset) else {
                log::warn!("sync offset {offset} from {} is out of range", format_date(center));
                continue;
            };
            let (token, callbacks) = self.register_callbacks(
                OperationKind::SyncDate,
                CallbackHost::UpdateDailyNoteIfNeededSuccessForSync,
                CallbackHost::UpdateDailyNoteIfNeededError,
                &date,
                None,
            )?;
            match self.encoder.fetch_note_by_title(&date, &callbacks) {
                Ok(url) => requests.push((date, token, url)),
                Err(error) => {
                    log::error!("sync fetch for {date} not sent: {error}");
                    self.pending.expire(&token)?;
                }
            }
        }

        let mut tasks = JoinSet::new();
        for (date, token, url) in requests {
            let dispatcher = Arc::clone(&self.dispatcher);
            tasks.spawn(async move {
                let result = dispatcher.dispatch(&url).await;
                (date, token, result)
            });
        }

        let mut dispatched = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, _, Ok(()))) => dispatched += 1,
                Ok((date, token, Err(error))) => {
                    log::error!("sync fetch for {date} failed: {error}");
                    self.pending.expire(&token)?;
                }
                Err(error) => log::error!("sync dispatch task failed: {error}"),
            }
        }
        log::info!(
            "calendar sync dispatched {dispatched} fetches around {}",
            format_date(center)
        );
        Ok(OperationOutcome::Dispatched { requests: dispatched })
    }

    /// Creates the daily note for `date` from the daily template without
    /// showing it.
    pub async fn create_daily_note(&self, date: &str) -> Result<OperationOutcome, BridgeError> {
        let reference = validate_date(date)?;
        let template = self.daily_template()?;
        let mut body = expand(&template.content, reference);

        let header = self.settings.calendar_section_header.trim_end();
        if body.lines().any(|line| line.trim_end() == header) {
            if let Some(events) = self.calendar_body(date) {
                body = replace_section(&body, header, &events);
            }
        }

        let tags = self.daily_tags(template);
        let (token, callbacks) = self.register_callbacks(
            OperationKind::CreateDaily,
            CallbackHost::CreateNoteSuccess,
            CallbackHost::CreateNoteError,
            date,
            None,
        )?;
        self.send(
            &format!("create daily note {date}"),
            Some(&token),
            self.encoder
                .create_note(&body, &tags, Presentation::HIDDEN, Some(&callbacks)),
        )
        .await?;
        Ok(OperationOutcome::Dispatched { requests: 1 })
    }

    /// Creates the daily note, then opens it by title. Creating today's note
    /// also refreshes the home note.
    pub async fn create_daily_note_then_open(&self, date: &str) -> Result<OperationOutcome, BridgeError> {
        let created = self.create_daily_note(date).await?;
        self.send(
            &format!("open daily note {date}"),
            None,
            self.encoder.open_note_by_title(date, Presentation::SHOWN, None),
        )
        .await?;
        let home = self.refresh_home_if_today(date).await;
        Ok(OperationOutcome::Dispatched {
            requests: created.requests() + 1 + home,
        })
    }

    pub async fn create_note_from_template(
        &self,
        template_name: &str,
        date: &str,
    ) -> Result<OperationOutcome, BridgeError> {
        let template = self
            .templates
            .iter()
            .find(|template| template.name.trim().eq_ignore_ascii_case(template_name.trim()))
            .ok_or_else(|| BridgeError::InvalidConfig(format!("template '{template_name}' not found")))?;

        let body = expand_for_date_string(&template.content, date, self.today());
        let tags: Vec<String> = Some(template.tag.trim())
            .filter(|tag| !tag.is_empty())
            .map(ToOwned::to_owned)
            .into_iter()
            .collect();
        self.send(
            &format!("create note from template '{}'", template.name),
            None,
            self.encoder.create_note(&body, &tags, Presentation::SHOWN, None),
        )
        .await?;
        Ok(OperationOutcome::Dispatched { requests: 1 })
    }

    /// Searches Bear for the daily note of `date` and waits for the reply.
    /// Empty means unknown: no reply in time, an error reply, or no hit.
    pub async fn daily_note_id(&self, date: &str) -> String {
        match self.search_daily_note(date).await {
            Ok(note_id) => note_id,
            Err(error) => {
                log::warn!("daily note search for {date} failed: {error}");
                String::new()
            }
        }
    }

    async fn search_daily_note(&self, date: &str) -> Result<String, BridgeError> {
        validate_date(date)?;
        let tag = self
            .daily_tags(self.daily_template()?)
            .into_iter()
            .next()
            .unwrap_or_default();
        if self.settings.bear_api_token.trim().is_empty() {
            log::warn!("bearApiToken is not set; Bear will not return search results");
        }

        let (token, receiver) = self
            .pending
            .register_waiting(OperationKind::Search, date, None)?;
        let callbacks = match self.callback_urls(
            OperationKind::Search,
            CallbackHost::SearchSuccess,
            CallbackHost::SearchError,
            date,
            None,
            &token,
        ) {
            Ok(callbacks) => callbacks,
            Err(error) => {
                self.pending.expire(&token)?;
                return Err(error);
            }
        };
        self.send(
            &format!("search daily note {date}"),
            Some(&token),
            self.encoder
                .search_notes(date, &tag, &callbacks, self.settings.bear_api_token.trim()),
        )
        .await?;

        match self
            .pending
            .wait_for(&token, receiver, self.search_timeout)
            .await?
        {
            WaitOutcome::Replied(reply) if reply.outcome == OperationState::Succeeded => {
                let hits = parse_search_hits(reply.param("notes").unwrap_or_default());
                let exact = hits
                    .iter()
                    .find(|hit| hit.title.as_deref().map(str::trim) == Some(date));
                Ok(exact
                    .or_else(|| hits.first())
                    .map(|hit| hit.identifier.clone())
                    .unwrap_or_default())
            }
            WaitOutcome::Replied(_) => {
                log::info!("search for {date} came back with an error");
                Ok(String::new())
            }
            WaitOutcome::TimedOut => {
                log::warn!(
                    "search for {date} got no reply within {}s",
                    self.search_timeout.as_secs_f32()
                );
                Ok(String::new())
            }
            WaitOutcome::Abandoned => Ok(String::new()),
        }
    }

    /// Creates the daily note when the search finds none, otherwise refreshes
    /// it.
    pub async fn ensure_daily_note(&self, date: &str) -> Result<OperationOutcome, BridgeError> {
        validate_date(date)?;
        let note_id = self.daily_note_id(date).await;
        if note_id.is_empty() {
            log::info!("no daily note found for {date}; creating it");
            return self.create_daily_note_then_open(date).await;
        }
        log::info!("daily note for {date} is {note_id}");
        self.update_daily_note_if_needed(date).await
    }

    pub async fn run_default_action(&self) -> Result<OperationOutcome, BridgeError> {
        match self.settings.default_action {
            LeftClickAction::Disabled => {
                log::info!("default action is disabled");
                Ok(OperationOutcome::skipped("default action disabled"))
            }
            LeftClickAction::Home => self.open_home_note().await,
            LeftClickAction::Daily => {
                let today = self.today_string();
                self.open_daily_note(&today).await
            }
        }
    }

    pub(crate) async fn apply_home_note_content(
        &self,
        date: &str,
        note_id: &str,
        content: &str,
    ) -> Result<OperationOutcome, BridgeError> {
        let mut updated = replace_daily_link(&clean_note_content(content), date);
        if let Some(events) = self.calendar_body(date) {
            updated = replace_section(&updated, self.settings.calendar_section_header.trim_end(), &events);
        }
        self.send(
            "replace home note",
            None,
            self.encoder
                .replace_note_text(note_id, &updated, Presentation::HIDDEN),
        )
        .await?;
        Ok(OperationOutcome::Dispatched { requests: 1 })
    }

    /// Writes the day's calendar section into a fetched daily note. Without
    /// calendar output the note is only shown, or left alone when hidden.
    pub(crate) async fn apply_daily_note_content(
        &self,
        date: &str,
        note_id: &str,
        content: &str,
        presentation: Presentation,
    ) -> Result<OperationOutcome, BridgeError> {
        let Some(events) = self.calendar_body(date) else {
            if presentation.show_window {
                self.send("open daily note", None, self.encoder.open_note(note_id))
                    .await?;
                return Ok(OperationOutcome::Dispatched { requests: 1 });
            }
            log::debug!("no calendar output for {date}; note {note_id} left untouched");
            return Ok(OperationOutcome::skipped("no calendar output"));
        };

        let updated = replace_section(
            &clean_note_content(content),
            self.settings.calendar_section_header.trim_end(),
            &events,
        );
        self.send(
            &format!("replace daily note {date}"),
            None,
            self.encoder.replace_note_text(note_id, &updated, presentation),
        )
        .await?;
        Ok(OperationOutcome::Dispatched { requests: 1 })
    }

    pub(crate) async fn refresh_home_if_today(&self, date: &str) -> usize {
        if date != self.today_string() {
            return 0;
        }
        match self.update_home_note_if_needed(date).await {
            Ok(outcome) => outcome.requests(),
            Err(error) => {
                log::warn!("home note refresh for {date} failed: {error}");
                0
            }
        }
    }

    fn daily_template(&self) -> Result<&Template, BridgeError> {
        self.templates
            .iter()
            .find(|template| template.is_daily)
            .ok_or_else(|| BridgeError::InvalidConfig("no daily template configured".to_string()))
    }

    fn daily_tags(&self, template: &Template) -> Vec<String> {
        [self.settings.daily_note_tag.trim(), template.tag.trim()]
            .into_iter()
            .find(|tag| !tag.is_empty())
            .map(ToOwned::to_owned)
            .into_iter()
            .collect()
    }

    fn calendar_body(&self, date: &str) -> Option<String> {
        match self
            .calendar
            .render_section_body(date, &self.settings.selected_calendar_ids, self.now())
        {
            Ok(body) if body.is_empty() => None,
            Ok(body) => Some(body),
            Err(error) => {
                log::warn!("calendar events for {date} unavailable: {error}");
                None
            }
        }
    }

    fn register_callbacks(
        &self,
        kind: OperationKind,
        success: CallbackHost,
        error: CallbackHost,
        date: &str,
        note_id: Option<&str>,
    ) -> Result<(String, Callbacks), BridgeError> {
        let token = self.pending.register(kind, date, note_id)?;
        match self.callback_urls(kind, success, error, date, note_id, &token) {
            Ok(callbacks) => Ok((token, callbacks)),
            Err(encode_error) => {
                self.pending.expire(&token)?;
                Err(encode_error)
            }
        }
    }

    fn callback_urls(
        &self,
        kind: OperationKind,
        success: CallbackHost,
        error: CallbackHost,
        date: &str,
        note_id: Option<&str>,
        token: &str,
    ) -> Result<Callbacks, BridgeError> {
        let mut params = vec![("date", date)];
        if let Some(note_id) = note_id {
            params.push(("id", note_id));
        }
        params.push(("kind", kind.as_str()));
        params.push(("op", token));

        Ok(Callbacks {
            success: self.encoder.callback_url(success.as_str(), &params)?,
            error: Some(self.encoder.callback_url(error.as_str(), &params)?),
        })
    }

    /// Dispatches an encoded request. Encoding or dispatch failures are
    /// logged, expire the pending operation and send nothing further.
    async fn send(
        &self,
        label: &str,
        token: Option<&str>,
        request: Result<Url, BridgeError>,
    ) -> Result<(), BridgeError> {
        let result = match request {
            Ok(url) => {
                log::info!("dispatching {label}");
                log::debug!("{label}: {url}");
                self.dispatcher.dispatch(&url).await
            }
            Err(error) => Err(error),
        };

        if let Err(error) = result {
            log::error!("{label} not sent: {error}");
            if let Some(token) = token {
                self.pending.expire(token)?;
            }
            return Err(error);
        }
        Ok(())
    }
}

fn validate_date(date: &str) -> Result<NaiveDate, BridgeError> {
    parse_date(date).map_err(BridgeError::InvalidDate)
}
