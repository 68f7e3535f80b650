use crate::application::note_orchestrator::NoteOrchestrator;
use crate::application::pending::CallbackReply;
use crate::domain::dates::parse_date;
use crate::domain::models::{OperationKind, OperationState, PendingOperation};
use crate::infrastructure::bear_request::{decode_query_pairs, Presentation};
use crate::infrastructure::calendar_store::CalendarStore;
use crate::infrastructure::error::BridgeError;
use crate::infrastructure::url_dispatcher::UrlDispatcher;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackHost {
    OpenNoteSuccess,
    OpenNoteError,
    OpenNoteDailySuccess,
    OpenNoteDailyError,
    UpdateHomeNoteIfNeededSuccess,
    UpdateHomeNoteIfNeededError,
    UpdateDailyNoteIfNeededSuccess,
    UpdateDailyNoteIfNeededError,
    UpdateDailyNoteIfNeededSuccessForSync,
    OpenDailyNoteSuccess,
    OpenDailyNoteError,
    OpenDailyNoteWithDateSuccess,
    OpenDailyNoteWithDateError,
    CreateNoteSuccess,
    CreateNoteError,
    SearchSuccess,
    SearchError,
}

impl CallbackHost {
    const ALL: [Self; 17] = [
        Self::OpenNoteSuccess,
        Self::OpenNoteError,
        Self::OpenNoteDailySuccess,
        Self::OpenNoteDailyError,
        Self::UpdateHomeNoteIfNeededSuccess,
        Self::UpdateHomeNoteIfNeededError,
        Self::UpdateDailyNoteIfNeededSuccess,
        Self::UpdateDailyNoteIfNeededError,
        Self::UpdateDailyNoteIfNeededSuccessForSync,
        Self::OpenDailyNoteSuccess,
        Self::OpenDailyNoteError,
        Self::OpenDailyNoteWithDateSuccess,
        Self::OpenDailyNoteWithDateError,
        Self::CreateNoteSuccess,
        Self::CreateNoteError,
        Self::SearchSuccess,
        Self::SearchError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenNoteSuccess => "open-note-success",
            Self::OpenNoteError => "open-note-error",
            Self::OpenNoteDailySuccess => "open-note-daily-success",
            Self::OpenNoteDailyError => "open-note-daily-error",
            Self::UpdateHomeNoteIfNeededSuccess => "update-home-note-if-needed-success",
            Self::UpdateHomeNoteIfNeededError => "update-home-note-if-needed-error",
            Self::UpdateDailyNoteIfNeededSuccess => "update-daily-note-if-needed-success",
            Self::UpdateDailyNoteIfNeededError => "update-daily-note-if-needed-error",
            Self::UpdateDailyNoteIfNeededSuccessForSync => "update-daily-note-if-needed-success-for-sync",
            Self::OpenDailyNoteSuccess => "open-daily-note-success",
            Self::OpenDailyNoteError => "open-daily-note-error",
            Self::OpenDailyNoteWithDateSuccess => "open-daily-note-with-date-success",
            Self::OpenDailyNoteWithDateError => "open-daily-note-with-date-error",
            Self::CreateNoteSuccess => "create-note-success",
            Self::CreateNoteError => "create-note-error",
            Self::SearchSuccess => "searchSuccess",
            Self::SearchError => "searchError",
        }
    }

    /// Hosts are matched case-insensitively; some URL stacks lowercase them.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|host| host.as_str().eq_ignore_ascii_case(value))
    }

    pub fn outcome(self) -> OperationState {
        match self {
            Self::OpenNoteError
            | Self::OpenNoteDailyError
            | Self::UpdateHomeNoteIfNeededError
            | Self::UpdateDailyNoteIfNeededError
            | Self::OpenDailyNoteError
            | Self::OpenDailyNoteWithDateError
            | Self::CreateNoteError
            | Self::SearchError => OperationState::Failed,
            _ => OperationState::Succeeded,
        }
    }

    /// The operation a callback on this host answers when the URL itself does
    /// not say.
    pub fn operation_kind(self) -> OperationKind {
        match self {
            Self::OpenNoteSuccess
            | Self::OpenNoteError
            | Self::UpdateHomeNoteIfNeededSuccess
            | Self::UpdateHomeNoteIfNeededError => OperationKind::OpenHome,
            Self::UpdateDailyNoteIfNeededSuccess | Self::UpdateDailyNoteIfNeededError => {
                OperationKind::UpdateDaily
            }
            Self::UpdateDailyNoteIfNeededSuccessForSync => OperationKind::SyncDate,
            Self::OpenNoteDailySuccess
            | Self::OpenNoteDailyError
            | Self::OpenDailyNoteSuccess
            | Self::OpenDailyNoteError
            | Self::OpenDailyNoteWithDateSuccess
            | Self::OpenDailyNoteWithDateError => OperationKind::OpenDaily,
            Self::CreateNoteSuccess | Self::CreateNoteError => OperationKind::CreateDaily,
            Self::SearchSuccess | Self::SearchError => OperationKind::Search,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCallback {
    pub host: CallbackHost,
    pub params: BTreeMap<String, String>,
}

impl InboundCallback {
    pub fn parse(raw: &str, scheme: &str) -> Result<Self, BridgeError> {
        let url = Url::parse(raw.trim())
            .map_err(|error| BridgeError::Callback(format!("invalid callback url: {error}")))?;
        if !url.scheme().eq_ignore_ascii_case(scheme) {
            return Err(BridgeError::Callback(format!(
                "unexpected callback scheme '{}'",
                url.scheme()
            )));
        }
        let host_name = url
            .host_str()
            .ok_or_else(|| BridgeError::Callback("callback url has no host".to_string()))?;
        let host = CallbackHost::parse(host_name)
            .ok_or_else(|| BridgeError::Callback(format!("unknown callback host '{host_name}'")))?;

        let mut params = BTreeMap::new();
        for (key, value) in decode_query_pairs(url.query().unwrap_or_default()) {
            params.entry(key).or_insert(value);
        }
        Ok(Self { host, params })
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub identifier: String,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSearchHit {
    identifier: Option<String>,
    title: Option<String>,
}

/// Parses Bear's `notes` search payload. Anything unparseable is no hits.
pub fn parse_search_hits(notes_json: &str) -> Vec<SearchHit> {
    if notes_json.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<RawSearchHit>>(notes_json) {
        Ok(hits) => hits
            .into_iter()
            .filter_map(|hit| {
                let identifier = hit.identifier?.trim().to_string();
                (!identifier.is_empty()).then_some(SearchHit {
                    identifier,
                    title: hit.title,
                })
            })
            .collect(),
        Err(error) => {
            log::warn!("search payload is not a note list: {error}");
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackDisposition {
    /// Not ours, unparseable, or stale.
    Ignored,
    /// Ours but unusable: missing payload or context.
    Dropped,
    /// Follow-up work ran (or was deliberately skipped).
    Handled,
    /// Reply handed to a local waiter.
    Delivered,
}

#[derive(Debug, Clone)]
struct CallbackContext {
    kind: OperationKind,
    date: String,
    note_id: Option<String>,
}

/// Demultiplexes inbound callback URLs and runs the follow-up for each.
pub struct CallbackRouter<S, D>
where
    S: CalendarStore,
    D: UrlDispatcher,
{
    orchestrator: Arc<NoteOrchestrator<S, D>>,
}

impl<S, D> CallbackRouter<S, D>
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    pub fn new(orchestrator: Arc<NoteOrchestrator<S, D>>) -> Self {
        Self { orchestrator }
    }

    pub async fn handle(&self, raw: &str) -> CallbackDisposition {
        let scheme = self.orchestrator.encoder().callback_scheme();
        let callback = match InboundCallback::parse(raw, scheme) {
            Ok(callback) => callback,
            Err(error) => {
                log::warn!("ignoring callback: {error}");
                return CallbackDisposition::Ignored;
            }
        };
        log::info!("callback {}", callback.host.as_str());

        let operation = match self.resolve_operation(&callback) {
            Ok(operation) => operation,
            Err(error) => {
                log::error!("callback {} not correlated: {error}", callback.host.as_str());
                return CallbackDisposition::Dropped;
            }
        };

        if let (None, Some(token)) = (&operation, callback.param("op")) {
            match self.orchestrator.pending().is_settled(token) {
                Ok(true) => {
                    log::debug!(
                        "{} callback for settled operation {token}; ignoring",
                        callback.host.as_str()
                    );
                    return CallbackDisposition::Ignored;
                }
                Ok(false) if callback.param("date").is_none() => {
                    log::debug!("stale {} callback without date; ignoring", callback.host.as_str());
                    return CallbackDisposition::Ignored;
                }
                Ok(false) => {}
                Err(error) => {
                    log::error!("callback {} not correlated: {error}", callback.host.as_str());
                    return CallbackDisposition::Dropped;
                }
            }
        }

        if callback.host.operation_kind() == OperationKind::Search {
            return match operation {
                Some(_) => CallbackDisposition::Delivered,
                None => {
                    log::debug!("search reply with no waiter; ignoring");
                    CallbackDisposition::Ignored
                }
            };
        }

        let Some(context) = self.context_for(&callback, operation.as_ref()) else {
            log::warn!(
                "dropping {}: no date context to act on",
                callback.host.as_str()
            );
            return CallbackDisposition::Dropped;
        };

        match callback.host.outcome() {
            OperationState::Failed => self.on_failure(&callback, &context).await,
            _ => self.on_success(&callback, &context).await,
        }
    }

    /// Resolves the pending entry by its `op` token, or by the single-flight
    /// rule when the callback carries none.
    fn resolve_operation(&self, callback: &InboundCallback) -> Result<Option<PendingOperation>, BridgeError> {
        let reply = CallbackReply {
            outcome: callback.host.outcome(),
            params: callback.params.clone(),
        };
        let pending = self.orchestrator.pending();
        match callback.param("op") {
            Some(token) => pending.resolve(token, reply),
            None => pending.resolve_single_flight(callback.host.operation_kind(), reply),
        }
    }

    fn context_for(
        &self,
        callback: &InboundCallback,
        operation: Option<&PendingOperation>,
    ) -> Option<CallbackContext> {
        let kind = operation
            .map(|operation| operation.kind)
            .or_else(|| callback.param("kind").and_then(OperationKind::parse))
            .unwrap_or_else(|| callback.host.operation_kind());

        let titled_date = || {
            (callback.host.outcome() == OperationState::Succeeded)
                .then(|| callback.param("title"))
                .flatten()
                .filter(|title| parse_date(title).is_ok())
        };
        let date = callback
            .param("date")
            .map(ToOwned::to_owned)
            .or_else(|| operation.map(|operation| operation.context_date.clone()))
            .or_else(|| titled_date().map(ToOwned::to_owned))
            .or_else(|| (kind == OperationKind::OpenHome).then(|| self.orchestrator.today_string()))?;
        if let Err(error) = parse_date(&date) {
            log::warn!("callback {} carries an unusable date: {error}", callback.host.as_str());
            return None;
        }

        let note_id = callback
            .param("id")
            .map(ToOwned::to_owned)
            .or_else(|| operation.and_then(|operation| operation.context_note_id.clone()));
        Some(CallbackContext { kind, date, note_id })
    }

    async fn on_success(&self, callback: &InboundCallback, context: &CallbackContext) -> CallbackDisposition {
        if context.kind == OperationKind::CreateDaily {
            log::info!("daily note for {} created", context.date);
            return CallbackDisposition::Handled;
        }

        let (Some(content), Some(note_id)) = (callback.params.get("note"), callback.param("identifier")) else {
            log::warn!(
                "dropping {}: reply lacks note or identifier",
                callback.host.as_str()
            );
            return CallbackDisposition::Dropped;
        };

        let date = context.date.as_str();
        let result = match context.kind {
            OperationKind::OpenHome => {
                self.orchestrator
                    .apply_home_note_content(date, note_id, content)
                    .await
            }
            OperationKind::SyncDate => {
                self.orchestrator
                    .apply_daily_note_content(date, note_id, content, Presentation::HIDDEN)
                    .await
            }
            _ => {
                let applied = self
                    .orchestrator
                    .apply_daily_note_content(date, note_id, content, Presentation::SHOWN)
                    .await;
                self.orchestrator.refresh_home_if_today(date).await;
                applied
            }
        };
        finish(callback, result)
    }

    async fn on_failure(&self, callback: &InboundCallback, context: &CallbackContext) -> CallbackDisposition {
        let date = context.date.as_str();
        match context.kind {
            OperationKind::OpenDaily | OperationKind::UpdateDaily => {
                log::info!("daily note for {date} not found; creating it");
                let result = self.orchestrator.create_daily_note_then_open(date).await;
                finish(callback, result)
            }
            OperationKind::OpenHome => {
                log::warn!(
                    "home note {} could not be fetched",
                    context.note_id.as_deref().unwrap_or("(unknown)")
                );
                CallbackDisposition::Handled
            }
            OperationKind::SyncDate => {
                log::info!("no daily note for {date}; sync skips it");
                CallbackDisposition::Handled
            }
            OperationKind::CreateDaily => {
                log::error!(
                    "creating the daily note for {date} failed: {}",
                    callback.param("errorMessage").unwrap_or("no details")
                );
                CallbackDisposition::Handled
            }
            OperationKind::Search => CallbackDisposition::Ignored,
        }
    }
}

fn finish<T>(callback: &InboundCallback, result: Result<T, BridgeError>) -> CallbackDisposition {
    match result {
        Ok(_) => CallbackDisposition::Handled,
        Err(error) => {
            log::error!("follow-up for {} failed: {error}", callback.host.as_str());
            CallbackDisposition::Dropped
        }
    }
}
