use crate::application::bootstrap::bootstrap_workspace;
use crate::application::callback_router::{CallbackDisposition, CallbackRouter};
use crate::application::note_orchestrator::{NoteOrchestrator, OperationOutcome};
use crate::domain::dates::{format_date, parse_date};
use crate::infrastructure::calendar_store::{CalendarInfo, CalendarStore, JsonFileCalendarStore};
use crate::infrastructure::config::{calendar_events_path, load_settings, load_templates};
use crate::infrastructure::error::BridgeError;
use crate::infrastructure::url_dispatcher::{SystemUrlDispatcher, UrlDispatcher};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Services built once per process and shared by every command.
pub struct AppState<S = JsonFileCalendarStore, D = SystemUrlDispatcher>
where
    S: CalendarStore,
    D: UrlDispatcher,
{
    logs_dir: PathBuf,
    store: Arc<S>,
    orchestrator: Arc<NoteOrchestrator<S, D>>,
    router: CallbackRouter<S, D>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, BridgeError> {
        let store = Arc::new(JsonFileCalendarStore::new(calendar_events_path(
            &workspace_root.join("config"),
        )));
        Self::with_services(workspace_root, store, Arc::new(SystemUrlDispatcher))
    }
}

impl<S, D> AppState<S, D>
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    pub fn with_services(
        workspace_root: PathBuf,
        store: Arc<S>,
        dispatcher: Arc<D>,
    ) -> Result<Self, BridgeError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let settings = load_settings(&bootstrap.config_dir)?;
        let templates = load_templates(&bootstrap.config_dir)?;
        let orchestrator = Arc::new(NoteOrchestrator::new(
            settings,
            templates,
            Arc::clone(&store),
            dispatcher,
        )?);

        Ok(Self {
            logs_dir: bootstrap.logs_dir,
            store,
            router: CallbackRouter::new(Arc::clone(&orchestrator)),
            orchestrator,
            log_guard: Mutex::new(()),
        })
    }

    pub fn orchestrator(&self) -> &NoteOrchestrator<S, D> {
        &self.orchestrator
    }

    pub fn router(&self) -> &CallbackRouter<S, D> {
        &self.router
    }

    pub fn command_error(&self, command: &str, error: &BridgeError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        log::info!("{command}: {message}");
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        log::error!("{command}: {message}");
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(mut file) => {
                if let Err(error) = writeln!(file, "{payload}") {
                    log::warn!("failed to write {}: {error}", path.display());
                }
            }
            Err(error) => log::warn!("failed to open {}: {error}", path.display()),
        }
    }

    fn resolve_date(&self, date: Option<String>) -> Result<String, BridgeError> {
        match date {
            Some(value) => parse_date(&value)
                .map(format_date)
                .map_err(BridgeError::InvalidDate),
            None => Ok(self.orchestrator.today_string()),
        }
    }
}

pub async fn open_home_impl<S, D>(state: &AppState<S, D>) -> Result<OperationOutcome, BridgeError>
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    state.orchestrator.open_home_note().await
}

pub async fn open_daily_impl<S, D>(
    state: &AppState<S, D>,
    date: Option<String>,
) -> Result<OperationOutcome, BridgeError>
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    let date = state.resolve_date(date)?;
    state.orchestrator.open_daily_note(&date).await
}

pub async fn sync_calendar_impl<S, D>(
    state: &AppState<S, D>,
    date: Option<String>,
) -> Result<OperationOutcome, BridgeError>
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    let date = state.resolve_date(date)?;
    let center = parse_date(&date).map_err(BridgeError::InvalidDate)?;
    state.orchestrator.sync_calendar_range(center).await
}

pub async fn ensure_daily_impl<S, D>(
    state: &AppState<S, D>,
    date: Option<String>,
) -> Result<OperationOutcome, BridgeError>
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    let date = state.resolve_date(date)?;
    state.orchestrator.ensure_daily_note(&date).await
}

pub async fn create_from_template_impl<S, D>(
    state: &AppState<S, D>,
    name: &str,
    date: Option<String>,
) -> Result<OperationOutcome, BridgeError>
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    let date = state.resolve_date(date)?;
    state.orchestrator.create_note_from_template(name, &date).await
}

pub async fn default_action_impl<S, D>(state: &AppState<S, D>) -> Result<OperationOutcome, BridgeError>
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    state.orchestrator.run_default_action().await
}

/// Calendars in the store, each marked when it is in `selectedCalendarIds`.
pub fn list_calendars_impl<S, D>(state: &AppState<S, D>) -> Result<Vec<(CalendarInfo, bool)>, BridgeError>
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    let selected = &state.orchestrator.settings().selected_calendar_ids;
    Ok(state
        .store
        .calendars()?
        .into_iter()
        .map(|calendar| {
            let is_selected = selected.contains(&calendar.id);
            (calendar, is_selected)
        })
        .collect())
}

pub async fn handle_callback_impl<S, D>(state: &AppState<S, D>, url: &str) -> CallbackDisposition
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    state.router.handle(url).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::calendar_store::InMemoryCalendarStore;
    use crate::infrastructure::url_dispatcher::RecordingUrlDispatcher;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_state(root: &Path) -> (AppState<InMemoryCalendarStore, RecordingUrlDispatcher>, Arc<RecordingUrlDispatcher>) {
        let dispatcher = Arc::new(RecordingUrlDispatcher::default());
        let state = AppState::with_services(
            root.to_path_buf(),
            Arc::new(InMemoryCalendarStore::default()),
            Arc::clone(&dispatcher),
        )
        .expect("app state");
        (state, dispatcher)
    }

    #[tokio::test]
    async fn open_daily_with_explicit_date_dispatches_fetch() {
        let dir = TempDir::new().expect("temp dir");
        let (state, dispatcher) = test_state(dir.path());

        let outcome = open_daily_impl(&state, Some("2024-06-15".to_string()))
            .await
            .expect("open daily");
        assert_eq!(outcome, OperationOutcome::Dispatched { requests: 1 });
        assert_eq!(dispatcher.dispatched().len(), 1);
    }

    #[tokio::test]
    async fn invalid_date_is_reported_and_logged() {
        let dir = TempDir::new().expect("temp dir");
        let (state, dispatcher) = test_state(dir.path());

        let error = sync_calendar_impl(&state, Some("tomorrow".to_string()))
            .await
            .expect_err("invalid date");
        let message = state.command_error("sync", &error);
        assert!(message.contains("tomorrow"));
        assert!(dispatcher.dispatched().is_empty());

        let log = fs::read_to_string(dir.path().join("logs").join("commands.log")).expect("log");
        let entry: serde_json::Value = serde_json::from_str(log.lines().last().expect("line")).expect("json");
        assert_eq!(entry["level"], "error");
        assert_eq!(entry["command"], "sync");
    }

    #[test]
    fn calendars_are_listed_with_selection() {
        let dir = TempDir::new().expect("temp dir");
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).expect("config dir");
        fs::write(
            config_dir.join("settings.json"),
            "{\"schema\": 1, \"selectedCalendarIds\": [\"work\"]}",
        )
        .expect("write settings");
        let store = InMemoryCalendarStore::default();
        store.add_calendar("work", "Work").expect("calendar");
        store.add_calendar("home", "Home").expect("calendar");
        let state = AppState::with_services(
            dir.path().to_path_buf(),
            Arc::new(store),
            Arc::new(RecordingUrlDispatcher::default()),
        )
        .expect("app state");

        let listed = list_calendars_impl(&state).expect("calendars");
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|(calendar, selected)| calendar.id == "work" && *selected));
        assert!(listed.iter().any(|(calendar, selected)| calendar.id == "home" && !*selected));
    }

    #[tokio::test]
    async fn callback_command_routes_through_router() {
        let dir = TempDir::new().expect("temp dir");
        let (state, dispatcher) = test_state(dir.path());

        let disposition =
            handle_callback_impl(&state, "fodabear://open-daily-note-error?date=2024-06-15").await;
        assert_eq!(disposition, CallbackDisposition::Handled);
        assert_eq!(dispatcher.dispatched().len(), 2);
    }
}
