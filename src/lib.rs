pub mod application;
pub mod domain;
pub mod infrastructure;

use application::callback_router::CallbackDisposition;
use application::commands::{
    create_from_template_impl, default_action_impl, ensure_daily_impl, handle_callback_impl,
    list_calendars_impl, open_daily_impl, open_home_impl, sync_calendar_impl,
};
use application::note_orchestrator::OperationOutcome;
use infrastructure::calendar_store::CalendarStore;
use infrastructure::error::BridgeError;
use infrastructure::url_dispatcher::UrlDispatcher;
use std::path::PathBuf;

pub use application::commands::AppState;

pub const WORKSPACE_ENV: &str = "BEARHELPER_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Home,
    Daily { date: Option<String> },
    Sync { date: Option<String> },
    EnsureDaily { date: Option<String> },
    Template { name: String, date: Option<String> },
    DefaultAction,
    Calendars,
    Callback { url: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Daily { .. } => "daily",
            Self::Sync { .. } => "sync",
            Self::EnsureDaily { .. } => "ensure_daily",
            Self::Template { .. } => "template",
            Self::DefaultAction => "default_action",
            Self::Calendars => "calendars",
            Self::Callback { .. } => "callback",
        }
    }
}

/// `$BEARHELPER_HOME` when set, otherwise the current directory.
pub fn default_workspace_root() -> Result<PathBuf, BridgeError> {
    match std::env::var_os(WORKSPACE_ENV) {
        Some(root) if !root.is_empty() => Ok(PathBuf::from(root)),
        _ => Ok(std::env::current_dir()?),
    }
}

pub async fn run_command<S, D>(state: &AppState<S, D>, command: Command) -> Result<String, String>
where
    S: CalendarStore + 'static,
    D: UrlDispatcher + 'static,
{
    let name = command.name();
    let result = match command {
        Command::Home => open_home_impl(state).await,
        Command::Daily { date } => open_daily_impl(state, date).await,
        Command::Sync { date } => sync_calendar_impl(state, date).await,
        Command::EnsureDaily { date } => ensure_daily_impl(state, date).await,
        Command::Template { name, date } => create_from_template_impl(state, &name, date).await,
        Command::DefaultAction => default_action_impl(state).await,
        Command::Calendars => {
            return match list_calendars_impl(state) {
                Ok(calendars) => {
                    state.log_info(name, &format!("listed {} calendars", calendars.len()));
                    Ok(calendars
                        .iter()
                        .map(|(calendar, selected)| {
                            let marker = if *selected { '*' } else { ' ' };
                            format!("{marker} {}\t{}", calendar.id, calendar.title)
                        })
                        .collect::<Vec<_>>()
                        .join("\n"))
                }
                Err(error) => Err(state.command_error(name, &error)),
            };
        }
        Command::Callback { url } => {
            let disposition = handle_callback_impl(state, &url).await;
            let message = describe_disposition(disposition);
            state.log_info(name, message);
            return Ok(message.to_string());
        }
    };

    match result {
        Ok(outcome) => {
            let message = describe_outcome(&outcome);
            state.log_info(name, &message);
            Ok(message)
        }
        Err(error) => Err(state.command_error(name, &error)),
    }
}

fn describe_outcome(outcome: &OperationOutcome) -> String {
    match outcome {
        OperationOutcome::Dispatched { requests: 1 } => "dispatched 1 request".to_string(),
        OperationOutcome::Dispatched { requests } => format!("dispatched {requests} requests"),
        OperationOutcome::Skipped(reason) => format!("skipped: {reason}"),
    }
}

fn describe_disposition(disposition: CallbackDisposition) -> &'static str {
    match disposition {
        CallbackDisposition::Ignored => "callback ignored",
        CallbackDisposition::Dropped => "callback dropped",
        CallbackDisposition::Handled => "callback handled",
        CallbackDisposition::Delivered => "callback delivered",
    }
}
