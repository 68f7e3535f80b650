use bearhelper::{default_workspace_root, run_command, AppState, Command};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "bearhelper")]
#[command(about = "Bear daily notes, home note and calendar sections over x-callback-url", long_about = None)]
#[command(version)]
struct Cli {
    /// Workspace root holding config/ and logs/ (default: $BEARHELPER_HOME or the current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the home note and refresh its daily link and calendar section
    Home,

    /// Open the daily note, creating it from the Daily template when missing
    Daily {
        /// Day as yyyy-MM-dd (default: today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Refresh calendar sections of daily notes from 7 days before to 7 days after
    Sync {
        /// Center day as yyyy-MM-dd (default: today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Search for the daily note and create or refresh it. Callback URLs read
    /// from stdin are routed while the search waits.
    EnsureDaily {
        /// Day as yyyy-MM-dd (default: today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Create a note from a named template
    Template {
        name: String,

        /// Reference day for %date()% macros (default: today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Run the configured left-click action
    DefaultAction,

    /// List calendars from calendarEvents.json; selected ones are starred
    Calendars,

    /// Handle a callback URL delivered by Bear
    Callback { url: String },
}

impl From<Commands> for Command {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Home => Command::Home,
            Commands::Daily { date } => Command::Daily { date },
            Commands::Sync { date } => Command::Sync { date },
            Commands::EnsureDaily { date } => Command::EnsureDaily { date },
            Commands::Template { name, date } => Command::Template { name, date },
            Commands::DefaultAction => Command::DefaultAction,
            Commands::Calendars => Command::Calendars,
            Commands::Callback { url } => Command::Callback { url },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let workspace_root = match cli.root.map(Ok).unwrap_or_else(default_workspace_root) {
        Ok(root) => root,
        Err(error) => {
            log::error!("failed to resolve workspace root: {error}");
            return ExitCode::FAILURE;
        }
    };
    let state = match AppState::new(workspace_root) {
        Ok(state) => Arc::new(state),
        Err(error) => {
            log::error!("failed to initialize app state: {error}");
            return ExitCode::FAILURE;
        }
    };

    let command = Command::from(cli.command);
    if matches!(command, Command::EnsureDaily { .. }) {
        forward_stdin_callbacks(Arc::clone(&state));
    }

    match run_command(&state, command).await {
        Ok(message) => {
            println!("{message}");
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

/// Routes callback URLs piped on stdin. Stdin is read on a plain thread the
/// runtime never waits on.
fn forward_stdin_callbacks(state: Arc<AppState>) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    if sender.send(line).is_err() {
                        break;
                    }
                }
                Err(error) => {
                    log::warn!("stopped reading callbacks from stdin: {error}");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(line) = receiver.recv().await {
            let disposition = state.router().handle(&line).await;
            log::debug!("stdin callback: {disposition:?}");
        }
    });
}
