use crate::infrastructure::config::{ensure_default_configs, load_settings, load_templates};
use crate::infrastructure::error::BridgeError;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BootstrapResult {
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
}

/// Creates `config/` and `logs/`, writes missing default configs and checks
/// that both config files load.
pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, BridgeError> {
    let config_dir = workspace_root.join("config");
    let logs_dir = workspace_root.join("logs");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    load_settings(&config_dir)?;
    load_templates(&config_dir)?;

    Ok(BootstrapResult {
        config_dir,
        logs_dir,
    })
}
