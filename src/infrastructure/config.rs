use crate::domain::models::{Settings, Template};
use crate::infrastructure::error::BridgeError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_JSON: &str = "settings.json";
const TEMPLATES_JSON: &str = "templates.json";
const CALENDAR_EVENTS_JSON: &str = "calendarEvents.json";
const SCHEMA_VERSION: u64 = 1;

fn default_files() -> Result<HashMap<&'static str, serde_json::Value>, BridgeError> {
    Ok(HashMap::from([
        (SETTINGS_JSON, with_schema(serde_json::to_value(Settings::default())?)?),
        (
            TEMPLATES_JSON,
            serde_json::json!({
                "schema": SCHEMA_VERSION,
                "templates": []
            }),
        ),
    ]))
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), BridgeError> {
    for (name, value) in default_files()? {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

pub fn calendar_events_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CALENDAR_EVENTS_JSON)
}

pub(crate) fn read_config(path: &Path) -> Result<serde_json::Value, BridgeError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| BridgeError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SCHEMA_VERSION {
        return Err(BridgeError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), BridgeError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn with_schema(mut value: serde_json::Value) -> Result<serde_json::Value, BridgeError> {
    let object = value
        .as_object_mut()
        .ok_or_else(|| BridgeError::InvalidConfig("config root must be an object".to_string()))?;
    object.insert("schema".to_string(), serde_json::json!(SCHEMA_VERSION));
    Ok(value)
}

pub fn load_settings(config_dir: &Path) -> Result<Settings, BridgeError> {
    let path = config_dir.join(SETTINGS_JSON);
    let settings: Settings = serde_json::from_value(read_config(&path)?)?;
    settings
        .validate()
        .map_err(|error| BridgeError::InvalidConfig(format!("{error} in {}", path.display())))?;
    Ok(settings)
}

/// Loads templates, creating the default daily template when none is flagged
/// and saving the repaired list.
pub fn load_templates(config_dir: &Path) -> Result<Vec<Template>, BridgeError> {
    let path = config_dir.join(TEMPLATES_JSON);
    let config = read_config(&path)?;
    let templates: Vec<Template> = match config.get("templates") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => Vec::new(),
    };
    for template in &templates {
        template
            .validate()
            .map_err(|error| BridgeError::InvalidConfig(format!("{error} in {}", path.display())))?;
    }

    let (templates, repaired) = ensure_single_daily(templates);
    if repaired {
        save_templates(config_dir, &templates)?;
    }
    Ok(templates)
}

pub fn save_templates(config_dir: &Path, templates: &[Template]) -> Result<(), BridgeError> {
    let value = serde_json::json!({
        "schema": SCHEMA_VERSION,
        "templates": templates,
    });
    write_config(&config_dir.join(TEMPLATES_JSON), &value)
}

pub fn ensure_single_daily(mut templates: Vec<Template>) -> (Vec<Template>, bool) {
    let mut seen_daily = false;
    let mut repaired = false;
    for template in templates.iter_mut().filter(|template| template.is_daily) {
        if seen_daily {
            log::warn!("template '{}' unflagged as daily; only one daily template is kept", template.name);
            template.is_daily = false;
            repaired = true;
        }
        seen_daily = true;
    }
    if !seen_daily {
        log::info!("no daily template found; creating the default Daily template");
        templates.push(Template::default_daily());
        repaired = true;
    }
    (templates, repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::LeftClickAction;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_written_once_and_load() {
        let dir = TempDir::new().expect("temp dir");
        ensure_default_configs(dir.path()).expect("write defaults");

        let settings = load_settings(dir.path()).expect("load settings");
        assert_eq!(settings, Settings::default());

        fs::write(
            dir.path().join(SETTINGS_JSON),
            "{\"schema\": 1, \"homeNoteId\": \"HOME-1\", \"defaultAction\": \"home\"}",
        )
        .expect("write settings");
        ensure_default_configs(dir.path()).expect("defaults do not overwrite");

        let reloaded = load_settings(dir.path()).expect("reload settings");
        assert_eq!(reloaded.home_note_id(), Some("HOME-1"));
        assert_eq!(reloaded.default_action, LeftClickAction::Home);
    }

    #[test]
    fn missing_schema_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join(SETTINGS_JSON), "{\"homeNoteId\": \"x\"}").expect("write");
        let error = load_settings(dir.path()).expect_err("schema required");
        assert!(matches!(error, BridgeError::InvalidConfig(message) if message.contains("missing schema")));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(
            dir.path().join(SETTINGS_JSON),
            "{\"schema\": 1, \"dateFormat\": \"dd.MM.yyyy\"}",
        )
        .expect("write");
        assert!(matches!(load_settings(dir.path()), Err(BridgeError::InvalidConfig(_))));
    }

    #[test]
    fn daily_template_is_created_lazily_and_persisted() {
        let dir = TempDir::new().expect("temp dir");
        ensure_default_configs(dir.path()).expect("write defaults");

        let first = load_templates(dir.path()).expect("load templates");
        assert_eq!(first.len(), 1);
        assert!(first[0].is_daily);

        let second = load_templates(dir.path()).expect("reload templates");
        assert_eq!(second, first);
    }

    #[test]
    fn only_first_daily_template_keeps_the_flag() {
        let templates = vec![
            Template::new("Meeting", "# Meeting", "meetings", false),
            Template::new("Daily", "# %date()%", "daily", true),
            Template::new("Daily copy", "# copy", "daily", true),
        ];
        let (repaired, changed) = ensure_single_daily(templates);
        assert!(changed);
        assert_eq!(repaired.iter().filter(|template| template.is_daily).count(), 1);
        assert!(repaired[1].is_daily);
        assert!(!repaired[2].is_daily);
    }

    #[test]
    fn well_formed_templates_are_left_alone() {
        let templates = vec![Template::new("Daily", "# %date()%", "daily", true)];
        let (unchanged, changed) = ensure_single_daily(templates.clone());
        assert!(!changed);
        assert_eq!(unchanged, templates);
    }
}
