use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use vouchy_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// Validates the effective configuration; with `effective` set, prints every
/// field with the source it resolved from.
pub fn run(effective: bool) -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();

    if !effective {
        return match &config_file_path {
            Some(path) => format!("configuration valid (config file: {})", path.display()),
            None => "configuration valid (no config file; defaults and environment only)"
                .to_string(),
        };
    }

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        field_source(
            "database.url",
            Some("VOUCHY_DATABASE_URL"),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        field_source(
            "database.max_connections",
            Some("VOUCHY_DATABASE_MAX_CONNECTIONS"),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        field_source(
            "database.timeout_secs",
            Some("VOUCHY_DATABASE_TIMEOUT_SECS"),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        logging_field_source(
            "logging.level",
            &["VOUCHY_LOGGING_LEVEL", "VOUCHY_LOG_LEVEL"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        logging_field_source(
            "logging.format",
            &["VOUCHY_LOGGING_FORMAT", "VOUCHY_LOG_FORMAT"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("vouchy.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/vouchy.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

// The logging keys accept a short alias; whichever is set wins.
fn logging_field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    for env_key in env_keys {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    field_source(key_path, None, config_file_doc, config_file_path)
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
