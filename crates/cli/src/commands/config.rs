use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use comanda_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

pub fn run(json: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    if json {
        let rendered = serde_json::to_string_pretty(&config.redacted())
            .unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}"));
        return CommandResult { exit_code: 0, output: rendered };
    }

    CommandResult { exit_code: 0, output: render(&config) }
}

/// One line per setting with where its value came from. Secrets only show
/// whether they are set.
pub fn render(config: &AppConfig) -> String {
    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let redacted = config.redacted();

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_key) in SETTINGS {
        let value = lookup(&redacted, key_path);
        let source =
            field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }
    lines.join("\n")
}

const SETTINGS: &[(&str, &str)] = &[
    ("database.url", "COMANDA_DATABASE_URL"),
    ("database.max_connections", "COMANDA_DATABASE_MAX_CONNECTIONS"),
    ("database.timeout_secs", "COMANDA_DATABASE_TIMEOUT_SECS"),
    ("llm.enabled", "COMANDA_LLM_ENABLED"),
    ("llm.provider", "COMANDA_LLM_PROVIDER"),
    ("llm.api_key", "COMANDA_LLM_API_KEY"),
    ("llm.base_url", "COMANDA_LLM_BASE_URL"),
    ("llm.model", "COMANDA_LLM_MODEL"),
    ("llm.timeout_secs", "COMANDA_LLM_TIMEOUT_SECS"),
    ("llm.min_confidence", "COMANDA_LLM_MIN_CONFIDENCE"),
    ("catalog.base_url", "COMANDA_CATALOG_BASE_URL"),
    ("catalog.timeout_secs", "COMANDA_CATALOG_TIMEOUT_SECS"),
    ("catalog.ambiguity_margin", "COMANDA_CATALOG_AMBIGUITY_MARGIN"),
    ("geocoding.base_url", "COMANDA_GEOCODING_BASE_URL"),
    ("geocoding.api_key", "COMANDA_GEOCODING_API_KEY"),
    ("geocoding.timeout_secs", "COMANDA_GEOCODING_TIMEOUT_SECS"),
    ("geocoding.max_candidates", "COMANDA_GEOCODING_MAX_CANDIDATES"),
    ("checkout.base_url", "COMANDA_CHECKOUT_BASE_URL"),
    ("checkout.api_key", "COMANDA_CHECKOUT_API_KEY"),
    ("checkout.timeout_secs", "COMANDA_CHECKOUT_TIMEOUT_SECS"),
    ("dialogue.idle_timeout_mins", "COMANDA_DIALOGUE_IDLE_TIMEOUT_MINS"),
    ("dialogue.history_limit", "COMANDA_DIALOGUE_HISTORY_LIMIT"),
    ("dialogue.max_item_quantity", "COMANDA_DIALOGUE_MAX_ITEM_QUANTITY"),
    ("dialogue.payment_tolerance", "COMANDA_DIALOGUE_PAYMENT_TOLERANCE"),
    ("dialogue.delivery_fee", "COMANDA_DIALOGUE_DELIVERY_FEE"),
    ("dialogue.currency_symbol", "COMANDA_DIALOGUE_CURRENCY_SYMBOL"),
    ("server.bind_address", "COMANDA_SERVER_BIND_ADDRESS"),
    ("server.port", "COMANDA_SERVER_PORT"),
    ("server.graceful_shutdown_secs", "COMANDA_SERVER_GRACEFUL_SHUTDOWN_SECS"),
    ("logging.level", "COMANDA_LOGGING_LEVEL"),
    ("logging.format", "COMANDA_LOGGING_FORMAT"),
];

fn lookup(redacted: &serde_json::Value, key_path: &str) -> String {
    let mut current = redacted;
    for key in key_path.split('.') {
        match current.get(key) {
            Some(next) => current = next,
            None => return "<unset>".to_string(),
        }
    }
    match current {
        serde_json::Value::Null => "<unset>".to_string(),
        serde_json::Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("comanda.toml"), PathBuf::from("config/comanda.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
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
