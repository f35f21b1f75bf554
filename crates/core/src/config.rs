use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub catalog: CatalogConfig,
    pub geocoding: GeocodingConfig,
    pub checkout: CheckoutConfig,
    pub dialogue: DialogueConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// Guesses below this confidence are treated as unknown.
    pub min_confidence: f32,
}

#[derive(Clone, Debug)]
pub struct CatalogConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub synonyms: BTreeMap<String, String>,
    pub ambiguity_margin: f64,
}

#[derive(Clone, Debug)]
pub struct GeocodingConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub max_candidates: usize,
}

#[derive(Clone, Debug)]
pub struct CheckoutConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DialogueConfig {
    pub idle_timeout_mins: u64,
    pub history_limit: usize,
    pub max_item_quantity: u32,
    /// Absolute difference accepted between allocated payments and the total.
    pub payment_tolerance: Decimal,
    pub delivery_fee: Decimal,
    pub currency_symbol: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_enabled: Option<bool>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://comanda.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                enabled: false,
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 8,
                min_confidence: 0.6,
            },
            catalog: CatalogConfig {
                base_url: None,
                timeout_secs: 5,
                synonyms: BTreeMap::new(),
                ambiguity_margin: 0.08,
            },
            geocoding: GeocodingConfig {
                base_url: None,
                api_key: None,
                timeout_secs: 5,
                max_candidates: 5,
            },
            checkout: CheckoutConfig { base_url: None, api_key: None, timeout_secs: 10 },
            dialogue: DialogueConfig {
                idle_timeout_mins: 60,
                history_limit: 50,
                max_item_quantity: 50,
                payment_tolerance: Decimal::ZERO,
                delivery_fee: Decimal::new(700, 2),
                currency_symbol: "R$".to_string(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("comanda.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(enabled) = llm.enabled {
                self.llm.enabled = enabled;
            }
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(min_confidence) = llm.min_confidence {
                self.llm.min_confidence = min_confidence;
            }
        }

        if let Some(catalog) = patch.catalog {
            if let Some(base_url) = catalog.base_url {
                self.catalog.base_url = Some(base_url);
            }
            if let Some(timeout_secs) = catalog.timeout_secs {
                self.catalog.timeout_secs = timeout_secs;
            }
            if let Some(synonyms) = catalog.synonyms {
                self.catalog.synonyms.extend(synonyms);
            }
            if let Some(ambiguity_margin) = catalog.ambiguity_margin {
                self.catalog.ambiguity_margin = ambiguity_margin;
            }
        }

        if let Some(geocoding) = patch.geocoding {
            if let Some(base_url) = geocoding.base_url {
                self.geocoding.base_url = Some(base_url);
            }
            if let Some(geocoding_api_key_value) = geocoding.api_key {
                self.geocoding.api_key = Some(secret_value(geocoding_api_key_value));
            }
            if let Some(timeout_secs) = geocoding.timeout_secs {
                self.geocoding.timeout_secs = timeout_secs;
            }
            if let Some(max_candidates) = geocoding.max_candidates {
                self.geocoding.max_candidates = max_candidates;
            }
        }

        if let Some(checkout) = patch.checkout {
            if let Some(base_url) = checkout.base_url {
                self.checkout.base_url = Some(base_url);
            }
            if let Some(checkout_api_key_value) = checkout.api_key {
                self.checkout.api_key = Some(secret_value(checkout_api_key_value));
            }
            if let Some(timeout_secs) = checkout.timeout_secs {
                self.checkout.timeout_secs = timeout_secs;
            }
        }

        if let Some(dialogue) = patch.dialogue {
            if let Some(idle_timeout_mins) = dialogue.idle_timeout_mins {
                self.dialogue.idle_timeout_mins = idle_timeout_mins;
            }
            if let Some(history_limit) = dialogue.history_limit {
                self.dialogue.history_limit = history_limit;
            }
            if let Some(max_item_quantity) = dialogue.max_item_quantity {
                self.dialogue.max_item_quantity = max_item_quantity;
            }
            if let Some(payment_tolerance) = dialogue.payment_tolerance {
                self.dialogue.payment_tolerance =
                    parse_decimal("dialogue.payment_tolerance", &payment_tolerance)?;
            }
            if let Some(delivery_fee) = dialogue.delivery_fee {
                self.dialogue.delivery_fee = parse_decimal("dialogue.delivery_fee", &delivery_fee)?;
            }
            if let Some(currency_symbol) = dialogue.currency_symbol {
                self.dialogue.currency_symbol = currency_symbol;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COMANDA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COMANDA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("COMANDA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COMANDA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("COMANDA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COMANDA_LLM_ENABLED") {
            self.llm.enabled = parse_env("COMANDA_LLM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("COMANDA_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("COMANDA_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("COMANDA_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("COMANDA_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("COMANDA_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("COMANDA_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("COMANDA_LLM_MIN_CONFIDENCE") {
            self.llm.min_confidence = parse_env("COMANDA_LLM_MIN_CONFIDENCE", &value)?;
        }

        if let Some(value) = read_env("COMANDA_CATALOG_BASE_URL") {
            self.catalog.base_url = Some(value);
        }
        if let Some(value) = read_env("COMANDA_CATALOG_TIMEOUT_SECS") {
            self.catalog.timeout_secs = parse_env("COMANDA_CATALOG_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("COMANDA_CATALOG_AMBIGUITY_MARGIN") {
            self.catalog.ambiguity_margin = parse_env("COMANDA_CATALOG_AMBIGUITY_MARGIN", &value)?;
        }

        if let Some(value) = read_env("COMANDA_GEOCODING_BASE_URL") {
            self.geocoding.base_url = Some(value);
        }
        if let Some(value) = read_env("COMANDA_GEOCODING_API_KEY") {
            self.geocoding.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("COMANDA_GEOCODING_TIMEOUT_SECS") {
            self.geocoding.timeout_secs = parse_env("COMANDA_GEOCODING_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("COMANDA_GEOCODING_MAX_CANDIDATES") {
            self.geocoding.max_candidates = parse_env("COMANDA_GEOCODING_MAX_CANDIDATES", &value)?;
        }

        if let Some(value) = read_env("COMANDA_CHECKOUT_BASE_URL") {
            self.checkout.base_url = Some(value);
        }
        if let Some(value) = read_env("COMANDA_CHECKOUT_API_KEY") {
            self.checkout.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("COMANDA_CHECKOUT_TIMEOUT_SECS") {
            self.checkout.timeout_secs = parse_env("COMANDA_CHECKOUT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COMANDA_DIALOGUE_IDLE_TIMEOUT_MINS") {
            self.dialogue.idle_timeout_mins =
                parse_env("COMANDA_DIALOGUE_IDLE_TIMEOUT_MINS", &value)?;
        }
        if let Some(value) = read_env("COMANDA_DIALOGUE_HISTORY_LIMIT") {
            self.dialogue.history_limit = parse_env("COMANDA_DIALOGUE_HISTORY_LIMIT", &value)?;
        }
        if let Some(value) = read_env("COMANDA_DIALOGUE_MAX_ITEM_QUANTITY") {
            self.dialogue.max_item_quantity =
                parse_env("COMANDA_DIALOGUE_MAX_ITEM_QUANTITY", &value)?;
        }
        if let Some(value) = read_env("COMANDA_DIALOGUE_PAYMENT_TOLERANCE") {
            self.dialogue.payment_tolerance =
                parse_env("COMANDA_DIALOGUE_PAYMENT_TOLERANCE", &value)?;
        }
        if let Some(value) = read_env("COMANDA_DIALOGUE_DELIVERY_FEE") {
            self.dialogue.delivery_fee = parse_env("COMANDA_DIALOGUE_DELIVERY_FEE", &value)?;
        }
        if let Some(value) = read_env("COMANDA_DIALOGUE_CURRENCY_SYMBOL") {
            self.dialogue.currency_symbol = value;
        }

        if let Some(value) = read_env("COMANDA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("COMANDA_SERVER_PORT") {
            self.server.port = parse_env("COMANDA_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("COMANDA_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("COMANDA_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("COMANDA_LOGGING_LEVEL").or_else(|| read_env("COMANDA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COMANDA_LOGGING_FORMAT").or_else(|| read_env("COMANDA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_catalog(&self.catalog)?;
        validate_geocoding(&self.geocoding)?;
        validate_checkout(&self.checkout)?;
        validate_dialogue(&self.dialogue)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }

    /// Effective configuration as JSON with every secret replaced by a marker.
    pub fn redacted(&self) -> serde_json::Value {
        serde_json::json!({
            "database": {
                "url": self.database.url,
                "max_connections": self.database.max_connections,
                "timeout_secs": self.database.timeout_secs,
            },
            "llm": {
                "enabled": self.llm.enabled,
                "provider": self.llm.provider.as_str(),
                "api_key": redact(self.llm.api_key.as_ref()),
                "base_url": self.llm.base_url,
                "model": self.llm.model,
                "timeout_secs": self.llm.timeout_secs,
                "min_confidence": self.llm.min_confidence,
            },
            "catalog": {
                "base_url": self.catalog.base_url,
                "timeout_secs": self.catalog.timeout_secs,
                "synonyms": self.catalog.synonyms,
                "ambiguity_margin": self.catalog.ambiguity_margin,
            },
            "geocoding": {
                "base_url": self.geocoding.base_url,
                "api_key": redact(self.geocoding.api_key.as_ref()),
                "timeout_secs": self.geocoding.timeout_secs,
                "max_candidates": self.geocoding.max_candidates,
            },
            "checkout": {
                "base_url": self.checkout.base_url,
                "api_key": redact(self.checkout.api_key.as_ref()),
                "timeout_secs": self.checkout.timeout_secs,
            },
            "dialogue": {
                "idle_timeout_mins": self.dialogue.idle_timeout_mins,
                "history_limit": self.dialogue.history_limit,
                "max_item_quantity": self.dialogue.max_item_quantity,
                "payment_tolerance": self.dialogue.payment_tolerance.to_string(),
                "delivery_fee": self.dialogue.delivery_fee.to_string(),
                "currency_symbol": self.dialogue.currency_symbol,
            },
            "server": {
                "bind_address": self.server.bind_address,
                "port": self.server.port,
                "graceful_shutdown_secs": self.server.graceful_shutdown_secs,
            },
            "logging": {
                "level": self.logging.level,
                "format": self.logging.format.as_str(),
            },
        })
    }
}

fn redact(secret: Option<&SecretString>) -> Option<&'static str> {
    secret.filter(|value| !value.expose_secret().is_empty()).map(|_| "<redacted>")
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("comanda.toml"), PathBuf::from("config/comanda.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&llm.min_confidence) {
        return Err(ConfigError::Validation(
            "llm.min_confidence must be in range 0.0..=1.0".to_string(),
        ));
    }
    if !llm.enabled {
        return Ok(());
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers (set COMANDA_LLM_API_KEY)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    validate_http_url("llm.base_url", llm.base_url.as_deref())
}

fn validate_catalog(catalog: &CatalogConfig) -> Result<(), ConfigError> {
    validate_http_url("catalog.base_url", catalog.base_url.as_deref())?;
    validate_timeout("catalog.timeout_secs", catalog.timeout_secs)?;
    if !(0.0..=1.0).contains(&catalog.ambiguity_margin) {
        return Err(ConfigError::Validation(
            "catalog.ambiguity_margin must be in range 0.0..=1.0".to_string(),
        ));
    }
    let blank_entry = |(term, canonical): &(&String, &String)| {
        term.trim().is_empty() || canonical.trim().is_empty()
    };
    if let Some((term, _)) = catalog.synonyms.iter().find(blank_entry) {
        return Err(ConfigError::Validation(format!(
            "catalog.synonyms entry `{term}` must map a non-empty term to a non-empty canonical term"
        )));
    }
    Ok(())
}

fn validate_geocoding(geocoding: &GeocodingConfig) -> Result<(), ConfigError> {
    validate_http_url("geocoding.base_url", geocoding.base_url.as_deref())?;
    validate_timeout("geocoding.timeout_secs", geocoding.timeout_secs)?;
    if geocoding.max_candidates == 0 || geocoding.max_candidates > 10 {
        return Err(ConfigError::Validation(
            "geocoding.max_candidates must be in range 1..=10".to_string(),
        ));
    }
    Ok(())
}

fn validate_checkout(checkout: &CheckoutConfig) -> Result<(), ConfigError> {
    validate_http_url("checkout.base_url", checkout.base_url.as_deref())?;
    validate_timeout("checkout.timeout_secs", checkout.timeout_secs)
}

fn validate_dialogue(dialogue: &DialogueConfig) -> Result<(), ConfigError> {
    if dialogue.idle_timeout_mins == 0 {
        return Err(ConfigError::Validation(
            "dialogue.idle_timeout_mins must be greater than zero".to_string(),
        ));
    }
    if dialogue.history_limit == 0 {
        return Err(ConfigError::Validation(
            "dialogue.history_limit must be greater than zero".to_string(),
        ));
    }
    if dialogue.max_item_quantity == 0 {
        return Err(ConfigError::Validation(
            "dialogue.max_item_quantity must be greater than zero".to_string(),
        ));
    }
    if dialogue.payment_tolerance < Decimal::ZERO || dialogue.payment_tolerance > Decimal::ONE {
        return Err(ConfigError::Validation(
            "dialogue.payment_tolerance must be between 0.00 and 1.00".to_string(),
        ));
    }
    if dialogue.delivery_fee < Decimal::ZERO {
        return Err(ConfigError::Validation(
            "dialogue.delivery_fee must not be negative".to_string(),
        ));
    }
    if dialogue.currency_symbol.trim().is_empty() {
        return Err(ConfigError::Validation(
            "dialogue.currency_symbol must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(key: &str, value: Option<&str>) -> Result<(), ConfigError> {
    match value {
        Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
            Err(ConfigError::Validation(format!("{key} must start with http:// or https://")))
        }
        _ => Ok(()),
    }
}

fn validate_timeout(key: &str, timeout_secs: u64) -> Result<(), ConfigError> {
    if timeout_secs == 0 || timeout_secs > 120 {
        return Err(ConfigError::Validation(format!("{key} must be in range 1..=120")));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
{
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| {
        ConfigError::Validation(format!("{key} must be a decimal string such as \"0.00\""))
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    catalog: Option<CatalogPatch>,
    geocoding: Option<GeocodingPatch>,
    checkout: Option<CheckoutPatch>,
    dialogue: Option<DialoguePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    enabled: Option<bool>,
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogPatch {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    synonyms: Option<BTreeMap<String, String>>,
    ambiguity_margin: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct GeocodingPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    max_candidates: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct CheckoutPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DialoguePatch {
    idle_timeout_mins: Option<u64>,
    history_limit: Option<usize>,
    max_item_quantity: Option<u32>,
    payment_tolerance: Option<String>,
    delivery_fee: Option<String>,
    currency_symbol: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
