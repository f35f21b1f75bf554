use std::env;
use std::io::Cursor;
use std::sync::{Mutex, OnceLock};

use comanda_cli::commands::{chat, config, migrate};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("COMANDA_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_env() {
    with_env(&[("COMANDA_DATABASE_MAX_CONNECTIONS", "many")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_reports_sources_and_redacts_secrets() {
    with_env(
        &[
            ("COMANDA_DATABASE_URL", "sqlite::memory:"),
            ("COMANDA_CHECKOUT_BASE_URL", "https://checkout.example.test"),
            ("COMANDA_CHECKOUT_API_KEY", "ck-very-secret"),
        ],
        || {
            let result = config::run(false);
            assert_eq!(result.exit_code, 0);
            assert!(result
                .output
                .contains("- database.url = sqlite::memory: (source: env (COMANDA_DATABASE_URL))"));
            assert!(result.output.contains("- checkout.api_key = <redacted>"));
            assert!(result.output.contains("- geocoding.api_key = <unset> (source: default)"));
            assert!(!result.output.contains("ck-very-secret"));
        },
    );
}

#[test]
fn config_json_is_the_redacted_document() {
    with_env(&[("COMANDA_CHECKOUT_API_KEY", "ck-very-secret")], || {
        let result = config::run(true);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["checkout"]["api_key"], "<redacted>");
        assert_eq!(payload["dialogue"]["currency_symbol"], "R$");
        assert!(!result.output.contains("ck-very-secret"));
    });
}

#[test]
fn chat_answers_each_line_until_quit() {
    with_env(&[], || {
        let input = Cursor::new("quero 1 x-salada\n\ncarrinho\n/sair\nquero 1 x-bacon\n");
        let mut output = Vec::new();

        let result = chat::run("cli:test", input, &mut output);
        assert_eq!(result.exit_code, 0);

        let transcript = String::from_utf8(output).expect("utf-8 transcript");
        assert!(transcript.contains("X-Salada"), "{transcript}");
        assert!(!transcript.contains("X-Bacon"), "lines after /sair must be ignored");
        assert_eq!(transcript.matches("> ").count(), 4);
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "COMANDA_DATABASE_URL",
        "COMANDA_DATABASE_MAX_CONNECTIONS",
        "COMANDA_DATABASE_TIMEOUT_SECS",
        "COMANDA_LLM_ENABLED",
        "COMANDA_LLM_PROVIDER",
        "COMANDA_LLM_API_KEY",
        "COMANDA_LLM_BASE_URL",
        "COMANDA_LLM_MODEL",
        "COMANDA_CATALOG_BASE_URL",
        "COMANDA_GEOCODING_BASE_URL",
        "COMANDA_GEOCODING_API_KEY",
        "COMANDA_CHECKOUT_BASE_URL",
        "COMANDA_CHECKOUT_API_KEY",
        "COMANDA_DIALOGUE_CURRENCY_SYMBOL",
        "COMANDA_SERVER_BIND_ADDRESS",
        "COMANDA_SERVER_PORT",
        "COMANDA_LOGGING_LEVEL",
        "COMANDA_LOGGING_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
