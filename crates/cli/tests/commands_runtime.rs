use std::env;
use std::fs;
use std::io::Cursor;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use tabletalk_cli::commands::{ask, chat, config, doctor, query, tools};
use tabletalk_core::config::{ConfigOverrides, LoadOptions};
use tempfile::TempDir;

#[test]
fn tools_lists_the_database_catalog() {
    let result = tools::run();
    assert_eq!(result.exit_code, 0, "expected catalog output");

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "tools");
    assert_eq!(payload["status"], "ok");
    let catalog = payload["data"].as_array().cloned().unwrap_or_default();
    let names: Vec<&str> = catalog.iter().filter_map(|tool| tool["name"].as_str()).collect();
    assert_eq!(names.len(), 15);
    assert_eq!(names[0], "list_tables");
    assert!(names.contains(&"join_select"));
}

#[test]
fn query_runs_payload_against_configured_database() {
    with_env(&[("TABLETALK_DATABASE_URL", "sqlite::memory:")], || {
        let result = query::run(&LoadOptions::default(), r#"{"action": "list_tables"}"#);
        assert_eq!(result.exit_code, 0, "expected successful query: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "query");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"], Value::Array(Vec::new()));
    });
}

#[test]
fn query_reports_typed_translator_errors() {
    with_env(&[("TABLETALK_DATABASE_URL", "sqlite::memory:")], || {
        let payload = r#"{"action": "select", "table": "orders"}"#;
        let result = query::run(&LoadOptions::default(), payload);
        assert_eq!(result.exit_code, 5);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "table_not_found");

        let result = query::run(&LoadOptions::default(), r#"{"action": "truncate"}"#);
        assert_eq!(parse_payload(&result.output)["error_class"], "validation");
    });
}

#[test]
fn query_rejects_malformed_json_before_loading_config() {
    with_env(&[("TABLETALK_DATABASE_URL", "postgres://nope")], || {
        let result = query::run(&LoadOptions::default(), "{not json");
        assert_eq!(result.exit_code, 7);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_payload");
    });
}

#[test]
fn commands_fail_with_config_error_for_non_sqlite_url() {
    with_env(&[("TABLETALK_DATABASE_URL", "postgres://localhost/app")], || {
        let result = query::run(&LoadOptions::default(), r#"{"action": "list_tables"}"#);
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "query");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn ask_reports_unreachable_model_without_internals() {
    with_env(
        &[
            ("TABLETALK_DATABASE_URL", "sqlite::memory:"),
            ("TABLETALK_LLM_BASE_URL", "http://127.0.0.1:9"),
            ("TABLETALK_LLM_TIMEOUT_SECS", "2"),
        ],
        || {
            let result = ask::run(&LoadOptions::default(), "list tables", None);
            assert_eq!(result.exit_code, 6);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "ask");
            assert_eq!(payload["error_class"], "model_unavailable");
            let message = payload["message"].as_str().unwrap_or_default();
            assert!(message.contains("unavailable"));
            assert!(!message.contains("127.0.0.1"));
        },
    );
}

#[test]
fn chat_runs_db_commands_until_quit() {
    with_env(&[("TABLETALK_DATABASE_URL", "sqlite::memory:")], || {
        let script = [
            r#"/db {"action": "create_table", "table": "notes"}"#,
            r#"/db {"action": "add_column", "table": "notes", "column": "body"}"#,
            r#"/db {"action": "insert", "table": "notes", "values": {"body": "hello"}}"#,
            r#"/db {"action": "select", "table": "notes", "where": {"body": "hello"}}"#,
            r#"/db {"action": "select", "table": "missing"}"#,
            "/quit",
            r#"/db {"action": "drop_table", "table": "notes"}"#,
        ]
        .join("\n");
        let mut transcript = Vec::new();

        let result = chat::run_with(
            &LoadOptions::default(),
            None,
            Cursor::new(script.into_bytes()),
            &mut transcript,
        );
        assert_eq!(result.exit_code, 0, "expected clean chat exit: {}", result.output);
        assert_eq!(parse_payload(&result.output)["message"], "chat ended after 0 turns");

        let transcript = String::from_utf8(transcript).expect("utf-8 transcript");
        assert!(transcript.contains(r#""inserted": 1"#), "{transcript}");
        assert!(transcript.contains(r#""body": "hello""#), "{transcript}");
        assert!(transcript.contains("error (table_not_found)"), "{transcript}");
        assert!(!transcript.contains("dropped_table"), "{transcript}");
    });
}

#[test]
fn config_output_attributes_sources_and_redacts_secrets() {
    with_env(
        &[("TABLETALK_LLM_API_KEY", "sk-very-secret"), ("TABLETALK_LLM_PROVIDER", "openai")],
        || {
            let dir = TempDir::new().expect("temp dir");
            let path = dir.path().join("tabletalk.toml");
            fs::write(&path, "[agent]\nmax_model_calls = 5\n").expect("write config");

            let options = LoadOptions { config_path: Some(path.clone()), ..LoadOptions::default() };
            let output = config::run(&options);

            let api_key_line = "- llm.api_key = <redacted> (source: env (TABLETALK_LLM_API_KEY))";
            assert!(output.contains(api_key_line), "{output}");
            assert!(output.contains(&format!(
                "- agent.max_model_calls = 5 (source: file ({}))",
                path.display()
            )));
            assert!(output.contains("- logging.level = info (source: default)"));
            assert!(!output.contains("sk-very-secret"));
        },
    );
}

#[test]
fn command_line_overrides_beat_env_and_are_attributed() {
    with_env(&[("TABLETALK_DATABASE_URL", "postgres://localhost/app")], || {
        let options = LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                llm_model: Some("qwen2.5".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        };

        let result = query::run(&options, r#"{"action": "list_tables"}"#);
        assert_eq!(result.exit_code, 0, "override should replace the env url: {}", result.output);

        let output = config::run(&options);
        let url_line = "- database.url = sqlite::memory: (source: override (command line))";
        assert!(output.contains(url_line), "{output}");
        assert!(output.contains("- llm.model = qwen2.5 (source: override (command line))"));
    });
}

#[test]
fn missing_explicit_config_file_is_a_config_error() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let options = LoadOptions {
            config_path: Some(dir.path().join("absent.toml")),
            require_file: true,
            ..LoadOptions::default()
        };

        let result = query::run(&options, r#"{"action": "list_tables"}"#);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
    });
}

#[test]
fn doctor_passes_with_in_memory_database() {
    with_env(&[("TABLETALK_DATABASE_URL", "sqlite::memory:")], || {
        let (output, passed) = doctor::run(&LoadOptions::default(), true);
        assert!(passed, "{output}");

        let report = parse_payload(&output);
        assert_eq!(report["overall_status"], "pass");
        let checks = report["checks"].as_array().cloned().unwrap_or_default();
        let names: Vec<&str> = checks.iter().filter_map(|check| check["name"].as_str()).collect();
        assert_eq!(
            names,
            ["config_validation", "model_endpoint", "database_connectivity", "tool_catalog"]
        );
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("TABLETALK_LLM_PROVIDER", "openai")], || {
        let (output, passed) = doctor::run(&LoadOptions::default(), false);
        assert!(!passed);
        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] config_validation:"));
        assert!(output.contains("- [skip] database_connectivity:"));
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
        "TABLETALK_DATABASE_URL",
        "TABLETALK_DATABASE_MAX_CONNECTIONS",
        "TABLETALK_DATABASE_TIMEOUT_SECS",
        "TABLETALK_LLM_PROVIDER",
        "TABLETALK_LLM_API_KEY",
        "TABLETALK_LLM_BASE_URL",
        "TABLETALK_LLM_MODEL",
        "TABLETALK_LLM_TEMPERATURE",
        "TABLETALK_LLM_TIMEOUT_SECS",
        "TABLETALK_AGENT_MAX_MODEL_CALLS",
        "TABLETALK_AGENT_SYSTEM_PROMPT",
        "TABLETALK_AGENT_READ_ONLY",
        "TABLETALK_LOGGING_LEVEL",
        "TABLETALK_LOGGING_FORMAT",
        "TABLETALK_LOG_LEVEL",
        "TABLETALK_LOG_FORMAT",
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
