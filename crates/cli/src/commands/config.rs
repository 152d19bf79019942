use std::env;
use std::fs;
use std::path::Path;

use tabletalk_core::config::{resolve_config_path, AppConfig, ConfigOverrides, LoadOptions};
use toml::Value;

/// Each rendered key with the environment variable that overrides it.
struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec![
        "effective config (source precedence: override > env > file > default):".to_string(),
    ];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            &options.overrides,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let read_only = match config.agent.read_only {
        Some(read_only) => read_only.to_string(),
        None => "<prompt heuristic>".to_string(),
    };

    vec![
        field("database.url", &["TABLETALK_DATABASE_URL"], config.database.url.clone()),
        field(
            "database.max_connections",
            &["TABLETALK_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        field(
            "database.timeout_secs",
            &["TABLETALK_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        field("llm.provider", &["TABLETALK_LLM_PROVIDER"], format!("{:?}", config.llm.provider)),
        field("llm.model", &["TABLETALK_LLM_MODEL"], config.llm.model.clone()),
        field(
            "llm.base_url",
            &["TABLETALK_LLM_BASE_URL"],
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        field("llm.api_key", &["TABLETALK_LLM_API_KEY"], api_key.to_string()),
        field(
            "llm.temperature",
            &["TABLETALK_LLM_TEMPERATURE"],
            config.llm.temperature.to_string(),
        ),
        field(
            "llm.timeout_secs",
            &["TABLETALK_LLM_TIMEOUT_SECS"],
            config.llm.timeout_secs.to_string(),
        ),
        field(
            "agent.max_model_calls",
            &["TABLETALK_AGENT_MAX_MODEL_CALLS"],
            config.agent.max_model_calls.to_string(),
        ),
        field("agent.read_only", &["TABLETALK_AGENT_READ_ONLY"], read_only),
        field(
            "logging.level",
            &["TABLETALK_LOGGING_LEVEL", "TABLETALK_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        field(
            "logging.format",
            &["TABLETALK_LOGGING_FORMAT", "TABLETALK_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn field(key: &'static str, env_keys: &'static [&'static str], value: String) -> Field {
    Field { key, env_keys, value }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    overrides: &ConfigOverrides,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let overridden = match key_path {
        "database.url" => overrides.database_url.is_some(),
        "llm.model" => overrides.llm_model.is_some(),
        "logging.level" => overrides.log_level.is_some(),
        _ => false,
    };
    if overridden {
        return "override (command line)".to_string();
    }

    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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
