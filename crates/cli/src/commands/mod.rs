pub mod ask;
pub mod chat;
pub mod config;
pub mod doctor;
pub mod query;
pub mod tools;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tabletalk_agent::{
    register_database_tools, AgentRuntime, OpenAiCompatibleClient, RuntimeSettings, ToolRegistry,
};
use tabletalk_core::config::{AppConfig, DatabaseConfig, LoadOptions};
use tabletalk_db::{connect_with_settings, QueryTranslator};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// A failed setup or execution step, before it is tied to a command name.
#[derive(Debug)]
pub(crate) struct CommandFailure {
    pub error_class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl CommandFailure {
    pub(crate) fn new(
        error_class: &'static str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self { error_class, message: message.into(), exit_code }
    }

    pub(crate) fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.error_class, self.message, self.exit_code)
    }
}

pub(crate) fn load_config(options: &LoadOptions) -> Result<AppConfig, CommandFailure> {
    AppConfig::load(options.clone()).map_err(|error| {
        CommandFailure::new("config_validation", format!("configuration issue: {error}"), 2)
    })
}

pub(crate) fn async_runtime() -> Result<tokio::runtime::Runtime, CommandFailure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        let message = format!("failed to initialize async runtime: {error}");
        CommandFailure::new("runtime_init", message, 3)
    })
}

/// In-memory databases are private to one connection, so they get a pool of
/// exactly one.
pub(crate) async fn open_translator(
    database: &DatabaseConfig,
) -> Result<QueryTranslator, CommandFailure> {
    let max_connections =
        if database.url.contains(":memory:") { 1 } else { database.max_connections };
    let pool = connect_with_settings(&database.url, max_connections, database.timeout_secs)
        .await
        .map_err(|error| {
            CommandFailure::new(
                "db_connectivity",
                format!("failed to connect to database: {error}"),
                4,
            )
        })?;
    Ok(QueryTranslator::new(pool))
}

pub(crate) fn build_registry(
    translator: &QueryTranslator,
) -> Result<Arc<ToolRegistry>, CommandFailure> {
    let mut registry = ToolRegistry::new();
    register_database_tools(&mut registry, translator)
        .map_err(|error| CommandFailure::new("tool_catalog", error.to_string(), 5))?;
    Ok(Arc::new(registry))
}

pub(crate) fn build_agent(
    config: &AppConfig,
    translator: &QueryTranslator,
) -> Result<AgentRuntime, CommandFailure> {
    let registry = build_registry(translator)?;
    let model = OpenAiCompatibleClient::from_config(&config.llm)
        .map_err(|error| CommandFailure::new("model_client", format!("{error:#}"), 6))?;
    Ok(AgentRuntime::new(registry, Arc::new(model), RuntimeSettings::from_config(config)))
}
