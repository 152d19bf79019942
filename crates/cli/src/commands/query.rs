use serde_json::Value;
use tabletalk_core::config::LoadOptions;
use tabletalk_core::errors::ToolError;
use tabletalk_db::QueryTranslator;

use crate::commands::{async_runtime, load_config, open_translator, CommandFailure, CommandResult};

/// Runs one structured payload straight through the translator, bypassing the
/// model.
pub fn run(options: &LoadOptions, payload: &str) -> CommandResult {
    let payload = match parse_payload(payload) {
        Ok(payload) => payload,
        Err(failure) => return failure.into_result("query"),
    };
    let config = match load_config(options) {
        Ok(config) => config,
        Err(failure) => return failure.into_result("query"),
    };
    let runtime = match async_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => return failure.into_result("query"),
    };

    let result = runtime.block_on(async {
        let translator = open_translator(&config.database).await?;
        let result = execute(&translator, payload).await;
        translator.pool().close().await;
        result
    });

    match result {
        Ok(value) => CommandResult::success_with_data("query", "query executed", Some(value)),
        Err(failure) => failure.into_result("query"),
    }
}

pub(crate) fn parse_payload(raw: &str) -> Result<Value, CommandFailure> {
    serde_json::from_str(raw.trim()).map_err(|error| {
        CommandFailure::new("invalid_payload", format!("payload is not valid JSON: {error}"), 7)
    })
}

pub(crate) async fn execute(
    translator: &QueryTranslator,
    payload: Value,
) -> Result<Value, CommandFailure> {
    translator.execute(payload).await.map_err(|error| {
        let error = ToolError::from(error);
        CommandFailure::new(error.error_class(), error.to_string(), 5)
    })
}
