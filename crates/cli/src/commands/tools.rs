use serde_json::Value;
use tabletalk_core::config::DatabaseConfig;

use crate::commands::{
    async_runtime, build_registry, open_translator, CommandFailure, CommandResult,
};

/// Prints the function-calling catalog the model receives. The catalog does
/// not depend on the configured database, so a scratch in-memory store backs it.
pub fn run() -> CommandResult {
    let runtime = match async_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => return failure.into_result("tools"),
    };

    let scratch =
        DatabaseConfig { url: "sqlite::memory:".to_string(), max_connections: 1, timeout_secs: 5 };
    let catalog = runtime.block_on(async {
        let translator = open_translator(&scratch).await?;
        let registry = build_registry(&translator)?;
        translator.pool().close().await;
        Ok::<_, CommandFailure>(registry.describe_all())
    });

    match catalog {
        Ok(catalog) => {
            let count = catalog.len();
            let data = serde_json::to_value(catalog).unwrap_or(Value::Null);
            let message = format!("{count} tools registered");
            CommandResult::success_with_data("tools", message, Some(data))
        }
        Err(failure) => failure.into_result("tools"),
    }
}
