use serde_json::json;
use tabletalk_agent::{Conversation, TurnRequest};
use tabletalk_core::config::LoadOptions;

use crate::commands::{
    async_runtime, build_agent, load_config, open_translator, CommandFailure, CommandResult,
};

/// Runs a single conversation turn and reports the answer with every tool
/// call it made.
pub fn run(options: &LoadOptions, prompt: &str, read_only: Option<bool>) -> CommandResult {
    let config = match load_config(options) {
        Ok(config) => config,
        Err(failure) => return failure.into_result("ask"),
    };
    let runtime = match async_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => return failure.into_result("ask"),
    };

    let read_only = read_only.or(config.agent.read_only);
    let result = runtime.block_on(async {
        let translator = open_translator(&config.database).await?;
        let agent = build_agent(&config, &translator)?;
        let mut conversation = Conversation::with_system_prompt(&config.agent.system_prompt);

        let outcome = agent
            .run_turn(&mut conversation, TurnRequest::new(prompt).read_only(read_only))
            .await
            .map_err(|error| CommandFailure::new(error.error_class(), error.user_message(), 6));
        translator.pool().close().await;

        let outcome = outcome?;
        Ok::<_, CommandFailure>(json!({
            "answer": outcome.answer,
            "stopped_on_error": outcome.stopped_on_error,
            "model_calls": outcome.model_calls,
            "read_only": conversation.read_only(),
            "events": conversation.events(),
        }))
    });

    match result {
        Ok(data) => {
            let answer = data["answer"].as_str().unwrap_or_default().to_string();
            CommandResult::success_with_data("ask", answer, Some(data))
        }
        Err(failure) => failure.into_result("ask"),
    }
}
