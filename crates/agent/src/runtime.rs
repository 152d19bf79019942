use std::sync::Arc;
use std::time::{Duration, Instant};

use tabletalk_core::config::AppConfig;
use tabletalk_core::errors::{ToolError, TurnError};
use tabletalk_core::events::{ToolEvent, ToolOutcome};
use tracing::{debug, info, warn};

use crate::conversation::{Conversation, Message, ToolCallRequest};
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::llm::ModelClient;
use crate::tools::{FunctionSchema, ToolRegistry};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub max_model_calls: u32,
    pub model_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self { max_model_calls: 8, model_timeout: Duration::from_secs(60) }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_model_calls: config.agent.max_model_calls,
            model_timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TurnRequest {
    pub prompt: String,
    /// Explicit mode for this turn; `None` defers to the conversation flag or
    /// the prompt heuristic.
    pub read_only: Option<bool>,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), read_only: None }
    }

    pub fn read_only(mut self, read_only: Option<bool>) -> Self {
        self.read_only = read_only;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    pub answer: String,
    /// The turn ended on an error-tagged tool result instead of a model answer.
    pub stopped_on_error: bool,
    pub model_calls: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TurnState {
    AwaitingModel,
    DispatchingTools,
    Terminal { stopped_on_error: bool },
}

/// Drives one conversation turn: model call, tool dispatch, repeat until the
/// model answers in plain text or a tool fails.
pub struct AgentRuntime {
    registry: Arc<ToolRegistry>,
    model: Arc<dyn ModelClient>,
    settings: RuntimeSettings,
    catalog: Vec<FunctionSchema>,
}

impl AgentRuntime {
    pub fn new(
        registry: Arc<ToolRegistry>,
        model: Arc<dyn ModelClient>,
        settings: RuntimeSettings,
    ) -> Self {
        let catalog = registry.describe_all();
        Self { registry, model, settings, catalog }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        request: TurnRequest,
    ) -> Result<TurnOutcome, TurnError> {
        let read_only = conversation.resolve_read_only(request.read_only, &request.prompt);
        let policy = GuardrailPolicy::new(read_only);
        let turn_id = uuid::Uuid::new_v4().to_string();

        conversation.begin_turn();
        conversation.push(Message::user(request.prompt));
        info!(
            event_name = "agent.turn.started",
            correlation_id = %turn_id,
            read_only,
            tools = self.catalog.len(),
            "conversation turn started"
        );

        let mut model_calls = 0_u32;
        let mut state = TurnState::AwaitingModel;
        loop {
            state = match state {
                TurnState::AwaitingModel => {
                    if let Some(error) = conversation.stop_error() {
                        warn!(
                            event_name = "agent.turn.error_stop",
                            correlation_id = %turn_id,
                            error = %error,
                            "turn stopped on failed tool call"
                        );
                        TurnState::Terminal { stopped_on_error: true }
                    } else {
                        if model_calls >= self.settings.max_model_calls {
                            warn!(
                                event_name = "agent.turn.step_limit",
                                correlation_id = %turn_id,
                                limit = self.settings.max_model_calls,
                                "turn exceeded model call limit"
                            );
                            return Err(TurnError::StepLimitExceeded {
                                limit: self.settings.max_model_calls,
                            });
                        }
                        model_calls += 1;
                        let reply = self.call_model(conversation, &turn_id).await?;
                        let next = if reply.has_tool_calls() {
                            TurnState::DispatchingTools
                        } else {
                            TurnState::Terminal { stopped_on_error: false }
                        };
                        conversation.push(reply);
                        next
                    }
                }
                TurnState::DispatchingTools => {
                    let calls = conversation
                        .last_message()
                        .map(|message| message.tool_calls.clone())
                        .unwrap_or_default();
                    for call in calls {
                        self.dispatch(conversation, &policy, call).await;
                    }
                    TurnState::AwaitingModel
                }
                TurnState::Terminal { stopped_on_error } => {
                    let answer = conversation
                        .last_message()
                        .map(|message| message.content.clone())
                        .unwrap_or_default();
                    info!(
                        event_name = "agent.turn.completed",
                        correlation_id = %turn_id,
                        model_calls,
                        tool_calls = conversation.events().len(),
                        stopped_on_error,
                        "conversation turn completed"
                    );
                    return Ok(TurnOutcome { answer, stopped_on_error, model_calls });
                }
            };
        }
    }

    /// Runs a turn and folds fatal errors into a short diagnostic.
    pub async fn chat(
        &self,
        conversation: &mut Conversation,
        prompt: impl Into<String>,
        read_only: Option<bool>,
    ) -> String {
        let request = TurnRequest::new(prompt).read_only(read_only);
        match self.run_turn(conversation, request).await {
            Ok(outcome) => outcome.answer,
            Err(error) => {
                warn!(
                    event_name = "agent.turn.failed",
                    error_class = error.error_class(),
                    error = %error,
                    "conversation turn failed"
                );
                error.user_message().to_owned()
            }
        }
    }

    async fn call_model(
        &self,
        conversation: &Conversation,
        turn_id: &str,
    ) -> Result<Message, TurnError> {
        let started = Instant::now();
        let reply = tokio::time::timeout(
            self.settings.model_timeout,
            self.model.send(conversation.messages(), &self.catalog),
        )
        .await;

        match reply {
            Ok(Ok(message)) => {
                debug!(
                    event_name = "agent.model.replied",
                    correlation_id = %turn_id,
                    tool_calls = message.tool_calls.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "model replied"
                );
                Ok(message)
            }
            Ok(Err(error)) => Err(TurnError::ModelUnavailable(format!("{error:#}"))),
            Err(_) => Err(TurnError::ModelUnavailable(format!(
                "no reply within {}s",
                self.settings.model_timeout.as_secs_f64()
            ))),
        }
    }

    async fn dispatch(
        &self,
        conversation: &mut Conversation,
        policy: &GuardrailPolicy,
        call: ToolCallRequest,
    ) {
        let result = match policy.evaluate(&call.tool_name) {
            GuardrailDecision::Allow => {
                let result = self.registry.dispatch(&call.tool_name, &call.raw_arguments).await;
                debug!(
                    event_name = "agent.tool.dispatched",
                    correlation_id = %call.id,
                    tool_name = %call.tool_name,
                    success = result.is_ok(),
                    "tool dispatched"
                );
                result
            }
            GuardrailDecision::Deny { reason_code, fallback_path, .. } => {
                warn!(
                    event_name = "agent.tool.refused",
                    correlation_id = %call.id,
                    tool_name = %call.tool_name,
                    reason_code,
                    fallback_path,
                    "mutating tool refused in read-only mode"
                );
                Err(ToolError::ReadOnlyViolation(call.tool_name.clone()))
            }
        };

        let (content, outcome) = match result {
            Ok(value) => (value.to_string(), ToolOutcome::Success { result: value }),
            Err(error) => (error.to_result_content(), ToolOutcome::from(&error)),
        };

        conversation.push(Message::tool_result(call.id.clone(), content));
        conversation.record_event(ToolEvent::new(
            call.id,
            call.tool_name,
            call.raw_arguments.to_value(),
            outcome,
        ));
    }
}
