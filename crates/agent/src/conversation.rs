use serde::{Deserialize, Serialize};
use tabletalk_core::errors::ERROR_MARKER;
use tabletalk_core::events::ToolEvent;
use uuid::Uuid;

use crate::guardrails::classify_prompt;
pub use crate::tools::RawArguments;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub tool_name: String,
    pub raw_arguments: RawArguments,
}

impl ToolCallRequest {
    /// Synthesizes a correlation id when the model did not supply one.
    pub fn new(
        id: Option<String>,
        tool_name: impl Into<String>,
        raw_arguments: RawArguments,
    ) -> Self {
        let id = id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
        Self { id, tool_name: tool_name.into(), raw_arguments }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self { tool_calls: calls, ..Self::plain(Role::Assistant, content) }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { tool_call_id: Some(call_id.into()), ..Self::plain(Role::Tool, content) }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    pub fn is_error_result(&self) -> bool {
        self.role == Role::Tool && self.content.starts_with(ERROR_MARKER)
    }
}

/// Messages, read-only flag, and the current turn's tool events for one
/// conversation.
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    read_only: Option<bool>,
    events: Vec<ToolEvent>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self { messages: vec![Message::system(prompt)], ..Self::default() }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn read_only(&self) -> bool {
        self.read_only.unwrap_or(false)
    }

    pub fn read_only_flag(&self) -> Option<bool> {
        self.read_only
    }

    /// An explicit request always wins. Otherwise the first prompt of the
    /// conversation sets the flag through the keyword heuristic, and later
    /// prompts leave it alone.
    pub fn resolve_read_only(&mut self, explicit: Option<bool>, prompt: &str) -> bool {
        match (explicit, self.read_only) {
            (Some(read_only), _) => self.read_only = Some(read_only),
            (None, None) => self.read_only = Some(classify_prompt(prompt).read_only()),
            (None, Some(_)) => {}
        }
        self.read_only()
    }

    pub fn events(&self) -> &[ToolEvent] {
        &self.events
    }

    pub(crate) fn begin_turn(&mut self) {
        self.events.clear();
    }

    pub(crate) fn record_event(&mut self, event: ToolEvent) {
        self.events.push(event);
    }

    /// Error text that ends the turn: the newest message is a failed tool
    /// result (on its own or right after the assistant message that asked
    /// for it).
    pub fn stop_error(&self) -> Option<&str> {
        self.messages.last().filter(|message| message.is_error_result()).map(|m| m.content.as_str())
    }
}
