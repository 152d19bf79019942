//! Tool orchestration for tabletalk.
//!
//! A language model answers questions about a SQLite database by calling
//! named tools. This crate owns that loop:
//!
//! - `tools`: the registry of named, schema-described async handlers
//! - `catalog`: the database tools, backed by `tabletalk_db::QueryTranslator`
//! - `guardrails`: the read-only policy and the prompt heuristic that sets it
//! - `conversation`: messages, tool-call requests, and per-turn tool events
//! - `llm`: the `ModelClient` port and an OpenAI-compatible HTTP adapter
//! - `runtime`: the turn state machine (`AgentRuntime`)
//!
//! The model only picks tools and phrases answers. Every database effect goes
//! through a validated tool call.

pub mod catalog;
pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod runtime;
pub mod tools;

pub use catalog::register_database_tools;
pub use conversation::{Conversation, Message, Role, ToolCallRequest};
pub use guardrails::{classify_prompt, GuardrailDecision, GuardrailPolicy, MUTATING_TOOLS};
pub use llm::{ModelClient, OpenAiCompatibleClient};
pub use runtime::{AgentRuntime, RuntimeSettings, TurnOutcome, TurnRequest};
pub use tools::{
    ArgSpec, ArgType, Arguments, FunctionSchema, RawArguments, ToolDefinition, ToolHandler,
    ToolRegistry,
};
