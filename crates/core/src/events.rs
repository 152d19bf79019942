use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ToolError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { result: Value },
    Failure { error_class: String, message: String },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl From<&ToolError> for ToolOutcome {
    fn from(error: &ToolError) -> Self {
        Self::Failure { error_class: error.error_class().to_owned(), message: error.to_string() }
    }
}

/// One tool call requested during a turn, with what happened to it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub correlation_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub outcome: ToolOutcome,
    pub occurred_at: DateTime<Utc>,
}

impl ToolEvent {
    pub fn new(
        correlation_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        outcome: ToolOutcome,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            tool_name: tool_name.into(),
            arguments,
            outcome,
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::errors::ToolError;
    use crate::events::{ToolEvent, ToolOutcome};

    #[test]
    fn failure_outcome_carries_error_class() {
        let outcome = ToolOutcome::from(&ToolError::ReadOnlyViolation("insert_rows".to_owned()));

        assert!(!outcome.is_success());
        assert_eq!(
            outcome,
            ToolOutcome::Failure {
                error_class: "read_only_violation".to_owned(),
                message: "read-only mode forbids calling `insert_rows`".to_owned(),
            }
        );
    }

    #[test]
    fn event_serializes_with_tagged_outcome() {
        let event = ToolEvent::new(
            "call-1",
            "list_tables",
            json!({}),
            ToolOutcome::Success { result: json!([]) },
        );

        let value = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(value["tool_name"], "list_tables");
        assert_eq!(value["outcome"]["status"], "success");
        assert_eq!(value["outcome"]["result"], json!([]));
    }
}
