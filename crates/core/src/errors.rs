use thiserror::Error;

/// Prefix carried by every tool-result message that reports a failure.
pub const ERROR_MARKER: &str = "ERROR:";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate tool name `{0}`")]
    DuplicateTool(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("unsupported column type `{type_name}` (allowed: {allowed})")]
    UnsupportedType { type_name: String, allowed: String },
    #[error("read-only mode forbids calling `{0}`")]
    ReadOnlyViolation(String),
}

impl ToolError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::Validation(_) => "validation",
            Self::Execution(_) => "tool_execution",
            Self::TableNotFound(_) => "table_not_found",
            Self::UnsupportedType { .. } => "unsupported_type",
            Self::ReadOnlyViolation(_) => "read_only_violation",
        }
    }

    /// Content of the tool-result message recorded for this failure.
    pub fn to_result_content(&self) -> String {
        format!("{ERROR_MARKER} {self}")
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("turn exceeded the limit of {limit} model calls")]
    StepLimitExceeded { limit: u32 },
}

impl TurnError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ModelUnavailable(_) => {
                "The language model is unavailable right now. Please retry shortly."
            }
            Self::StepLimitExceeded { .. } => {
                "The request needed too many tool steps and was stopped. Try a narrower request."
            }
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::StepLimitExceeded { .. } => "step_limit_exceeded",
        }
    }
}
