use tabletalk_core::errors::ToolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("unsupported column type `{type_name}` (allowed: {allowed})")]
    UnsupportedType { type_name: String, allowed: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl QueryError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<QueryError> for ToolError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::Validation(message) => ToolError::Validation(message),
            QueryError::TableNotFound(table) => ToolError::TableNotFound(table),
            QueryError::UnsupportedType { type_name, allowed } => {
                ToolError::UnsupportedType { type_name, allowed }
            }
            QueryError::Database(source) => ToolError::Execution(source.to_string()),
        }
    }
}
