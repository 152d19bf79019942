pub mod config;
pub mod errors;
pub mod events;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
pub use errors::{RegistryError, ToolError, TurnError, ERROR_MARKER};
pub use events::{ToolEvent, ToolOutcome};
