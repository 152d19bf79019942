pub mod connection;
pub mod error;
pub mod payload;
pub mod rows;
pub mod schema;
pub mod translator;

pub use connection::{connect, connect_with_settings, DbPool};
pub use error::QueryError;
pub use payload::{QueryPayload, SUPPORTED_ACTIONS};
pub use schema::ColumnType;
pub use translator::QueryTranslator;
