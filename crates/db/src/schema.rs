use serde_json::{json, Value};
use sqlx::{Row, SqliteConnection};

use crate::error::QueryError;

/// Closed column type vocabulary accepted by schema actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
    Float,
    Boolean,
    DateTime,
    Date,
}

impl ColumnType {
    pub const ALLOWED: &'static [&'static str] = &[
        "integer",
        "int",
        "text",
        "string",
        "varchar",
        "float",
        "double",
        "boolean",
        "bool",
        "datetime",
        "timestamp",
        "date",
    ];

    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => Ok(Self::Integer),
            "text" | "string" | "varchar" => Ok(Self::Text),
            "float" | "double" => Ok(Self::Float),
            "boolean" | "bool" => Ok(Self::Boolean),
            "datetime" | "timestamp" => Ok(Self::DateTime),
            "date" => Ok(Self::Date),
            _ => Err(QueryError::UnsupportedType {
                type_name: raw.to_owned(),
                allowed: Self::ALLOWED.join(", "),
            }),
        }
    }

    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Text => "TEXT",
            Self::Float => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::DateTime => "TIMESTAMP",
            Self::Date => "DATE",
        }
    }
}

pub fn validate_identifier(name: &str) -> Result<(), QueryError> {
    let mut chars = name.chars();
    let valid_head = chars.next().is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_');
    let valid_tail = chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_');

    if valid_head && valid_tail {
        Ok(())
    } else {
        Err(QueryError::validation(format!("invalid identifier `{name}`")))
    }
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Validates then quotes.
pub fn ident(name: &str) -> Result<String, QueryError> {
    validate_identifier(name)?;
    Ok(quote_ident(name))
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

impl ColumnInfo {
    pub fn nullable(&self) -> bool {
        !self.not_null && !self.primary_key
    }

    pub fn is_boolean(&self) -> bool {
        self.declared_type.eq_ignore_ascii_case("BOOLEAN")
    }

    pub fn describe(&self) -> Value {
        json!({
            "name": self.name,
            "type": self.declared_type,
            "nullable": self.nullable(),
            "default": self.default,
            "primary_key": self.primary_key,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    /// Case-insensitive, as SQLite resolves column names.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn require_column(&self, name: &str) -> Result<&ColumnInfo, QueryError> {
        self.column(name).ok_or_else(|| {
            QueryError::validation(format!("unknown column `{name}` on table `{}`", self.name))
        })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }
}

/// Reads the live column list; `None` when the table does not exist.
pub async fn reflect_table(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Option<TableSchema>, QueryError> {
    validate_identifier(table)?;

    let rows = sqlx::query(
        r#"SELECT name, type, "notnull", dflt_value, pk
           FROM pragma_table_info(?)
           ORDER BY cid"#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;

    if rows.is_empty() {
        return Ok(None);
    }

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        columns.push(ColumnInfo {
            name: row.try_get("name")?,
            declared_type: row.try_get("type")?,
            not_null: row.try_get::<i64, _>("notnull")? != 0,
            default: row.try_get("dflt_value")?,
            primary_key: row.try_get::<i64, _>("pk")? != 0,
        });
    }

    Ok(Some(TableSchema { name: table.to_owned(), columns }))
}

pub async fn require_table(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<TableSchema, QueryError> {
    reflect_table(conn, table).await?.ok_or_else(|| QueryError::TableNotFound(table.to_owned()))
}

pub async fn list_table_names(conn: &mut SqliteConnection) -> Result<Vec<String>, QueryError> {
    let names = sqlx::query_scalar::<_, String>(
        r#"SELECT name FROM sqlite_master
           WHERE type = 'table' AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
           ORDER BY name"#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(names)
}
