use serde_json::{Map, Number, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, TypeInfo, ValueRef};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQL text plus positional parameters, built by the translator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new() }
    }

    pub fn push_param(&mut self, value: Value) {
        self.params.push(value);
    }

    pub async fn execute(&self, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
        let result = self.bound().execute(conn).await?;
        Ok(result.rows_affected())
    }

    pub async fn fetch_all(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Vec<SqliteRow>, sqlx::Error> {
        self.bound().fetch_all(conn).await
    }

    fn bound(&self) -> SqliteQuery<'_> {
        self.params.iter().fold(sqlx::query(&self.sql), bind_json)
    }
}

fn bind_json<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(flag) => query.bind(*flag),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                query.bind(integer)
            } else if let Some(float) = number.as_f64() {
                query.bind(float)
            } else {
                query.bind(number.to_string())
            }
        }
        Value::String(text) => query.bind(text.clone()),
        other => query.bind(other.to_string()),
    }
}

/// One output column of a projection: the key it gets in the JSON row and
/// whether its declared type is boolean.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputColumn {
    pub key: String,
    pub boolean: bool,
}

impl OutputColumn {
    pub fn new(key: impl Into<String>, boolean: bool) -> Self {
        Self { key: key.into(), boolean }
    }
}

pub fn decode_row(row: &SqliteRow, columns: &[OutputColumn]) -> Result<Value, sqlx::Error> {
    let mut object = Map::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        object.insert(column.key.clone(), decode_value(row, index, column.boolean)?);
    }
    Ok(Value::Object(object))
}

/// Decodes by storage class, since SQLite columns are dynamically typed.
pub fn decode_value(row: &SqliteRow, index: usize, boolean: bool) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_owned();

    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => {
            let integer = row.try_get_unchecked::<i64, _>(index)?;
            if boolean {
                Value::Bool(integer != 0)
            } else {
                Value::Number(integer.into())
            }
        }
        "REAL" | "NUMERIC" => {
            let float = row.try_get_unchecked::<f64, _>(index)?;
            Number::from_f64(float).map(Value::Number).unwrap_or(Value::Null)
        }
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            Value::String(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    };

    Ok(value)
}
