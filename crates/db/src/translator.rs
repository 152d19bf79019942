use std::collections::HashSet;
use std::time::Instant;

use serde_json::{json, Value};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::connection::DbPool;
use crate::error::QueryError;
use crate::payload::{
    AddColumn, Aggregate, AggregateOp, ColumnArg, ColumnSpec, CreateTable, Delete, DropColumn,
    Granularity, GroupBy, Insert, JoinSelect, QueryPayload, RenameColumn, Row, Select, TableRef,
    TimeSeries, Update,
};
use crate::rows::{decode_row, decode_value, OutputColumn, Statement};
use crate::schema::{
    ident, list_table_names, quote_ident, require_table, validate_identifier, ColumnInfo,
    ColumnType, TableSchema,
};

/// Turns validated JSON payloads into parameterized SQL against the pool.
///
/// Each call runs inside its own transaction: committed on success, rolled
/// back when an error propagates or the future is dropped. Writing actions
/// open with `BEGIN IMMEDIATE` so lock contention waits on `busy_timeout`.
#[derive(Clone, Debug)]
pub struct QueryTranslator {
    pool: DbPool,
}

impl QueryTranslator {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn execute(&self, payload: Value) -> Result<Value, QueryError> {
        let payload = QueryPayload::parse(payload)?;
        self.run(payload).await
    }

    pub async fn run(&self, payload: QueryPayload) -> Result<Value, QueryError> {
        let action = payload.action();
        let started = Instant::now();
        let mut tx = if payload.writes() {
            self.pool.begin_with("BEGIN IMMEDIATE").await?
        } else {
            self.pool.begin().await?
        };

        let result = match payload {
            QueryPayload::CreateTable(create) => create_table(&mut tx, create).await?,
            QueryPayload::AddColumn(add) => add_column(&mut tx, add).await?,
            QueryPayload::DropColumn(drop) => drop_column(&mut tx, drop).await?,
            QueryPayload::RenameColumn(rename) => rename_column(&mut tx, rename).await?,
            QueryPayload::DropTable(target) => drop_table(&mut tx, target).await?,
            QueryPayload::ListTables {} => list_tables(&mut tx).await?,
            QueryPayload::DescribeTable(target) => describe_table(&mut tx, target).await?,
            QueryPayload::Insert(insert) => insert_rows(&mut tx, insert).await?,
            QueryPayload::Select(select) => select_rows(&mut tx, select).await?,
            QueryPayload::Update(update) => update_rows(&mut tx, update).await?,
            QueryPayload::Delete(delete) => delete_rows(&mut tx, delete).await?,
            QueryPayload::Aggregate(aggregate) => aggregate_column(&mut tx, aggregate).await?,
            QueryPayload::GroupBy(group_by) => group_counts(&mut tx, group_by).await?,
            QueryPayload::TimeSeries(series) => time_series(&mut tx, series).await?,
            QueryPayload::JoinSelect(join) => join_select(&mut tx, join).await?,
        };

        tx.commit().await?;
        debug!(
            event_name = "db.query.executed",
            action,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "structured query executed"
        );

        Ok(result)
    }
}

async fn create_table(
    conn: &mut SqliteConnection,
    create: CreateTable,
) -> Result<Value, QueryError> {
    let table = ident(&create.table)?;

    let definitions = if create.columns.is_empty() {
        vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident("id"))]
    } else {
        column_definitions(&create.columns)?
    };

    Statement::new(format!("CREATE TABLE IF NOT EXISTS {table} ({})", definitions.join(", ")))
        .execute(conn)
        .await?;

    let schema = require_table(conn, &create.table).await?;
    Ok(json!({ "created": create.table, "columns": schema.column_names() }))
}

fn column_definitions(columns: &[ColumnSpec]) -> Result<Vec<String>, QueryError> {
    let mut seen = HashSet::new();
    let primary_keys: Vec<&str> = columns
        .iter()
        .filter(|column| column.primary_key)
        .map(|column| column.name.as_str())
        .collect();

    let mut definitions = Vec::with_capacity(columns.len() + 1);
    for column in columns {
        let name = ident(&column.name)?;
        if !seen.insert(column.name.to_ascii_lowercase()) {
            return Err(QueryError::validation(format!("duplicate column `{}`", column.name)));
        }
        let type_name = column.type_name.as_deref().ok_or_else(|| {
            QueryError::validation(format!("column `{}` requires a `type`", column.name))
        })?;
        let column_type = ColumnType::parse(type_name)?;

        let mut definition = format!("{name} {}", column_type.sql_type());
        if column.primary_key && primary_keys.len() == 1 {
            definition.push_str(" PRIMARY KEY");
        }
        if !column.is_nullable() {
            definition.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            definition.push_str(&format!(" DEFAULT {}", default_literal(default)?));
        }
        definitions.push(definition);
    }

    if primary_keys.len() > 1 {
        let keys: Vec<String> = primary_keys.iter().map(|key| quote_ident(key)).collect();
        definitions.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }

    Ok(definitions)
}

fn default_literal(value: &Value) -> Result<String, QueryError> {
    match value {
        Value::Null => Ok("NULL".to_owned()),
        Value::Bool(flag) => Ok(if *flag { "1" } else { "0" }.to_owned()),
        Value::Number(number) => Ok(number.to_string()),
        Value::String(text) => Ok(format!("'{}'", text.replace('\'', "''"))),
        Value::Array(_) | Value::Object(_) => {
            Err(QueryError::validation("column defaults must be scalar values"))
        }
    }
}

async fn add_column(conn: &mut SqliteConnection, add: AddColumn) -> Result<Value, QueryError> {
    let table = ident(&add.table)?;
    let column_name = add.column.name().to_owned();
    let column = ident(&column_name)?;
    let column_type = ColumnType::parse(add.type_name())?;
    let constraints = match &add.column {
        ColumnArg::Spec(spec) => added_column_constraints(spec)?,
        ColumnArg::Name(_) => String::new(),
    };

    let schema = require_table(conn, &add.table).await?;
    if !schema.has_column(&column_name) {
        Statement::new(format!(
            "ALTER TABLE {table} ADD COLUMN {column} {}{constraints}",
            column_type.sql_type()
        ))
        .execute(conn)
        .await?;
    }

    Ok(json!({ "added_column": column_name, "table": add.table }))
}

/// `ALTER TABLE ADD COLUMN` cannot add a primary key, and a NOT NULL
/// column needs a non-null default to fill existing rows.
fn added_column_constraints(spec: &ColumnSpec) -> Result<String, QueryError> {
    if spec.primary_key {
        return Err(QueryError::validation(format!(
            "column `{}` cannot be added as a primary key; declare it in `create_table`",
            spec.name
        )));
    }

    let default = spec.default.as_ref().filter(|value| !value.is_null());
    let mut constraints = String::new();
    if !spec.is_nullable() {
        if default.is_none() {
            return Err(QueryError::validation(format!(
                "NOT NULL column `{}` requires a non-null `default`",
                spec.name
            )));
        }
        constraints.push_str(" NOT NULL");
    }
    if let Some(default) = &spec.default {
        constraints.push_str(&format!(" DEFAULT {}", default_literal(default)?));
    }
    Ok(constraints)
}

async fn drop_column(conn: &mut SqliteConnection, drop: DropColumn) -> Result<Value, QueryError> {
    let table = ident(&drop.table)?;
    let column_name = drop.column.name().to_owned();
    let column = ident(&column_name)?;

    let schema = require_table(conn, &drop.table).await?;
    if schema.has_column(&column_name) {
        Statement::new(format!("ALTER TABLE {table} DROP COLUMN {column}")).execute(conn).await?;
    }

    Ok(json!({ "dropped_column": column_name, "table": drop.table }))
}

async fn rename_column(
    conn: &mut SqliteConnection,
    rename: RenameColumn,
) -> Result<Value, QueryError> {
    let table = ident(&rename.table)?;
    let old_name = ident(&rename.old_name)?;
    let new_name = ident(&rename.new_name)?;

    let schema = require_table(conn, &rename.table).await?;
    let current = schema.require_column(&rename.old_name)?;
    let clashes = schema.column(&rename.new_name).is_some_and(|existing| existing != current);
    if clashes {
        return Err(QueryError::validation(format!(
            "column `{}` already exists on table `{}`",
            rename.new_name, rename.table
        )));
    }

    Statement::new(format!("ALTER TABLE {table} RENAME COLUMN {old_name} TO {new_name}"))
        .execute(conn)
        .await?;

    Ok(json!({ "renamed": rename.old_name, "new_name": rename.new_name, "table": rename.table }))
}

/// Idempotent. Tables created here never declare foreign keys, so there is
/// nothing to cascade to.
async fn drop_table(conn: &mut SqliteConnection, target: TableRef) -> Result<Value, QueryError> {
    let table = ident(&target.table)?;
    Statement::new(format!("DROP TABLE IF EXISTS {table}")).execute(conn).await?;
    Ok(json!({ "dropped_table": target.table }))
}

async fn list_tables(conn: &mut SqliteConnection) -> Result<Value, QueryError> {
    let mut tables = Vec::new();
    for name in list_table_names(conn).await? {
        let rows = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {}",
            quote_ident(&name)
        ))
        .fetch_one(&mut *conn)
        .await?;
        tables.push(json!({ "table": name, "rows": rows }));
    }
    Ok(Value::Array(tables))
}

async fn describe_table(
    conn: &mut SqliteConnection,
    target: TableRef,
) -> Result<Value, QueryError> {
    let schema = require_table(conn, &target.table).await?;
    let columns: Vec<Value> = schema.columns.iter().map(|column| column.describe()).collect();
    Ok(json!({ "table": schema.name, "columns": columns }))
}

async fn insert_rows(conn: &mut SqliteConnection, insert: Insert) -> Result<Value, QueryError> {
    let table = ident(&insert.table)?;
    let schema = require_table(conn, &insert.table).await?;
    let rows = insert.values.map(|values| values.into_rows()).unwrap_or_default();

    let mut inserted = 0;
    for row in rows {
        let statement = if row.is_empty() {
            Statement::new(format!("INSERT INTO {table} DEFAULT VALUES"))
        } else {
            let mut columns = Vec::with_capacity(row.len());
            let mut statement = Statement::default();
            for (name, value) in row {
                columns.push(quote_ident(&schema.require_column(&name)?.name));
                statement.push_param(value);
            }
            let placeholders = vec!["?"; columns.len()].join(", ");
            statement.sql =
                format!("INSERT INTO {table} ({}) VALUES ({placeholders})", columns.join(", "));
            statement
        };
        inserted += statement.execute(conn).await?;
    }

    Ok(json!({ "inserted": inserted }))
}

async fn select_rows(conn: &mut SqliteConnection, select: Select) -> Result<Value, QueryError> {
    let table = ident(&select.table)?;
    let schema = require_table(conn, &select.table).await?;

    let output = match &select.columns {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|name| schema.require_column(name).map(output_column))
            .collect::<Result<Vec<_>, _>>()?,
        _ => schema.columns.iter().map(output_column).collect(),
    };
    let projection: Vec<String> = output.iter().map(|column| quote_ident(&column.key)).collect();

    let mut statement = Statement::new(format!("SELECT {} FROM {table}", projection.join(", ")));
    append_filter(&mut statement, table_conditions(&schema, select.filter.as_ref())?);
    append_paging(&mut statement, select.limit, select.offset);

    fetch_objects(conn, &statement, &output).await
}

async fn update_rows(conn: &mut SqliteConnection, update: Update) -> Result<Value, QueryError> {
    let table = ident(&update.table)?;
    let schema = require_table(conn, &update.table).await?;
    let conditions = table_conditions(&schema, update.filter.as_ref())?;

    let mut statement = Statement::default();
    let mut assignments = Vec::with_capacity(update.values.len());
    for (name, value) in update.values {
        assignments.push(format!("{} = ?", quote_ident(&schema.require_column(&name)?.name)));
        statement.push_param(value);
    }
    statement.sql = format!("UPDATE {table} SET {}", assignments.join(", "));
    append_filter(&mut statement, conditions);

    let updated = statement.execute(conn).await?;
    Ok(json!({ "updated": updated }))
}

async fn delete_rows(conn: &mut SqliteConnection, delete: Delete) -> Result<Value, QueryError> {
    let table = ident(&delete.table)?;
    let schema = require_table(conn, &delete.table).await?;

    let mut statement = Statement::new(format!("DELETE FROM {table}"));
    append_filter(&mut statement, table_conditions(&schema, delete.filter.as_ref())?);

    let deleted = statement.execute(conn).await?;
    Ok(json!({ "deleted": deleted }))
}

async fn aggregate_column(
    conn: &mut SqliteConnection,
    aggregate: Aggregate,
) -> Result<Value, QueryError> {
    let table = ident(&aggregate.table)?;
    let schema = require_table(conn, &aggregate.table).await?;

    let (expression, boolean) = match (aggregate.operation, aggregate.column.as_deref()) {
        (AggregateOp::Count, _) => ("COUNT(*)".to_owned(), false),
        (operation, Some(column)) => {
            let info = schema.require_column(column)?;
            let function = operation.as_str().to_ascii_uppercase();
            let keeps_type = matches!(operation, AggregateOp::Min | AggregateOp::Max);
            (format!("{function}({})", quote_ident(&info.name)), keeps_type && info.is_boolean())
        }
        (operation, None) => {
            return Err(QueryError::validation(format!(
                "`aggregate` requires `column` for operation `{}`",
                operation.as_str()
            )))
        }
    };

    let mut statement = Statement::new(format!("SELECT {expression} FROM {table}"));
    append_filter(&mut statement, table_conditions(&schema, aggregate.filter.as_ref())?);

    let rows = statement.fetch_all(conn).await?;
    let value = match rows.first() {
        Some(row) => decode_value(row, 0, boolean)?,
        None => Value::Null,
    };

    Ok(json!({
        "table": aggregate.table,
        "operation": aggregate.operation.as_str(),
        "value": value,
    }))
}

async fn group_counts(conn: &mut SqliteConnection, group_by: GroupBy) -> Result<Value, QueryError> {
    let table = ident(&group_by.table)?;
    let schema = require_table(conn, &group_by.table).await?;
    let info = schema.require_column(&group_by.column)?;
    let column = quote_ident(&info.name);

    let statement = Statement::new(format!(
        "SELECT {column}, COUNT(*) FROM {table} GROUP BY {column} \
         ORDER BY COUNT(*) DESC, {column} ASC"
    ));
    let boolean = info.is_boolean();

    let mut groups = Vec::new();
    for row in statement.fetch_all(conn).await? {
        let value = decode_value(&row, 0, boolean)?;
        let count = decode_value(&row, 1, false)?.as_i64().unwrap_or_default();
        groups.push((value, count));
    }

    let total: i64 = groups.iter().map(|(_, count)| count).sum();
    let top_n = usize::try_from(group_by.top_n).unwrap_or(usize::MAX);
    let rows: Vec<Value> = groups
        .into_iter()
        .take(top_n)
        .map(|(value, count)| {
            let mut entry = json!({ "value": value, "count": count });
            if group_by.percent && total > 0 {
                entry["percent"] = json!(percent_of(count, total));
            }
            entry
        })
        .collect();

    Ok(json!({
        "table": group_by.table,
        "group_by": group_by.column,
        "rows": rows,
        "total": total,
    }))
}

fn percent_of(count: i64, total: i64) -> f64 {
    (count as f64 / total as f64 * 10_000.0).round() / 100.0
}

async fn time_series(conn: &mut SqliteConnection, series: TimeSeries) -> Result<Value, QueryError> {
    let table = ident(&series.table)?;
    let schema = require_table(conn, &series.table).await?;
    let column = quote_ident(&schema.require_column(&series.column)?.name);
    let bucket = bucket_expression(&column, series.granularity);

    let statement = Statement::new(format!(
        "SELECT {bucket} AS bucket, COUNT(*) AS count FROM {table} \
         WHERE {bucket} IS NOT NULL GROUP BY 1 ORDER BY 1 ASC"
    ));
    let output = [OutputColumn::new("bucket", false), OutputColumn::new("count", false)];

    fetch_objects(conn, &statement, &output).await
}

/// Truncates a timestamp column to the start of its bucket. Weeks start on
/// Monday.
fn bucket_expression(column: &str, granularity: Granularity) -> String {
    match granularity {
        Granularity::Hour => format!("strftime('%Y-%m-%d %H:00:00', {column})"),
        Granularity::Day => format!("strftime('%Y-%m-%d 00:00:00', {column})"),
        Granularity::Week => {
            format!("strftime('%Y-%m-%d 00:00:00', {column}, 'weekday 0', '-6 days')")
        }
        Granularity::Month => format!("strftime('%Y-%m-01 00:00:00', {column})"),
        Granularity::Year => format!("strftime('%Y-01-01 00:00:00', {column})"),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    fn alias(self) -> &'static str {
        match self {
            Self::Left => "l",
            Self::Right => "r",
        }
    }
}

async fn join_select(conn: &mut SqliteConnection, join: JoinSelect) -> Result<Value, QueryError> {
    let left_table = ident(&join.left_table)?;
    let right_table = ident(&join.right_table)?;
    let left = require_table(conn, &join.left_table).await?;
    let right = require_table(conn, &join.right_table).await?;
    let left_key = quote_ident(&left.require_column(&join.left_key)?.name);
    let right_key = quote_ident(&right.require_column(&join.right_key)?.name);

    let requested: Vec<(JoinSide, String)> = match &join.columns {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|column| match column.split_once('.') {
                Some((prefix, name)) => Ok((join_side(prefix, column)?, name.to_owned())),
                None => Err(QueryError::validation(format!(
                    "join column `{column}` must be prefixed with `left.` or `right.`"
                ))),
            })
            .collect::<Result<_, _>>()?,
        _ => left
            .column_names()
            .into_iter()
            .map(|name| (JoinSide::Left, name))
            .chain(right.column_names().into_iter().map(|name| (JoinSide::Right, name)))
            .collect(),
    };

    let mut used_keys = HashSet::new();
    let mut projection = Vec::with_capacity(requested.len());
    let mut output = Vec::with_capacity(requested.len());
    for (side, name) in requested {
        let schema = side_schema(side, &left, &right);
        let info = schema.require_column(&name)?;
        let key = if used_keys.contains(&info.name) {
            format!("{}.{}", schema.name, info.name)
        } else {
            info.name.clone()
        };
        used_keys.insert(key.clone());
        projection.push(format!("{}.{}", side.alias(), quote_ident(&info.name)));
        output.push(OutputColumn::new(key, info.is_boolean()));
    }

    let mut conditions = Vec::new();
    for (key, value) in join.filter.iter().flatten() {
        let (side, name) = match key.split_once('.') {
            Some((prefix, name)) => (join_side(prefix, key)?, name),
            None => (JoinSide::Left, key.as_str()),
        };
        let info = side_schema(side, &left, &right).require_column(name)?;
        conditions.push((format!("{}.{}", side.alias(), quote_ident(&info.name)), value.clone()));
    }

    let mut statement = Statement::new(format!(
        "SELECT {} FROM {left_table} AS l JOIN {right_table} AS r ON l.{left_key} = r.{right_key}",
        projection.join(", ")
    ));
    append_filter(&mut statement, conditions);
    append_paging(&mut statement, join.limit, None);

    fetch_objects(conn, &statement, &output).await
}

fn join_side(prefix: &str, original: &str) -> Result<JoinSide, QueryError> {
    match prefix {
        "left" => Ok(JoinSide::Left),
        "right" => Ok(JoinSide::Right),
        _ => Err(QueryError::validation(format!(
            "`{original}` must use a `left.` or `right.` prefix"
        ))),
    }
}

fn side_schema<'a>(
    side: JoinSide,
    left: &'a TableSchema,
    right: &'a TableSchema,
) -> &'a TableSchema {
    match side {
        JoinSide::Left => left,
        JoinSide::Right => right,
    }
}

fn output_column(info: &ColumnInfo) -> OutputColumn {
    OutputColumn::new(&info.name, info.is_boolean())
}

/// Resolves `where` keys against one table's schema.
fn table_conditions(
    schema: &TableSchema,
    filter: Option<&Row>,
) -> Result<Vec<(String, Value)>, QueryError> {
    let mut conditions = Vec::new();
    for (name, value) in filter.into_iter().flatten() {
        validate_identifier(name)?;
        let info = schema.require_column(name)?;
        conditions.push((quote_ident(&info.name), value.clone()));
    }
    Ok(conditions)
}

/// Equality filters joined with AND; `null` compares with `IS NULL`.
fn append_filter(statement: &mut Statement, conditions: Vec<(String, Value)>) {
    if conditions.is_empty() {
        return;
    }

    let mut clauses = Vec::with_capacity(conditions.len());
    for (column, value) in conditions {
        if value.is_null() {
            clauses.push(format!("{column} IS NULL"));
        } else {
            clauses.push(format!("{column} = ?"));
            statement.push_param(value);
        }
    }
    statement.sql.push_str(" WHERE ");
    statement.sql.push_str(&clauses.join(" AND "));
}

fn append_paging(statement: &mut Statement, limit: Option<i64>, offset: Option<i64>) {
    match (limit, offset) {
        (None, None) => {}
        (limit, offset) => {
            statement.sql.push_str(" LIMIT ?");
            statement.push_param(json!(limit.unwrap_or(-1)));
            if let Some(offset) = offset {
                statement.sql.push_str(" OFFSET ?");
                statement.push_param(json!(offset));
            }
        }
    }
}

async fn fetch_objects(
    conn: &mut SqliteConnection,
    statement: &Statement,
    output: &[OutputColumn],
) -> Result<Value, QueryError> {
    let rows = statement.fetch_all(conn).await?;
    let objects =
        rows.iter().map(|row| decode_row(row, output)).collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(objects))
}
