use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::QueryError;

pub type Row = Map<String, Value>;

pub const SUPPORTED_ACTIONS: &[&str] = &[
    "create_table",
    "create",
    "add_column",
    "drop_column",
    "rename_column",
    "drop_table",
    "delete_table",
    "drop",
    "list_tables",
    "show_tables",
    "describe_table",
    "insert",
    "select",
    "list",
    "update",
    "delete",
    "aggregate",
    "group_by",
    "time_series",
    "join_select",
];

/// A validated translator request, keyed by `action`.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QueryPayload {
    #[serde(alias = "create")]
    CreateTable(CreateTable),
    AddColumn(AddColumn),
    DropColumn(DropColumn),
    RenameColumn(RenameColumn),
    #[serde(alias = "delete_table", alias = "drop")]
    DropTable(TableRef),
    #[serde(alias = "show_tables")]
    ListTables {},
    DescribeTable(TableRef),
    Insert(Insert),
    #[serde(alias = "list")]
    Select(Select),
    Update(Update),
    Delete(Delete),
    Aggregate(Aggregate),
    GroupBy(GroupBy),
    TimeSeries(TimeSeries),
    JoinSelect(JoinSelect),
}

impl QueryPayload {
    pub fn parse(value: Value) -> Result<Self, QueryError> {
        let Some(object) = value.as_object() else {
            return Err(QueryError::validation("payload must be a JSON object"));
        };
        let action = match object.get("action") {
            Some(Value::String(action)) => action.clone(),
            Some(_) => return Err(QueryError::validation("`action` must be a string")),
            None => return Err(QueryError::validation("missing `action` in payload")),
        };
        if !SUPPORTED_ACTIONS.contains(&action.as_str()) {
            return Err(QueryError::validation(format!(
                "unsupported action `{action}` (supported: {})",
                SUPPORTED_ACTIONS.join(", ")
            )));
        }

        let payload: Self = serde_json::from_value(value).map_err(|error| {
            QueryError::validation(format!("invalid `{action}` payload: {error}"))
        })?;
        payload.check()?;
        Ok(payload)
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::CreateTable(_) => "create_table",
            Self::AddColumn(_) => "add_column",
            Self::DropColumn(_) => "drop_column",
            Self::RenameColumn(_) => "rename_column",
            Self::DropTable(_) => "drop_table",
            Self::ListTables {} => "list_tables",
            Self::DescribeTable(_) => "describe_table",
            Self::Insert(_) => "insert",
            Self::Select(_) => "select",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
            Self::Aggregate(_) => "aggregate",
            Self::GroupBy(_) => "group_by",
            Self::TimeSeries(_) => "time_series",
            Self::JoinSelect(_) => "join_select",
        }
    }

    /// True for actions that may change schema or rows.
    pub fn writes(&self) -> bool {
        !matches!(
            self,
            Self::ListTables {}
                | Self::DescribeTable(_)
                | Self::Select(_)
                | Self::Aggregate(_)
                | Self::GroupBy(_)
                | Self::TimeSeries(_)
                | Self::JoinSelect(_)
        )
    }

    /// Checks that need no database access.
    fn check(&self) -> Result<(), QueryError> {
        match self {
            Self::Insert(insert) => match &insert.values {
                None => Err(QueryError::validation("`insert` requires `values` (or `data`)")),
                Some(RowValues::Many(rows)) if rows.is_empty() => {
                    Err(QueryError::validation("`insert` requires at least one row"))
                }
                Some(_) => Ok(()),
            },
            Self::Update(update) if update.values.is_empty() => {
                Err(QueryError::validation("`update` requires non-empty `values`"))
            }
            Self::Aggregate(aggregate)
                if aggregate.operation != AggregateOp::Count && aggregate.column.is_none() =>
            {
                Err(QueryError::validation(format!(
                    "`aggregate` requires `column` for operation `{}`",
                    aggregate.operation.as_str()
                )))
            }
            Self::GroupBy(group_by) if group_by.top_n < 1 => {
                Err(QueryError::validation("`top_n` must be at least 1"))
            }
            Self::Select(select) => check_paging(select.limit, select.offset),
            Self::JoinSelect(join) => check_paging(join.limit, None),
            _ => Ok(()),
        }
    }
}

fn check_paging(limit: Option<i64>, offset: Option<i64>) -> Result<(), QueryError> {
    if limit.is_some_and(|limit| limit < 0) {
        return Err(QueryError::validation("`limit` must not be negative"));
    }
    if offset.is_some_and(|offset| offset < 0) {
        return Err(QueryError::validation("`offset` must not be negative"));
    }
    Ok(())
}

#[derive(Clone, Debug, Deserialize)]
pub struct TableRef {
    pub table: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type", alias = "data_type", default)]
    pub type_name: Option<String>,
    #[serde(alias = "pk", default)]
    pub primary_key: bool,
    #[serde(default)]
    pub nullable: Option<bool>,
    #[serde(default)]
    pub not_null: Option<bool>,
    #[serde(default)]
    pub default: Option<Value>,
}

impl ColumnSpec {
    /// `not_null` wins over `nullable` when both are present.
    pub fn is_nullable(&self) -> bool {
        match self.not_null {
            Some(not_null) => !not_null,
            None => self.nullable.unwrap_or(true),
        }
    }
}

/// A column given either as a full spec or by name alone.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ColumnArg {
    Spec(ColumnSpec),
    Name(String),
}

impl ColumnArg {
    pub fn name(&self) -> &str {
        match self {
            Self::Spec(spec) => &spec.name,
            Self::Name(name) => name,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RowValues {
    One(Row),
    Many(Vec<Row>),
}

impl RowValues {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::One(row) => vec![row],
            Self::Many(rows) => rows,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateTable {
    pub table: String,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AddColumn {
    pub table: String,
    pub column: ColumnArg,
    #[serde(default)]
    pub data_type: Option<String>,
}

impl AddColumn {
    pub fn type_name(&self) -> &str {
        let from_spec = match &self.column {
            ColumnArg::Spec(spec) => spec.type_name.as_deref(),
            ColumnArg::Name(_) => None,
        };
        from_spec.or(self.data_type.as_deref()).unwrap_or("text")
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DropColumn {
    pub table: String,
    pub column: ColumnArg,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RenameColumn {
    pub table: String,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Insert {
    pub table: String,
    #[serde(alias = "data", default)]
    pub values: Option<RowValues>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Select {
    pub table: String,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(rename = "where", default)]
    pub filter: Option<Row>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub table: String,
    #[serde(alias = "data")]
    pub values: Row,
    #[serde(rename = "where", default)]
    pub filter: Option<Row>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Delete {
    pub table: String,
    #[serde(rename = "where", default)]
    pub filter: Option<Row>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum AggregateOp {
    #[default]
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl TryFrom<String> for AggregateOp {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            _ => Err(format!(
                "unsupported aggregate operation `{value}` (allowed: count, sum, avg, min, max)"
            )),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Aggregate {
    pub table: String,
    #[serde(alias = "field", default)]
    pub column: Option<String>,
    #[serde(alias = "agg", default)]
    pub operation: AggregateOp,
    #[serde(rename = "where", default)]
    pub filter: Option<Row>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GroupBy {
    pub table: String,
    pub column: String,
    #[serde(default = "default_top_n")]
    pub top_n: i64,
    #[serde(default = "default_percent")]
    pub percent: bool,
}

fn default_top_n() -> i64 {
    10
}

fn default_percent() -> bool {
    true
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Granularity {
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl TryFrom<String> for Granularity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            _ => Err(format!("granularity must be hour/day/week/month/year, got `{value}`")),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TimeSeries {
    pub table: String,
    #[serde(default = "default_time_column")]
    pub column: String,
    #[serde(default)]
    pub granularity: Granularity,
}

fn default_time_column() -> String {
    "created_at".to_owned()
}

#[derive(Clone, Debug, Deserialize)]
pub struct JoinSelect {
    pub left_table: String,
    pub right_table: String,
    pub left_key: String,
    pub right_key: String,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(rename = "where", default)]
    pub filter: Option<Row>,
    #[serde(default)]
    pub limit: Option<i64>,
}
