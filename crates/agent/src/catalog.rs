use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tabletalk_core::errors::{RegistryError, ToolError};
use tabletalk_db::QueryTranslator;

use crate::tools::{ArgSpec, ArgType, Arguments, ToolDefinition, ToolHandler, ToolRegistry};

/// Forwards validated tool arguments to the translator under a fixed action.
struct TranslatorTool {
    translator: QueryTranslator,
    action: &'static str,
}

#[async_trait]
impl ToolHandler for TranslatorTool {
    async fn call(&self, mut args: Arguments) -> Result<Value> {
        args.insert("action".to_owned(), Value::String(self.action.to_owned()));
        self.translator
            .execute(Value::Object(args))
            .await
            .map_err(|error| ToolError::from(error).into())
    }
}

fn tool(
    translator: &QueryTranslator,
    name: &str,
    action: &'static str,
    description: &str,
) -> ToolDefinition {
    let handler = TranslatorTool { translator: translator.clone(), action };
    ToolDefinition::new(name, description, handler)
}

fn table() -> ArgSpec {
    ArgSpec::required("table", ArgType::String)
}

fn filter() -> ArgSpec {
    ArgSpec::optional("where", ArgType::Mapping, json!({}))
}

/// Registers the database tool catalog in a fixed order.
pub fn register_database_tools(
    registry: &mut ToolRegistry,
    translator: &QueryTranslator,
) -> Result<(), RegistryError> {
    let definitions = vec![
        tool(translator, "list_tables", "list_tables", "List all database tables with row counts."),
        tool(
            translator,
            "describe_table",
            "describe_table",
            "Describe a table's columns, types, and constraints.",
        )
        .arg(table()),
        tool(
            translator,
            "create_table",
            "create_table",
            "Create a new table; optional columns list with {name,type,pk,not_null} objects.",
        )
        .arg(table())
        .arg(ArgSpec::optional("columns", ArgType::Sequence, json!([]))),
        tool(translator, "add_column", "add_column", "Add a column to an existing table.")
            .arg(table())
            .arg(ArgSpec::required("column", ArgType::String))
            .arg(ArgSpec::optional("data_type", ArgType::String, json!("text"))),
        tool(translator, "drop_column", "drop_column", "Drop a column from a table if it exists.")
            .arg(table())
            .arg(ArgSpec::required("column", ArgType::String)),
        tool(translator, "rename_column", "rename_column", "Rename a column of a table.")
            .arg(table())
            .arg(ArgSpec::required("old_name", ArgType::String))
            .arg(ArgSpec::required("new_name", ArgType::String)),
        tool(translator, "drop_table", "drop_table", "Drop a table if it exists.").arg(table()),
        tool(translator, "insert_rows", "insert", "Insert a single row into a table.")
            .arg(table())
            .arg(ArgSpec::required("values", ArgType::Mapping)),
        tool(translator, "select_rows", "select", "Select rows from a table with optional filters.")
            .arg(table())
            .arg(filter())
            .arg(ArgSpec::optional("columns", ArgType::Sequence, Value::Null))
            .arg(ArgSpec::optional("limit", ArgType::Integer, Value::Null))
            .arg(ArgSpec::optional("offset", ArgType::Integer, Value::Null)),
        tool(translator, "update_rows", "update", "Update rows matching equality filters.")
            .arg(table())
            .arg(ArgSpec::required("values", ArgType::Mapping))
            .arg(filter()),
        tool(translator, "delete_rows", "delete", "Delete rows matching equality filters.")
            .arg(table())
            .arg(filter()),
        tool(
            translator,
            "aggregate",
            "aggregate",
            "Run count, sum, avg, min, or max over a column with optional filters.",
        )
        .arg(table())
        .arg(ArgSpec::optional("operation", ArgType::String, json!("count")))
        .arg(ArgSpec::optional("column", ArgType::String, Value::Null))
        .arg(filter()),
        tool(
            translator,
            "group_by",
            "group_by",
            "Count rows per distinct value of a column, most frequent first.",
        )
        .arg(table())
        .arg(ArgSpec::required("column", ArgType::String))
        .arg(ArgSpec::optional("top_n", ArgType::Integer, json!(10)))
        .arg(ArgSpec::optional("percent", ArgType::Boolean, json!(true))),
        tool(
            translator,
            "time_series",
            "time_series",
            "Count rows per hour, day, week, month, or year of a timestamp column.",
        )
        .arg(table())
        .arg(ArgSpec::optional("column", ArgType::String, json!("created_at")))
        .arg(ArgSpec::optional("granularity", ArgType::String, json!("day"))),
        tool(
            translator,
            "join_select",
            "join_select",
            "Inner-join two tables on key columns; columns are prefixed with left. or right.",
        )
        .arg(ArgSpec::required("left_table", ArgType::String))
        .arg(ArgSpec::required("right_table", ArgType::String))
        .arg(ArgSpec::required("left_key", ArgType::String))
        .arg(ArgSpec::required("right_key", ArgType::String))
        .arg(ArgSpec::optional("columns", ArgType::Sequence, Value::Null))
        .arg(filter())
        .arg(ArgSpec::optional("limit", ArgType::Integer, Value::Null)),
    ];

    for definition in definitions {
        registry.register(definition)?;
    }
    Ok(())
}
