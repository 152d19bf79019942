use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use tabletalk_core::errors::{RegistryError, ToolError};

pub type Arguments = Map<String, Value>;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Receives arguments already validated against the tool's schema.
    async fn call(&self, args: Arguments) -> Result<Value>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgType {
    String,
    Integer,
    Float,
    Boolean,
    Mapping,
    Sequence,
}

impl ArgType {
    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Mapping => "mapping",
            Self::Sequence => "sequence",
        }
    }

    fn json_schema(self) -> Value {
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Float => json!({ "type": "number" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Mapping => json!({ "type": "object", "additionalProperties": true }),
            Self::Sequence => json!({ "type": "array", "items": { "type": "object" } }),
        }
    }

    /// Lax coercion: integral floats and numeric strings become integers,
    /// integers and numeric strings become floats, "true"/"false" become
    /// booleans. Anything else must already have the right shape.
    fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (Self::String, value @ Value::String(_)) => Some(value),
            (Self::Integer, Value::Number(number)) => coerce_integer(&number),
            (Self::Integer, Value::String(text)) => {
                text.trim().parse::<i64>().ok().map(Value::from)
            }
            (Self::Float, Value::Number(number)) => {
                number.as_f64().and_then(Number::from_f64).map(Value::Number)
            }
            (Self::Float, Value::String(text)) => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            (Self::Boolean, value @ Value::Bool(_)) => Some(value),
            (Self::Boolean, Value::String(text)) => match text.trim().to_ascii_lowercase().as_str()
            {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (Self::Mapping, value @ Value::Object(_)) => Some(value),
            (Self::Sequence, value @ Value::Array(_)) => Some(value),
            _ => None,
        }
    }
}

fn coerce_integer(number: &Number) -> Option<Value> {
    if let Some(integer) = number.as_i64() {
        return Some(Value::from(integer));
    }
    let float = number.as_f64()?;
    let in_range = float >= i64::MIN as f64 && float <= i64::MAX as f64;
    (float.fract() == 0.0 && in_range).then(|| Value::from(float as i64))
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArgSpec {
    pub name: String,
    pub arg_type: ArgType,
    /// `None` marks the argument as required.
    pub default: Option<Value>,
}

impl ArgSpec {
    pub fn required(name: impl Into<String>, arg_type: ArgType) -> Self {
        Self { name: name.into(), arg_type, default: None }
    }

    pub fn optional(name: impl Into<String>, arg_type: ArgType, default: Value) -> Self {
        Self { name: name.into(), arg_type, default: Some(default) }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Function-calling schema entry handed to the model verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub args: Vec<ArgSpec>,
    handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    pub fn new<H>(name: impl Into<String>, description: impl Into<String>, handler: H) -> Self
    where
        H: ToolHandler + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            args: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }

    pub fn schema(&self) -> FunctionSchema {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for arg in &self.args {
            properties.insert(arg.name.clone(), arg.arg_type.json_schema());
            if arg.is_required() {
                required.push(Value::String(arg.name.clone()));
            }
        }

        FunctionSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Checks and coerces raw arguments; unknown fields are dropped and
    /// defaults filled in.
    pub fn validate(&self, raw: Value) -> Result<Arguments, ToolError> {
        let mut supplied = match raw {
            Value::Object(object) => object,
            Value::Null => Map::new(),
            other => {
                return Err(ToolError::Validation(format!(
                    "arguments for `{}` must be a JSON object, got {}",
                    self.name,
                    json_kind(&other)
                )))
            }
        };

        let mut validated = Map::new();
        for arg in &self.args {
            let value = supplied.remove(&arg.name).filter(|value| !value.is_null());
            let value = match (value, &arg.default) {
                (Some(value), _) => {
                    let kind = json_kind(&value);
                    arg.arg_type.coerce(value).ok_or_else(|| {
                        ToolError::Validation(format!(
                            "argument `{}` of `{}` must be a {}, got {kind}",
                            arg.name,
                            self.name,
                            arg.arg_type.name()
                        ))
                    })?
                }
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(ToolError::Validation(format!(
                        "missing required argument `{}` for `{}`",
                        arg.name, self.name
                    )))
                }
            };
            validated.insert(arg.name.clone(), value);
        }

        Ok(validated)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Arguments exactly as the model produced them.
#[derive(Clone, Debug, PartialEq)]
pub enum RawArguments {
    Text(String),
    Structured(Value),
}

impl RawArguments {
    pub fn parse(&self) -> Result<Value, ToolError> {
        match self {
            Self::Text(text) if text.trim().is_empty() => Ok(Value::Object(Map::new())),
            Self::Text(text) => serde_json::from_str(text).map_err(|error| {
                ToolError::Validation(format!("arguments are not valid JSON: {error}"))
            }),
            Self::Structured(value) => Ok(value.clone()),
        }
    }

    /// Best-effort JSON view for event records.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => self.parse().unwrap_or_else(|_| Value::String(text.clone())),
            Self::Structured(value) => value.clone(),
        }
    }
}

/// Tools in registration order, keyed by unique name.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), RegistryError> {
        if self.index.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateTool(definition.name));
        }
        self.index.insert(definition.name.clone(), self.definitions.len());
        self.definitions.push(definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|position| &self.definitions[*position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|definition| definition.name.as_str()).collect()
    }

    pub fn describe_all(&self) -> Vec<FunctionSchema> {
        self.definitions.iter().map(ToolDefinition::schema).collect()
    }

    pub async fn dispatch(&self, name: &str, raw: &RawArguments) -> Result<Value, ToolError> {
        let definition = self.get(name).ok_or_else(|| ToolError::UnknownTool(name.to_owned()))?;
        let args = definition.validate(raw.parse()?)?;

        definition.handler.call(args).await.map_err(|error| match error.downcast::<ToolError>() {
            Ok(tool_error) => tool_error,
            Err(other) => ToolError::Execution(format!("{other:#}")),
        })
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tabletalk_core::errors::{RegistryError, ToolError};

    use super::{
        ArgSpec, ArgType, Arguments, RawArguments, ToolDefinition, ToolHandler, ToolRegistry,
    };

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: Arguments) -> Result<Value> {
            Ok(Value::Object(args))
        }
    }

    struct Constant(&'static str);

    #[async_trait]
    impl ToolHandler for Constant {
        async fn call(&self, _args: Arguments) -> Result<Value> {
            Ok(json!(self.0))
        }
    }

    struct Failing(Option<ToolError>);

    #[async_trait]
    impl ToolHandler for Failing {
        async fn call(&self, _args: Arguments) -> Result<Value> {
            match &self.0 {
                Some(error) => Err(error.clone().into()),
                None => Err(anyhow!("disk on fire")),
            }
        }
    }

    fn echo_tool() -> ToolDefinition {
        ToolDefinition::new("echo", "Echo validated arguments.", Echo)
            .arg(ArgSpec::required("table", ArgType::String))
            .arg(ArgSpec::optional("limit", ArgType::Integer, Value::Null))
            .arg(ArgSpec::optional("ratio", ArgType::Float, json!(1.0)))
            .arg(ArgSpec::optional("percent", ArgType::Boolean, json!(true)))
            .arg(ArgSpec::optional("where", ArgType::Mapping, json!({})))
            .arg(ArgSpec::optional("columns", ArgType::Sequence, Value::Null))
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool()).expect("register echo");
        registry
    }

    async fn echo(registry: &ToolRegistry, args: Value) -> Result<Value, ToolError> {
        registry.dispatch("echo", &RawArguments::Structured(args)).await
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_first_definition() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDefinition::new("ping", "first", Constant("first"))).expect("first");

        let error = registry
            .register(ToolDefinition::new("ping", "second", Constant("second")))
            .expect_err("duplicate must fail");
        assert_eq!(error, RegistryError::DuplicateTool("ping".to_owned()));

        assert_eq!(registry.len(), 1);
        let result = registry
            .dispatch("ping", &RawArguments::Text(String::new()))
            .await
            .expect("dispatch ping");
        assert_eq!(result, json!("first"));
    }

    #[test]
    fn describe_all_maps_types_and_keeps_order() {
        let mut registry = registry();
        registry.register(ToolDefinition::new("ping", "Ping.", Constant("pong"))).expect("ping");

        let schemas = registry.describe_all();
        let names: Vec<&str> = schemas.iter().map(|schema| schema.name.as_str()).collect();
        assert_eq!(names, ["echo", "ping"]);
        assert_eq!(registry.names(), names);

        let parameters = &schemas[0].parameters;
        assert_eq!(parameters["type"], "object");
        assert_eq!(parameters["required"], json!(["table"]));
        let property_names: Vec<&String> =
            parameters["properties"].as_object().expect("properties").keys().collect();
        assert_eq!(property_names, ["table", "limit", "ratio", "percent", "where", "columns"]);
        assert_eq!(parameters["properties"]["ratio"], json!({"type": "number"}));
        assert_eq!(
            parameters["properties"]["where"],
            json!({"type": "object", "additionalProperties": true})
        );
        assert_eq!(
            parameters["properties"]["columns"],
            json!({"type": "array", "items": {"type": "object"}})
        );
        assert_eq!(schemas[1].parameters["required"], json!([]));
    }

    #[tokio::test]
    async fn dispatch_fills_defaults_and_ignores_unknown_fields() {
        let registry = registry();

        let args = echo(&registry, json!({"table": "items", "surprise": 1})).await.expect("ok");
        assert_eq!(
            args,
            json!({
                "table": "items",
                "limit": null,
                "ratio": 1.0,
                "percent": true,
                "where": {},
                "columns": null
            })
        );
    }

    #[tokio::test]
    async fn dispatch_applies_lax_coercions() {
        let registry = registry();

        let args = echo(
            &registry,
            json!({"table": "items", "limit": 5.0, "ratio": "0.5", "percent": "false"}),
        )
        .await
        .expect("coerced");
        assert_eq!(args["limit"], json!(5));
        assert_eq!(args["ratio"], json!(0.5));
        assert_eq!(args["percent"], json!(false));

        let args = echo(&registry, json!({"table": "items", "limit": "12", "ratio": 3}))
            .await
            .expect("coerced");
        assert_eq!(args["limit"], json!(12));
        assert_eq!(args["ratio"], json!(3.0));
    }

    #[tokio::test]
    async fn dispatch_rejects_missing_and_mismatched_arguments() {
        let registry = registry();

        let missing = echo(&registry, json!({"limit": 3})).await.expect_err("missing table");
        assert!(matches!(missing, ToolError::Validation(ref message) if message.contains("table")));

        let null_required = echo(&registry, json!({"table": null})).await.expect_err("null");
        assert!(matches!(null_required, ToolError::Validation(_)));

        let fractional = echo(&registry, json!({"table": "t", "limit": 2.5})).await;
        assert!(matches!(fractional, Err(ToolError::Validation(_))));

        let wrong_shape = echo(&registry, json!({"table": "t", "where": ["a"]})).await;
        assert!(matches!(wrong_shape, Err(ToolError::Validation(_))));

        let not_object = echo(&registry, json!(["table"])).await;
        assert!(matches!(not_object, Err(ToolError::Validation(_))));
    }

    #[tokio::test]
    async fn text_arguments_are_parsed_or_rejected() {
        let registry = registry();

        let parsed = registry
            .dispatch("echo", &RawArguments::Text(r#"{"table": "items"}"#.to_owned()))
            .await
            .expect("parsed");
        assert_eq!(parsed["table"], "items");

        let broken = registry.dispatch("echo", &RawArguments::Text("{table:".to_owned())).await;
        assert!(matches!(broken, Err(ToolError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let registry = registry();

        let error = registry
            .dispatch("launch_rockets", &RawArguments::Structured(json!({})))
            .await
            .expect_err("unknown tool");
        assert_eq!(error, ToolError::UnknownTool("launch_rockets".to_owned()));
    }

    #[tokio::test]
    async fn handler_failures_keep_typed_errors_and_wrap_the_rest() {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDefinition::new(
                "typed",
                "Fails with a typed error.",
                Failing(Some(ToolError::TableNotFound("orders".to_owned()))),
            ))
            .expect("typed");
        registry
            .register(ToolDefinition::new("untyped", "Fails with anything.", Failing(None)))
            .expect("untyped");

        let empty = RawArguments::Structured(json!({}));
        assert_eq!(
            registry.dispatch("typed", &empty).await,
            Err(ToolError::TableNotFound("orders".to_owned()))
        );
        assert_eq!(
            registry.dispatch("untyped", &empty).await,
            Err(ToolError::Execution("disk on fire".to_owned()))
        );
    }
}
