//! Tool definition system: a polymorphic capability exposing a name,
//! description, declarative JSON-schema input, and a cancellable,
//! async execution operation.

use crate::cancellation::CancellationSignal;
use crate::types::{ThreadId, ToolResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

/// Context handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub thread_id: ThreadId,
    pub cancellation: CancellationSignal,
    pub working_dir: PathBuf,
}

/// A tool: schema-validated input, a cancellable async handler.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema (draft-07-ish subset) describing valid input.
    fn schema(&self) -> &Value;
    /// Run the tool. Called only after `schema()` validation has passed.
    /// Must observe `context.cancellation` and return promptly with
    /// `status: Aborted` when it trips.
    async fn execute_validated(&self, args: Value, context: &ToolContext) -> ToolResult;
}

type HandlerFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;
type HandlerFn = dyn Fn(Value, ToolContext) -> HandlerFuture + Send + Sync;

/// A tool built from a name/description/schema/handler tuple, as
/// produced by [`ToolBuilder`].
pub struct FunctionTool {
    name: String,
    description: String,
    schema: Value,
    handler: Arc<HandlerFn>,
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &Value {
        &self.schema
    }

    async fn execute_validated(&self, args: Value, context: &ToolContext) -> ToolResult {
        (self.handler)(args, context.clone()).await
    }
}

/// Scalar JSON-Schema types a parameter can declare, used to
/// auto-generate the `properties` entry for [`ToolBuilder::param`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn schema_type(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// Fluent builder for a [`FunctionTool`], generating its JSON Schema
/// from declared parameters rather than requiring one hand-written.
pub struct ToolBuilder {
    name: String,
    description: String,
    properties: Map<String, Value>,
    required: Vec<String>,
    handler: Option<Arc<HandlerFn>>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        ToolBuilder {
            name: name.into(),
            description: description.into(),
            properties: Map::new(),
            required: Vec::new(),
            handler: None,
        }
    }

    /// Declare a parameter; `required` adds it to the schema's
    /// `required` array.
    pub fn param(
        mut self,
        name: impl Into<String>,
        kind: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            serde_json::json!({
                "type": kind.schema_type(),
                "description": description.into(),
            }),
        );
        if required {
            self.required.push(name);
        }
        self
    }

    /// Set the async handler. Takes validated arguments and a
    /// [`ToolContext`]; returns a [`ToolResult`] (never an `Err` — tool
    /// failures are reported via `ToolResult::is_error`).
    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |args, ctx| Box::pin(handler(args, ctx))));
        self
    }

    pub fn build(self) -> crate::error::Result<FunctionTool> {
        let handler = self
            .handler
            .ok_or_else(|| crate::error::Error::config("tool handler is required"))?;
        let schema = serde_json::json!({
            "type": "object",
            "properties": Value::Object(self.properties),
            "required": self.required,
        });
        Ok(FunctionTool {
            name: self.name,
            description: self.description,
            schema,
            handler,
        })
    }
}

/// Start building a tool: `tool("name", "description").param(...).handler(...).build()`.
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

/// Validate `args` against `schema`'s `required` array and declared
/// property types. Intentionally a lightweight subset of JSON Schema —
/// enough to catch missing/mistyped arguments without pulling in a full
/// schema-validation crate.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let obj = args
        .as_object()
        .ok_or_else(|| "arguments must be a JSON object".to_string())?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for req in required {
            let Some(key) = req.as_str() else { continue };
            if !obj.contains_key(key) {
                return Err(format!("missing required argument: {key}"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in obj {
            let Some(prop_schema) = properties.get(key) else {
                continue; // unknown extra keys are tolerated
            };
            let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !matches_json_type(expected, value) {
                return Err(format!(
                    "argument '{key}' expected type '{expected}', got '{}'",
                    json_type_name(value)
                ));
            }
        }
    }

    Ok(())
}

fn matches_json_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
