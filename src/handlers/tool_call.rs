//! The `tool.call` handler and the tool registry behind it.

use crate::queue::{
    ports::{HandlerError, TaskContext},
    services::TypedTaskHandler,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Task type served by [`ToolCallHandler`].
pub const TOOL_CALL_TASK_TYPE: &str = "tool.call";

/// Primitive JSON types an argument may be constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    /// A JSON string.
    String,
    /// A JSON number without a fractional part.
    Integer,
    /// Any JSON number.
    Number,
    /// A JSON boolean.
    Boolean,
}

impl ArgType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// Minimal argument schema: the allowed keys, their types and which of them
/// are required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgSchema {
    properties: BTreeMap<String, ArgType>,
    required: BTreeSet<String>,
}

impl ArgSchema {
    /// Creates a schema accepting no arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows an optional argument of type `arg_type`.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, arg_type: ArgType) -> Self {
        self.properties.insert(name.into(), arg_type);
        self
    }

    /// Allows and requires an argument of type `arg_type`.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, arg_type: ArgType) -> Self {
        let key = name.into();
        self.required.insert(key.clone());
        self.properties.insert(key, arg_type);
        self
    }

    /// Checks `args` against the schema.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Failed`] of kind `InvalidArgs` naming the
    /// first missing, unexpected or mistyped argument.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), HandlerError> {
        if let Some(missing) = self.required.iter().find(|key| !args.contains_key(*key)) {
            return Err(invalid_args(format!("missing required arg: {missing}")));
        }
        for (key, value) in args {
            let Some(arg_type) = self.properties.get(key) else {
                return Err(invalid_args(format!("unexpected arg: {key}")));
            };
            if !arg_type.accepts(value) {
                return Err(invalid_args(format!(
                    "arg '{key}' must be {}",
                    arg_type.label()
                )));
            }
        }
        Ok(())
    }
}

fn invalid_args(message: String) -> HandlerError {
    HandlerError::failed("InvalidArgs", message)
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Runs the tool with arguments already checked against its schema.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when the tool fails or observes
    /// cancellation.
    async fn call(&self, ctx: &TaskContext, args: &Map<String, Value>)
    -> Result<Value, HandlerError>;
}

/// A named tool with its description and argument schema.
#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: String,
    schema: ArgSchema,
    tool: Arc<dyn Tool>,
}

impl ToolSpec {
    /// Creates a tool specification.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ArgSchema,
        tool: Arc<dyn Tool>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            tool,
        }
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tool description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the argument schema.
    #[must_use]
    pub const fn schema(&self) -> &ArgSchema {
        &self.schema
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Errors raised while building a [`ToolRegistry`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolRegistryError {
    /// A tool with this name is already registered.
    #[error("tool already registered: {0}")]
    AlreadyRegistered(String),
}

/// Tools addressable by name from `tool.call` tasks.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the `ping` and `sleep` tools.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the error type is shared with
    /// [`ToolRegistry::register`].
    pub fn with_builtins() -> Result<Self, ToolRegistryError> {
        let mut registry = Self::new();
        registry.register(ToolSpec::new(
            "ping",
            "Connectivity check: echoes a message.",
            ArgSchema::new().optional("message", ArgType::String),
            Arc::new(PingTool),
        ))?;
        registry.register(ToolSpec::new(
            "sleep",
            "Waits for the given number of seconds, stopping early on cancellation.",
            ArgSchema::new().required("seconds", ArgType::Number),
            Arc::new(SleepTool),
        ))?;
        Ok(registry)
    }

    /// Adds a tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryError::AlreadyRegistered`] for a duplicate name.
    pub fn register(&mut self, spec: ToolSpec) -> Result<(), ToolRegistryError> {
        if self.tools.contains_key(spec.name()) {
            return Err(ToolRegistryError::AlreadyRegistered(spec.name().to_owned()));
        }
        self.tools.insert(spec.name().to_owned(), spec);
        Ok(())
    }

    /// Returns the tool named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    /// Returns the registered tool names in lexical order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Validates `args` and runs the tool named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Failed`] of kind `UnknownTool` or
    /// `InvalidArgs`, or the tool's own error.
    pub async fn run(
        &self,
        ctx: &TaskContext,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, HandlerError> {
        let spec = self
            .get(name)
            .ok_or_else(|| HandlerError::failed("UnknownTool", format!("unknown tool: {name}")))?;
        spec.schema.validate(args)?;
        spec.tool.call(ctx, args).await
    }
}

/// Payload of a `tool.call` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCall {
    /// Name of the tool to run.
    pub tool: String,
    /// Tool arguments.
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Handler for `tool.call` tasks.
#[derive(Debug, Clone)]
pub struct ToolCallHandler {
    tools: Arc<ToolRegistry>,
}

impl ToolCallHandler {
    /// Creates a handler dispatching into `tools`.
    #[must_use]
    pub const fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl TypedTaskHandler for ToolCallHandler {
    type Payload = ToolCall;
    type Output = Value;

    async fn handle(&self, ctx: &TaskContext, payload: ToolCall) -> Result<Value, HandlerError> {
        tracing::debug!(task_id = %ctx.task_id(), tool = %payload.tool, "running tool");
        self.tools.run(ctx, &payload.tool, &payload.args).await
    }
}

struct PingTool;

#[async_trait]
impl Tool for PingTool {
    async fn call(
        &self,
        _ctx: &TaskContext,
        args: &Map<String, Value>,
    ) -> Result<Value, HandlerError> {
        let echo = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("pong");
        Ok(json!({ "tool": "ping", "echo": echo }))
    }
}

struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    async fn call(&self, ctx: &TaskContext, args: &Map<String, Value>) -> Result<Value, HandlerError> {
        let seconds = args
            .get("seconds")
            .and_then(Value::as_f64)
            .ok_or_else(|| invalid_args("arg 'seconds' must be number".to_owned()))?;
        let wait = Duration::try_from_secs_f64(seconds)
            .map_err(|err| invalid_args(format!("arg 'seconds' is out of range: {err}")))?;
        tokio::select! {
            () = tokio::time::sleep(wait) => Ok(json!({ "tool": "sleep", "slept_s": seconds })),
            () = ctx.cancellation().cancelled() => Err(HandlerError::Canceled),
        }
    }
}
