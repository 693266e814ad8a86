//! Built-in task handlers shipped with the worker binary.
//!
//! [`register_builtin_handlers`] wires every built-in into a
//! [`HandlerRegistry`]; currently that is the `tool.call` handler backed by
//! a [`ToolRegistry`] holding the `ping` and `sleep` tools.

mod tool_call;

pub use tool_call::{
    ArgSchema, ArgType, TOOL_CALL_TASK_TYPE, Tool, ToolCall, ToolCallHandler, ToolRegistry,
    ToolRegistryError, ToolSpec,
};

use crate::queue::{
    domain::{TaskDomainError, TaskType},
    services::{HandlerRegistry, RegistryError},
};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while registering built-in handlers.
#[derive(Debug, Error)]
pub enum BuiltinSetupError {
    /// A built-in task type name is invalid.
    #[error(transparent)]
    TaskType(#[from] TaskDomainError),

    /// A built-in task type is already taken in the registry.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A built-in tool clashes with another tool.
    #[error(transparent)]
    Tool(#[from] ToolRegistryError),
}

/// Registers every built-in handler into `registry`.
///
/// # Errors
///
/// Returns [`BuiltinSetupError`] when a built-in task type is already
/// registered.
pub fn register_builtin_handlers(registry: &mut HandlerRegistry) -> Result<(), BuiltinSetupError> {
    let tools = Arc::new(ToolRegistry::with_builtins()?);
    registry.register_typed(
        TaskType::new(TOOL_CALL_TASK_TYPE)?,
        ToolCallHandler::new(tools),
    )?;
    Ok(())
}
