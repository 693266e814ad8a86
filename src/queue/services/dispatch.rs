//! Handler registry and typed payload adaptation.

use crate::queue::{
    domain::{Document, TaskType},
    ports::{HandlerError, TaskContext, TaskHandler},
};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Handler working on a decoded payload instead of a raw document.
///
/// Wrap it in [`TypedHandler`] (or use [`HandlerRegistry::register_typed`])
/// to register it; payloads that do not decode fail with
/// [`HandlerError::InvalidPayload`] before the handler runs.
#[async_trait]
pub trait TypedTaskHandler: Send + Sync {
    /// Payload shape accepted by the handler.
    type Payload: DeserializeOwned + Send;
    /// Result shape produced by the handler.
    type Output: Serialize + Send;

    /// Runs the task.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] describing the failure.
    async fn handle(
        &self,
        ctx: &TaskContext,
        payload: Self::Payload,
    ) -> Result<Self::Output, HandlerError>;
}

/// Adapts a [`TypedTaskHandler`] to the untyped [`TaskHandler`] port.
#[derive(Debug, Clone)]
pub struct TypedHandler<H> {
    inner: H,
}

impl<H> TypedHandler<H> {
    /// Wraps a typed handler.
    #[must_use]
    pub const fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H> TaskHandler for TypedHandler<H>
where
    H: TypedTaskHandler,
{
    async fn execute(
        &self,
        ctx: &TaskContext,
        payload: &Document,
    ) -> Result<Document, HandlerError> {
        let decoded = payload
            .decode::<H::Payload>()
            .map_err(|err| HandlerError::InvalidPayload(err.to_string()))?;
        let output = self.inner.handle(ctx, decoded).await?;
        Document::encode(&output).map_err(|err| HandlerError::failed("EncodeError", err.to_string()))
    }
}

/// Errors raised while building a [`HandlerRegistry`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A handler is already registered for the task type.
    #[error("handler for task type '{0}' is already registered")]
    AlreadyRegistered(TaskType),
}

/// Maps task types to the handlers that execute them.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `task_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] when the type already
    /// has a handler.
    pub fn register(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    /// Registers a typed handler for `task_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] when the type already
    /// has a handler.
    pub fn register_typed<H>(&mut self, task_type: TaskType, handler: H) -> Result<(), RegistryError>
    where
        H: TypedTaskHandler + 'static,
    {
        self.register(task_type, Arc::new(TypedHandler::new(handler)))
    }

    /// Returns the handler for `task_type`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::UnknownType`] when nothing is registered.
    pub fn resolve(&self, task_type: &TaskType) -> Result<Arc<dyn TaskHandler>, HandlerError> {
        self.handlers
            .get(task_type)
            .cloned()
            .ok_or_else(|| HandlerError::UnknownType(task_type.clone()))
    }

    /// Returns `true` when a handler exists for `task_type`.
    #[must_use]
    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Returns the registered task types in lexical order.
    #[must_use]
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().cloned().collect();
        types.sort_by(|left, right| left.as_str().cmp(right.as_str()));
        types
    }

    /// Resolves the handler for the context's task type and runs it.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::UnknownType`] for unregistered types, or the
    /// handler's own error.
    pub async fn dispatch(
        &self,
        ctx: &TaskContext,
        payload: &Document,
    ) -> Result<Document, HandlerError> {
        let handler = self.resolve(ctx.task_type())?;
        handler.execute(ctx, payload).await
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.registered_types())
            .finish()
    }
}
