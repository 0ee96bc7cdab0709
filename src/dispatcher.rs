//! Function-call dispatch
//!
//! Decouples the speech providers from the property-search collaborator. The
//! dispatcher checks structural shape only and forwards the request as is; it
//! never retries.

use crate::{ConciergeError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// A structured function call emitted by the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    pub name: String,
    pub args: Map<String, Value>,
}

impl FunctionCallRequest {
    pub fn new(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Build a request from provider output
    ///
    /// Arguments may arrive as a JSON object, a JSON-encoded string (streamed
    /// tool arguments), or be absent.
    pub fn from_provider(name: &str, arguments: &Value) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConciergeError::DispatchFailed(
                "function call has no name".to_string(),
            ));
        }

        let args = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            Value::String(raw) if raw.trim().is_empty() => Map::new(),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    return Err(ConciergeError::DispatchFailed(format!(
                        "arguments for '{}' must be an object, got {}",
                        name,
                        json_type(&other)
                    )))
                }
                Err(e) => {
                    return Err(ConciergeError::DispatchFailed(format!(
                        "arguments for '{}' are not valid JSON: {}",
                        name, e
                    )))
                }
            },
            other => {
                return Err(ConciergeError::DispatchFailed(format!(
                    "arguments for '{}' must be an object, got {}",
                    name,
                    json_type(other)
                )))
            }
        };

        Ok(Self::new(name, args))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Result handed back to the originating provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResult {
    pub data: Value,
}

impl FunctionCallResult {
    pub fn new(data: Value) -> Self {
        Self { data }
    }
}

/// The application capability behind function calls (property search)
#[async_trait]
pub trait PropertySearch: Send + Sync {
    async fn handle_function_call(&self, request: FunctionCallRequest) -> Result<FunctionCallResult>;
}

/// Thin forwarder from providers to the property-search collaborator
#[derive(Clone)]
pub struct FunctionCallDispatcher {
    collaborator: Arc<dyn PropertySearch>,
}

impl FunctionCallDispatcher {
    pub fn new(collaborator: Arc<dyn PropertySearch>) -> Self {
        Self { collaborator }
    }

    /// Forward a request unmodified and return the collaborator's result
    ///
    /// Any collaborator failure surfaces as `DispatchFailed`.
    pub async fn dispatch(&self, request: FunctionCallRequest) -> Result<FunctionCallResult> {
        let name = request.name.clone();
        debug!("Dispatching function call '{}'", name);

        match self.collaborator.handle_function_call(request).await {
            Ok(result) => Ok(result),
            Err(ConciergeError::DispatchFailed(msg)) => {
                warn!("Function call '{}' failed: {}", name, msg);
                Err(ConciergeError::DispatchFailed(msg))
            }
            Err(e) => {
                warn!("Function call '{}' failed: {}", name, e);
                Err(ConciergeError::DispatchFailed(e.to_string()))
            }
        }
    }
}
