//! Tool definition and registry.
//!
//! Tools allow the model to perform actions. This module provides:
//!
//! - [`Tool`] trait - Define custom tools the model can call
//! - [`ErasedTool`] - Object-safe form stored by the registry
//! - [`ToolRegistry`] - Collection of available tools, executed as a batch per turn
//!
//! # Implementing a Tool
//!
//! ```
//! use anyhow::Result;
//! use serde_json::{Value, json};
//! use veloca_agent::{Tool, ToolResult};
//!
//! struct GetWeather;
//!
//! // No #[async_trait] needed
//! impl Tool for GetWeather {
//!     fn name(&self) -> &str { "get_weather" }
//!     fn description(&self) -> &str { "Current weather for a city" }
//!     fn parameters(&self) -> Value {
//!         json!({
//!             "type": "object",
//!             "properties": { "city": { "type": "string" } },
//!             "required": ["city"]
//!         })
//!     }
//!
//!     async fn execute(&self, input: Value) -> Result<ToolResult> {
//!         let city = input["city"].as_str().unwrap_or("somewhere");
//!         Ok(ToolResult::success(format!("Sunny in {city}")))
//!     }
//! }
//! ```

use crate::llm::{ToolCall, ToolDefinition};
use crate::stores::ToolCallResult;
use crate::types::ToolResult;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Definition of a tool that can be called by the agent.
///
/// Uses native async functions in traits; the `async_trait` crate is not needed to
/// implement it.
pub trait Tool: Send + Sync {
    /// Function name the model calls.
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's arguments.
    fn parameters(&self) -> Value;

    /// Execute the tool with parsed arguments.
    ///
    /// # Errors
    /// Returns an error if tool execution fails. The error text is fed back to the
    /// model as the call's result.
    fn execute(&self, input: Value) -> impl Future<Output = Result<ToolResult>> + Send;
}

/// Object-safe view of a [`Tool`].
#[async_trait]
pub trait ErasedTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn execute(&self, input: Value) -> Result<ToolResult>;
}

struct ToolWrapper<T>(T);

#[async_trait]
impl<T: Tool + 'static> ErasedTool for ToolWrapper<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn parameters(&self) -> Value {
        self.0.parameters()
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        self.0.execute(input).await
    }
}

/// Registry of available tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ErasedTool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool + 'static,
    {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(ToolWrapper(tool)));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedTool>> {
        self.tools.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Remove tools whose name fails `predicate`.
    pub fn filter<F>(&mut self, predicate: F)
    where
        F: Fn(&str) -> bool,
    {
        self.tools.retain(|name, _| predicate(name));
    }

    /// Tool definitions for a model request, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<_> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Execute one call. Never fails: problems become the result's error.
    pub async fn execute(&self, call: &ToolCall) -> ToolCallResult {
        let Some(tool) = self.get(&call.name) else {
            log::warn!("Model called unknown tool {}", call.name);
            return ToolCallResult::failure(&call.id, &call.name, format!("Unknown tool: {}", call.name));
        };

        let input = if call.arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str::<Value>(&call.arguments) {
                Ok(input) => input,
                Err(e) => {
                    log::warn!("Invalid arguments for tool {}: {e}", call.name);
                    return ToolCallResult::failure(
                        &call.id,
                        &call.name,
                        format!("Invalid tool arguments: {e}"),
                    );
                }
            }
        };

        let started = Instant::now();
        let outcome = tool.execute(input).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match outcome {
            Ok(result) if result.success => ToolCallResult::success(&call.id, &call.name, result.output),
            Ok(result) => ToolCallResult::failure(&call.id, &call.name, result.output),
            Err(e) => {
                log::warn!("Tool {} failed: {e:#}", call.name);
                ToolCallResult::failure(&call.id, &call.name, format!("{e:#}"))
            }
        };
        result.with_duration(duration_ms)
    }

    /// Execute all calls concurrently. Results come back in call order.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolCallResult> {
        futures::future::join_all(calls.iter().map(|call| self.execute(call))).await
    }
}
