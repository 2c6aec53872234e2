//! Tool abstractions.
//!
//! Tools themselves (shell, file I/O, web) live outside this workspace. The
//! agent only needs three things from them: a catalog to describe them to the
//! model, an executor to run them, and a stable text result to feed back into
//! the follow-up prompt.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result type for tool operations.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Tool error types.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Invalid arguments provided.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Tool execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Tool not found.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Other error.
    #[error("Tool error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Output of a single [`Tool::execute`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the execution was successful.
    pub success: bool,
    /// The result data.
    pub data: Value,
    /// Optional error message if success is false.
    pub error: Option<String>,
}

impl ToolOutput {
    /// Create a successful output.
    pub fn success(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: data.into(),
            error: None,
        }
    }

    /// Create a failed output.
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
        }
    }

    /// Render `data` as prompt-ready text.
    pub fn text(&self) -> String {
        match &self.data {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// Tool definition for model consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Parameters as JSON Schema.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// `(name, description)` for every schema property, sorted by name.
    ///
    /// `serde_json::Map` iterates its keys alphabetically, so declaration
    /// order in the schema is not kept.
    pub fn parameter_descriptions(&self) -> Vec<(String, String)> {
        self.parameters
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, def)| {
                        let desc = def
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        (name.clone(), desc.to_string())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The parameter a single free-form value should be bound to.
    ///
    /// First required parameter, else the only declared one.
    pub fn primary_parameter(&self) -> Option<String> {
        let required = self
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .and_then(|req| req.first())
            .and_then(Value::as_str);
        if let Some(name) = required {
            return Some(name.to_string());
        }
        let props = self.parameters.get("properties")?.as_object()?;
        if props.len() == 1 {
            props.keys().next().cloned()
        } else {
            None
        }
    }
}

/// Tool trait for function calling.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name.
    fn name(&self) -> &str;

    /// Get the tool description.
    fn description(&self) -> &str;

    /// Get the parameters as JSON Schema.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> Result<ToolOutput>;

    /// Get the full tool definition.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

/// Dynamic tool type.
pub type DynTool = Arc<dyn Tool>;

/// Flattened result of running one tool through a [`ToolExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExecution {
    pub result: String,
    pub success: bool,
    pub error: Option<String>,
}

impl ToolExecution {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: String::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Fixed failure text for a call to an unregistered tool.
pub fn not_found_message(name: &str) -> String {
    format!("tool {name} not found")
}

/// Runs a tool by name. Failures are values, never panics or `Err`s.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: Map<String, Value>) -> ToolExecution;
}

/// Enumerable list of tools available to the model.
pub trait ToolCatalog: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    fn names(&self) -> Vec<String> {
        self.definitions().into_iter().map(|d| d.name).collect()
    }
}

/// Tool registry acting as both catalog and executor.
///
/// Read-only once built, so one instance can back any number of turns.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, DynTool>,
}

impl ToolRegistry {
    /// Create a new tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    pub fn register(&mut self, tool: DynTool) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replacing previously registered tool");
        }
    }

    /// Builder-style registration.
    pub fn with_tool(mut self, tool: DynTool) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&DynTool> {
        self.tools.get(name)
    }

    /// Check if a tool exists.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl ToolCatalog for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, arguments: Map<String, Value>) -> ToolExecution {
        let Some(tool) = self.get(name) else {
            return ToolExecution::failed(not_found_message(name));
        };

        match tool.execute(Value::Object(arguments)).await {
            Ok(output) if output.success => ToolExecution::ok(output.text()),
            Ok(output) => ToolExecution {
                result: output.text(),
                success: false,
                error: Some(
                    output
                        .error
                        .unwrap_or_else(|| format!("tool {name} reported failure")),
                ),
            },
            Err(e) => ToolExecution::failed(e.to_string()),
        }
    }
}

/// Helper to create a JSON Schema object.
pub fn object_schema(properties: Value, required: Vec<String>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Helper to create a string property schema.
pub fn string_property(description: impl Into<String>) -> Value {
    serde_json::json!({
        "type": "string",
        "description": description.into(),
    })
}
