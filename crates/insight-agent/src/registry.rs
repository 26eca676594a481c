//! Tool registry.
//!
//! The registry is the single source of truth for what the model may call
//! during one run.  It is a plain value: every run builds its own from a set
//! of [`ToolRegistrar`]s, so tool sets never leak between runs.
//!
//! [`ToolRegistry::invoke`] is the only path through which a model can cause a
//! side effect: one lookup, JSON parse, schema validation, then the handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use crate::context::RunContext;
use crate::error::{AgentError, Result};
use crate::llm::types::ToolDefinition;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Executes one tool.  Arguments have already passed schema validation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool and return a JSON result for the model.
    async fn execute(&self, args: Value, ctx: &mut RunContext) -> Result<Value>;
}

/// Contributes a group of tools to a freshly built registry.
pub trait ToolRegistrar: Send + Sync {
    /// Register this group's tools.
    ///
    /// # Errors
    ///
    /// Propagates [`AgentError::DuplicateTool`] or schema compilation errors.
    fn register_tools(&self, registry: &mut ToolRegistry) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Tool specification
// ---------------------------------------------------------------------------

/// Everything needed to register a tool.
pub struct ToolSpec {
    /// Unique name the model calls the tool by.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema for the arguments object.
    pub input_schema: Value,
    /// A successful call ends the conversation loop.
    pub is_final: bool,
    /// Executes the tool.
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolSpec {
    /// Describe an intermediate tool.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            is_final: false,
            handler,
        }
    }

    /// Mark the tool as terminal.
    #[must_use]
    pub fn final_tool(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// Result of a successful [`ToolRegistry::invoke`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Copied from the tool's declaration.
    pub is_final: bool,
    /// Whatever the handler returned.
    pub content: Value,
}

struct RegisteredTool {
    definition: ToolDefinition,
    validator: JSONSchema,
    is_final: bool,
    handler: Arc<dyn ToolHandler>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name-keyed set of tools for one run.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    /// Registration order, used for listing.
    order: Vec<String>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a set of registrars.
    ///
    /// # Errors
    ///
    /// Fails on the first registrar that reports an error.
    pub fn from_registrars(registrars: &[Arc<dyn ToolRegistrar>]) -> Result<Self> {
        let mut registry = Self::new();
        for registrar in registrars {
            registrar.register_tools(&mut registry)?;
        }
        Ok(registry)
    }

    /// Remove every tool.
    pub fn clear(&mut self) {
        self.tools.clear();
        self.order.clear();
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::DuplicateTool`] if the name is taken and
    /// [`AgentError::ConfigError`] if the input schema does not compile.  In
    /// both cases the registry is left unchanged.
    pub fn register(&mut self, spec: ToolSpec) -> Result<()> {
        if self.tools.contains_key(&spec.name) {
            return Err(AgentError::DuplicateTool {
                tool_name: spec.name,
            });
        }

        let validator = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&spec.input_schema)
            .map_err(|e| AgentError::ConfigError {
                reason: format!("invalid input schema for tool `{}`: {e}", spec.name),
            })?;

        tracing::debug!(tool = %spec.name, is_final = spec.is_final, "registered tool");

        self.order.push(spec.name.clone());
        self.tools.insert(
            spec.name.clone(),
            RegisteredTool {
                definition: ToolDefinition {
                    name: spec.name,
                    description: spec.description,
                    input_schema: spec.input_schema,
                },
                validator,
                is_final: spec.is_final,
                handler: spec.handler,
            },
        );
        Ok(())
    }

    /// Tool definitions in registration order, without handlers.
    pub fn list_for_model(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition.clone())
            .collect()
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Whether `name` is registered as a final tool.
    pub fn is_final(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|t| t.is_final)
    }

    /// Name of the first registered final tool, if any.
    pub fn final_tool_name(&self) -> Option<&str> {
        self.order
            .iter()
            .find(|name| self.tools.get(*name).is_some_and(|t| t.is_final))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate `args_json` against the tool's schema and execute it.
    ///
    /// # Errors
    ///
    /// - [`AgentError::UnknownTool`] if `name` is not registered.
    /// - [`AgentError::ValidationError`] carrying the parse or schema error.
    /// - Whatever the handler returns.
    pub async fn invoke(
        &self,
        name: &str,
        args_json: &str,
        ctx: &mut RunContext,
    ) -> Result<ToolOutcome> {
        let tool = self.tools.get(name).ok_or_else(|| AgentError::UnknownTool {
            tool_name: name.to_owned(),
        })?;

        let args: Value =
            serde_json::from_str(args_json).map_err(|e| AgentError::ValidationError {
                reason: format!("arguments for `{name}` are not valid JSON: {e}"),
            })?;

        validate_args(name, &tool.validator, &args)?;

        let content = tool.handler.execute(args, ctx).await?;
        Ok(ToolOutcome {
            is_final: tool.is_final,
            content,
        })
    }
}

fn validate_args(name: &str, validator: &JSONSchema, args: &Value) -> Result<()> {
    if let Err(errors) = validator.validate(args) {
        let messages: Vec<String> = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        return Err(AgentError::ValidationError {
            reason: format!(
                "arguments for `{name}` do not match the schema: {}",
                messages.join("; ")
            ),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
