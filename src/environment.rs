//! Shared environments - permissioned tool execution over mutable state

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::brain::ToolDeclaration;
use crate::error::GuildError;
use crate::tools::{ToolContext, ToolOutcome, ToolRegistry};

/// A stamped event raised by a tool execution
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentEvent {
    pub name: String,
    pub data: Value,
    pub environment_id: String,
    /// Agent whose tool call raised it; excluded from the broadcast
    pub source_agent: String,
    pub at: DateTime<Utc>,
}

/// A named domain of shared mutable state plus the tools usable in it.
///
/// The state lock is held across tool execution, so executions within one
/// environment are strictly serialized while other environments proceed
/// in parallel.
pub struct Environment {
    pub id: String,
    state: Mutex<Value>,
    registry: Arc<ToolRegistry>,
    /// Tools declared available in this domain, in config order
    tool_names: Vec<String>,
    /// Tool name -> allowed roles; a missing entry means any role
    permissions: HashMap<String, Vec<String>>,
}

impl Environment {
    pub fn new(
        id: impl Into<String>,
        initial_state: Value,
        registry: Arc<ToolRegistry>,
        tool_names: Vec<String>,
        permissions: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(initial_state),
            registry,
            tool_names,
            permissions,
        }
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> Value {
        self.state.lock().await.clone()
    }

    /// Replace the state wholesale.
    pub async fn set_state(&self, state: Value) {
        *self.state.lock().await = state;
    }

    fn role_allowed(&self, tool: &str, role: &str) -> bool {
        match self.permissions.get(tool) {
            Some(roles) => roles.iter().any(|allowed| allowed == role),
            None => true,
        }
    }

    /// Tools the given role may call here, as brain declarations.
    pub fn permitted_tools(&self, role: &str) -> Vec<ToolDeclaration> {
        self.tool_names
            .iter()
            .filter(|name| self.role_allowed(name, role))
            .filter_map(|name| self.registry.get(name))
            .map(|tool| ToolDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// Execute a named tool against this environment's state.
    ///
    /// Permission is checked before execution. The returned event is
    /// stamped with origin and time; broadcasting it is the caller's job.
    #[instrument(skip(self, args, ctx), fields(environment = %self.id, tool = name, agent = %ctx.agent))]
    pub async fn execute_tool(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<(ToolOutcome, Option<EnvironmentEvent>), GuildError> {
        if !self.tool_names.iter().any(|n| n == name) {
            return Err(GuildError::ToolNotFound(name.to_string()));
        }
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| GuildError::ToolNotFound(name.to_string()))?;
        if !self.role_allowed(name, &ctx.role) {
            return Err(GuildError::PermissionDenied {
                tool: name.to_string(),
                role: ctx.role.clone(),
            });
        }

        let mut state = self.state.lock().await;
        let outcome = tool
            .execute(args, ctx, &state)
            .await
            .map_err(|e| GuildError::ToolFailed {
                tool: name.to_string(),
                message: format!("{e:#}"),
            })?;
        *state = outcome.new_state.clone();
        drop(state);

        debug!("Tool execution applied");
        let event = outcome.event.clone().map(|draft| EnvironmentEvent {
            name: draft.name,
            data: draft.data,
            environment_id: self.id.clone(),
            source_agent: ctx.agent.clone(),
            at: Utc::now(),
        });
        Ok((outcome, event))
    }
}
