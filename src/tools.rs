//! Tool contract and registry

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::brain::Brain;
use crate::task::TaskId;

/// Identity of the caller, handed to every tool execution
#[derive(Clone)]
pub struct ToolContext {
    /// Name of the executing agent
    pub agent: String,
    /// The agent's role, checked against tool allow-lists
    pub role: String,
    pub task_id: TaskId,
    pub task_goal: String,
    /// The run's governed brain; tool-made calls count against the same
    /// rate window and budget as agent calls.
    pub brain: Arc<dyn Brain>,
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("agent", &self.agent)
            .field("role", &self.role)
            .field("task_id", &self.task_id)
            .field("task_goal", &self.task_goal)
            .finish_non_exhaustive()
    }
}

/// Task-level outcome of a tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    /// Final value for the task
    Value(Value),
    /// Park the task until an operator answers
    NeedHumanInput { question: String },
    /// Park the task while the named agents talk it out
    StartConversation {
        topic: String,
        participants: Vec<String>,
    },
}

/// An event produced by a tool, not yet stamped with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub name: String,
    pub data: Value,
}

/// Everything a tool hands back to its environment
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Replacement environment state; last writer wins
    pub new_state: Value,
    /// Optional event to broadcast to co-located agents
    pub event: Option<EventDraft>,
    pub result: ToolResult,
}

impl ToolOutcome {
    /// A completed execution with a final value.
    pub fn completed(new_state: Value, result: Value) -> Self {
        Self {
            new_state,
            event: None,
            result: ToolResult::Value(result),
        }
    }

    /// A parked execution waiting on an operator.
    pub fn needs_human_input(new_state: Value, question: impl Into<String>) -> Self {
        Self {
            new_state,
            event: None,
            result: ToolResult::NeedHumanInput {
                question: question.into(),
            },
        }
    }

    /// A parked execution waiting on a conversation.
    pub fn starts_conversation(
        new_state: Value,
        topic: impl Into<String>,
        participants: Vec<String>,
    ) -> Self {
        Self {
            new_state,
            event: None,
            result: ToolResult::StartConversation {
                topic: topic.into(),
                participants,
            },
        }
    }

    /// Attach an event to broadcast alongside the outcome.
    pub fn with_event(mut self, name: impl Into<String>, data: Value) -> Self {
        self.event = Some(EventDraft {
            name: name.into(),
            data,
        });
        self
    }
}

/// A capability agents can exercise against an environment.
///
/// Implementations receive the current environment state read-only and
/// return a full replacement; the environment serializes executions so
/// no two tools see the same state concurrently.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, used for lookup and brain function declarations.
    fn name(&self) -> &str;

    /// One-line description surfaced to the brain.
    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(
        &self,
        args: Value,
        ctx: &ToolContext,
        state: &Value,
    ) -> anyhow::Result<ToolOutcome>;
}

/// Name-keyed tool collection, built once at startup and shared read-only
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous one.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
