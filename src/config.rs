//! Declarative organization configuration

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::SYSTEM_SPEAKER;
use crate::error::GuildError;
use crate::org::{Permissions, Role};
use crate::orchestrator::ORCHESTRATOR_ADDRESS;
use crate::workflow::Sop;

fn default_calls_per_minute() -> usize {
    30
}

fn default_state() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Brain rate and budget settings for a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: usize,
    #[serde(default)]
    pub max_total_calls: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            calls_per_minute: default_calls_per_minute(),
            max_total_calls: None,
        }
    }
}

/// One declared environment domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub id: String,
    #[serde(default = "default_state")]
    pub initial_state: Value,
    /// Names of registered tools available in this domain
    #[serde(default)]
    pub tools: Vec<String>,
    /// Tool name -> roles allowed to call it; missing entry means any
    #[serde(default)]
    pub permissions: HashMap<String, Vec<String>>,
}

/// One agent in the org chart; subordinates nest recursively
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentNode {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub environment_id: Option<String>,
    /// Lessons the agent starts with
    #[serde(default)]
    pub memory: Vec<String>,
    #[serde(default)]
    pub subordinates: Vec<AgentNode>,
}

/// Root configuration for one organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgConfig {
    pub name: String,
    #[serde(default)]
    pub llm: LlmConfig,
    pub master_agent: AgentNode,
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
    #[serde(default)]
    pub sop_library: Vec<Sop>,
}

impl OrgConfig {
    pub fn from_json(raw: &str) -> Result<Self, GuildError> {
        serde_json::from_str(raw).map_err(|e| GuildError::Config(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, GuildError> {
        let raw = std::fs::read_to_string(path).map_err(|e| GuildError::Config(e.to_string()))?;
        Self::from_json(&raw)
    }

    /// Every agent node, parents before their subordinates.
    pub fn agent_nodes(&self) -> Vec<&AgentNode> {
        let mut nodes = Vec::new();
        let mut stack = vec![&self.master_agent];
        while let Some(node) = stack.pop() {
            nodes.push(node);
            for sub in node.subordinates.iter().rev() {
                stack.push(sub);
            }
        }
        nodes
    }

    /// Structural checks before an organization is built: unique,
    /// non-reserved agent names and resolvable environment references.
    pub fn validate(&self) -> Result<(), GuildError> {
        let environment_ids: HashSet<&str> =
            self.environments.iter().map(|e| e.id.as_str()).collect();
        if environment_ids.len() != self.environments.len() {
            return Err(GuildError::Config(
                "duplicate environment id".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for node in self.agent_nodes() {
            if node.name.is_empty() {
                return Err(GuildError::Config("agent with empty name".to_string()));
            }
            if node.name == ORCHESTRATOR_ADDRESS || node.name == SYSTEM_SPEAKER {
                return Err(GuildError::Config(format!(
                    "agent name '{}' is reserved",
                    node.name
                )));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(GuildError::Config(format!(
                    "duplicate agent name '{}'",
                    node.name
                )));
            }
            if let Some(env) = &node.environment_id {
                if !environment_ids.contains(env.as_str()) {
                    return Err(GuildError::Config(format!(
                        "agent '{}' references undeclared environment '{env}'",
                        node.name
                    )));
                }
            }
        }
        Ok(())
    }
}
