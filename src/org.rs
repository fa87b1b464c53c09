//! Organization directory - flat, name-keyed view of the agent chart

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What an agent is allowed to do within the organization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// May decompose tasks and hand them to subordinates
    #[serde(default)]
    pub can_delegate: bool,
    /// May restaff roles when expanding procedures
    #[serde(default)]
    pub can_assign_role: bool,
    /// May request new subordinates
    #[serde(default)]
    pub can_hire: bool,
    /// May park a task on a conversation
    #[serde(default)]
    pub can_call_meeting: bool,
}

/// An organizational role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Role {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Static description of one agent, shared by the directory and its actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique name; doubles as the routing address
    pub name: String,
    pub role: Role,
    pub permissions: Permissions,
    /// Name of the managing agent; `None` marks the master agent
    pub manager: Option<String>,
    /// Names of direct subordinates, in org-chart order
    pub subordinates: Vec<String>,
    /// Environment this agent works in, if any
    pub environment_id: Option<String>,
}

/// Node of the host-facing organization tree
#[derive(Debug, Clone, Serialize)]
pub struct OrgTreeNode {
    pub name: String,
    pub role: String,
    pub children: Vec<OrgTreeNode>,
}

/// Flat directory of every agent, keyed by unique name.
///
/// Manager and subordinate links are plain name references, so the
/// directory never owns an agent twice and lookups stay O(1).
#[derive(Debug, Clone, Default)]
pub struct OrgDirectory {
    profiles: HashMap<String, AgentProfile>,
    root: Option<String>,
}

impl OrgDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a profile. A manager-less profile becomes the master agent.
    pub fn insert(&mut self, profile: AgentProfile) {
        if profile.manager.is_none() {
            self.root = Some(profile.name.clone());
        }
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn get(&self, name: &str) -> Option<&AgentProfile> {
        self.profiles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// The manager-less top of the chart.
    pub fn root(&self) -> Option<&AgentProfile> {
        self.root.as_deref().and_then(|name| self.profiles.get(name))
    }

    pub fn manager_of(&self, name: &str) -> Option<&AgentProfile> {
        self.profiles
            .get(name)
            .and_then(|p| p.manager.as_deref())
            .and_then(|manager| self.profiles.get(manager))
    }

    pub fn subordinates_of(&self, name: &str) -> Vec<&AgentProfile> {
        self.profiles
            .get(name)
            .map(|p| {
                p.subordinates
                    .iter()
                    .filter_map(|s| self.profiles.get(s))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Agents bound to `environment_id`, excluding `except`.
    pub fn peers_in_environment(&self, environment_id: &str, except: &str) -> Vec<String> {
        let mut peers: Vec<String> = self
            .profiles
            .values()
            .filter(|p| p.environment_id.as_deref() == Some(environment_id))
            .filter(|p| p.name != except)
            .map(|p| p.name.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Role name to agent name over `name`'s delegation reach: its direct
    /// subordinates (first in chart order wins) and the agent itself for
    /// roles none of them cover.
    pub fn role_assignments(&self, name: &str) -> HashMap<String, String> {
        let mut assignments = HashMap::new();
        let Some(profile) = self.profiles.get(name) else {
            return assignments;
        };
        for subordinate in &profile.subordinates {
            if let Some(sub) = self.profiles.get(subordinate) {
                assignments
                    .entry(sub.role.name.clone())
                    .or_insert_with(|| sub.name.clone());
            }
        }
        assignments
            .entry(profile.role.name.clone())
            .or_insert_with(|| profile.name.clone());
        assignments
    }

    /// Names and role names of `name`'s direct subordinates.
    pub fn subordinate_roster(&self, name: &str) -> Vec<(String, String)> {
        self.subordinates_of(name)
            .into_iter()
            .map(|p| (p.name.clone(), p.role.name.clone()))
            .collect()
    }

    /// Snapshot tree rooted at the master agent.
    pub fn to_tree(&self) -> Option<OrgTreeNode> {
        self.root.as_deref().and_then(|root| self.build_node(root))
    }

    fn build_node(&self, name: &str) -> Option<OrgTreeNode> {
        let profile = self.profiles.get(name)?;
        let children = profile
            .subordinates
            .iter()
            .filter_map(|s| self.build_node(s))
            .collect();
        Some(OrgTreeNode {
            name: profile.name.clone(),
            role: profile.role.name.clone(),
            children,
        })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn clear(&mut self) {
        self.profiles.clear();
        self.root = None;
    }
}
