//! Standard operating procedures - pre-authored plans over free planning

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::task::PlannedTask;

/// One step of a standard operating procedure.
///
/// `task_id` and `dependencies` are template-local names, resolved when
/// the procedure is expanded into a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SopStep {
    pub task_id: String,
    pub description: String,
    /// Role that should perform the step, resolved to a concrete agent
    pub assignee_role: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A pre-authored decomposition for one kind of goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sop {
    pub id: String,
    /// Keyword matched against incoming goals, whole word, any case
    pub goal_type: String,
    /// Roles that must be staffed for the procedure to apply
    #[serde(default)]
    pub roles_involved: Vec<String>,
    pub steps: Vec<SopStep>,
}

/// Immutable SOP collection shared by every planning agent
#[derive(Debug, Clone, Default)]
pub struct WorkflowLibrary {
    sops: Vec<Sop>,
}

impl WorkflowLibrary {
    pub fn new(sops: Vec<Sop>) -> Self {
        Self { sops }
    }

    pub fn len(&self) -> usize {
        self.sops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sops.is_empty()
    }

    /// First procedure whose `goal_type` appears in `goal` as a whole
    /// word, case-insensitively. Declaration order breaks ties.
    pub fn find_sop_for_goal(&self, goal: &str) -> Option<&Sop> {
        self.sops
            .iter()
            .find(|sop| goal_matches(&sop.goal_type, goal))
    }

    /// Expand a procedure into a plan using `assignments` (role name to
    /// agent name). Steps whose role is unassigned are skipped with a
    /// warning rather than failing the whole plan.
    pub fn create_plan_from_sop(
        &self,
        sop: &Sop,
        assignments: &HashMap<String, String>,
    ) -> Vec<PlannedTask> {
        let mut plan = Vec::new();
        for step in &sop.steps {
            let Some(assignee) = assignments.get(&step.assignee_role) else {
                warn!(
                    sop = %sop.id,
                    step = %step.task_id,
                    role = %step.assignee_role,
                    "Skipping procedure step: role has no assignee"
                );
                continue;
            };
            plan.push(PlannedTask {
                id: step.task_id.clone(),
                goal: step.description.clone(),
                assignee: assignee.clone(),
                dependencies: step.dependencies.clone(),
            });
        }
        plan
    }
}

fn goal_matches(goal_type: &str, goal: &str) -> bool {
    let pattern = format!(r"(?i)\b{}\b", regex::escape(goal_type));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(goal),
        Err(_) => false,
    }
}
