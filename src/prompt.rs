//! Prompt construction, goal rewriting and brain output parsing

use std::fmt::Write;

use serde_json::Value;

use crate::conversation::ConversationMessage;
use crate::error::GuildError;
use crate::org::AgentProfile;
use crate::task::{PlannedTask, Task};

/// Prompt for a leaf agent working a task directly.
pub fn task_prompt(
    task: &Task,
    profile: &AgentProfile,
    memory: &[String],
    environment_state: Option<&Value>,
) -> String {
    let mut prompt = format!(
        "You are {}, the {} of this organization.",
        profile.name, profile.role.name
    );
    if !profile.role.description.is_empty() {
        let _ = write!(prompt, " {}", profile.role.description);
    }
    let _ = write!(prompt, "\n\nYour task:\n{}", task.goal);
    if let Some(result) = &task.result {
        let _ = write!(prompt, "\n\nEarlier findings on this task:\n{result}");
    }
    if !memory.is_empty() {
        prompt.push_str("\n\nLessons you carry:");
        for lesson in memory {
            let _ = write!(prompt, "\n- {lesson}");
        }
    }
    if let Some(state) = environment_state {
        let _ = write!(prompt, "\n\nCurrent environment state:\n{state}");
    }
    prompt.push_str(
        "\n\nEither answer with your final result as plain text, or call one of your tools.",
    );
    prompt
}

/// Prompt for a manager decomposing a task across its staff.
pub fn plan_prompt(task: &Task, roster: &[(String, String)]) -> String {
    let mut prompt = String::from("You manage the following staff:");
    for (name, role) in roster {
        let _ = write!(prompt, "\n- {name} ({role})");
    }
    let _ = write!(prompt, "\n\nBreak this goal into sub-tasks for them:\n{}", task.goal);
    if let Some(result) = &task.result {
        let _ = write!(prompt, "\n\nEarlier findings on this task:\n{result}");
    }
    prompt.push_str(
        "\n\nAnswer with only a JSON array. Each item must be \
         {\"id\": \"t1\", \"goal\": \"...\", \"assignee\": \"<staff name>\", \"dependencies\": []}. \
         List a dependency only when a sub-task needs another's output.",
    );
    prompt
}

/// Prompt for one turn of a conversation.
pub fn conversation_prompt(
    topic: &str,
    transcript: &[ConversationMessage],
    profile: &AgentProfile,
) -> String {
    let mut prompt = format!(
        "You are {}, the {}. You are in a working discussion on: {topic}",
        profile.name, profile.role.name
    );
    if transcript.is_empty() {
        prompt.push_str("\n\nYou open the discussion.");
    } else {
        prompt.push_str("\n\nTranscript so far:");
        for message in transcript {
            let _ = write!(prompt, "\n{}: {}", message.agent, message.message);
        }
    }
    prompt.push_str("\n\nReply with your next contribution only.");
    prompt
}

/// Prompt asking the initiator to distill a finished conversation.
pub fn summary_prompt(topic: &str, transcript: &[ConversationMessage]) -> String {
    let mut prompt = format!(
        "Summarize the following discussion on \"{topic}\" into the decision reached and any action items."
    );
    prompt.push_str("\n\nTranscript:");
    for message in transcript {
        let _ = write!(prompt, "\n{}: {}", message.agent, message.message);
    }
    prompt
}

/// Prompt for extracting a reusable lesson from a finished task.
pub fn lesson_prompt(task: &Task) -> String {
    let result = task
        .result
        .as_ref()
        .map(Value::to_string)
        .unwrap_or_else(|| "(none)".to_string());
    format!(
        "You just finished this task:\n{}\n\nOutcome:\n{result}\n\n\
         State one short lesson worth remembering for similar work.",
        task.original_goal
    )
}

/// Rewritten goal for a task whose dependencies have all completed: the
/// original goal plus each dependency's outcome.
pub fn dependency_context(task: &Task, completed: &[Task]) -> String {
    let mut goal = task.original_goal.clone();
    goal.push_str("\n\nContext from completed dependencies:");
    for dep in completed {
        let result = dep
            .result
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "(no result recorded)".to_string());
        let _ = write!(goal, "\n- {} finished \"{}\": {result}", dep.assignee, dep.original_goal);
    }
    goal
}

/// Rewritten goal for a manager whose sub-task failed permanently. Embeds
/// the failed child's own goal, its assignee and its last recorded error.
pub fn escalation_goal(parent_original_goal: &str, failed: &Task) -> String {
    let error = failed.last_message().unwrap_or("no error recorded");
    format!(
        "{parent_original_goal}\n\nA previous attempt needs rework. \
         Sub-task \"{}\" (assigned to {}) failed permanently with: {error}\n\
         Re-plan around this failure.",
        failed.original_goal, failed.assignee
    )
}

/// Rewritten goal carrying an operator's answer back into a parked task.
pub fn operator_context(original_goal: &str, question: &str, answer: &str) -> String {
    format!("{original_goal}\n\nOperator guidance:\nQ: {question}\nA: {answer}")
}

/// Extract a JSON task list from brain output. Accepts a fenced
/// ```json block or a bare array embedded in prose.
pub fn parse_planned_tasks(output: &str) -> Result<Vec<PlannedTask>, GuildError> {
    let trimmed = output.trim();
    let candidate = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let inner = match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        };
        narrow_to_array(inner).unwrap_or(inner)
    } else {
        narrow_to_array(trimmed).ok_or_else(|| {
            GuildError::Planning("no JSON task list in brain output".to_string())
        })?
    };
    serde_json::from_str(candidate)
        .map_err(|e| GuildError::Planning(format!("unparseable task list: {e}")))
}

fn narrow_to_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (start < end).then(|| &text[start..=end])
}
