//! Agent actor - one organizational role reacting to its mail

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::brain::{Brain, BrainResponse};
use crate::conversation::{ConversationId, ConversationMessage};
use crate::mail::{Mail, MailBody};
use crate::org::AgentProfile;
use crate::orchestrator::Orchestrator;
use crate::prompt;
use crate::task::{PlannedTask, Task, TaskId, TaskStatus, MAX_RETRIES};
use crate::tools::{ToolContext, ToolResult};

/// Lessons an agent can hold before the oldest is forgotten
pub const MEMORY_CAPACITY: usize = 10;

/// A single organizational actor.
///
/// Exactly one worker drains the agent's mailbox, so every mail is
/// handled to completion, awaits included, before the next is dequeued.
/// Managers decompose and delegate; everyone else thinks and acts.
pub struct Agent {
    profile: AgentProfile,
    /// Short-term lessons, oldest evicted first
    memory: VecDeque<String>,
    /// Working copies of tasks this agent currently tracks
    tasks: HashMap<TaskId, Task>,
    core: Arc<Orchestrator>,
    /// Run generation captured at spawn; results from older runs are
    /// discarded after every await
    epoch: u64,
}

/// Handle to a spawned agent: its routing address and a direct line to
/// its mailbox
#[derive(Clone)]
pub struct AgentHandle {
    pub name: String,
    sender: mpsc::UnboundedSender<Mail>,
}

impl AgentHandle {
    /// Inject mail directly, bypassing the router. Returns whether the
    /// worker is still draining the mailbox.
    pub fn send(&self, mail: Mail) -> bool {
        self.sender.send(mail).is_ok()
    }
}

impl Agent {
    /// Spawn the actor: register its mailbox with the router and start
    /// the worker loop.
    pub fn spawn(
        profile: AgentProfile,
        seed_memory: Vec<String>,
        core: Arc<Orchestrator>,
    ) -> AgentHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        core.router().register(profile.name.clone(), tx.clone());
        let name = profile.name.clone();
        let epoch = core.epoch();
        let mut memory = VecDeque::with_capacity(MEMORY_CAPACITY);
        for lesson in seed_memory {
            push_lesson(&mut memory, lesson);
        }
        let mut agent = Agent {
            profile,
            memory,
            tasks: HashMap::new(),
            core,
            epoch,
        };
        tokio::spawn(async move {
            while let Some(mail) = rx.recv().await {
                if agent.core.epoch() != agent.epoch {
                    break;
                }
                agent.handle_mail(mail).await;
            }
            debug!(agent = %agent.profile.name, "Mailbox closed, retiring");
        });
        AgentHandle { name, sender: tx }
    }

    #[instrument(skip(self, mail), fields(agent = %self.profile.name, subject = mail.body.subject()))]
    async fn handle_mail(&mut self, mail: Mail) {
        match mail.body {
            MailBody::NewTask { task } => self.handle_new_task(task).await,
            MailBody::TaskUpdate { task } => self.reflect_on_completion(task).await,
            MailBody::EnvironmentEvent { event } => {
                // Events are informational; they never change task state.
                debug!(
                    event = %event.name,
                    environment = %event.environment_id,
                    source = %event.source_agent,
                    "Observed environment event"
                );
            }
            MailBody::ConversationTurn {
                conversation_id,
                topic,
                transcript,
                initiator,
            } => {
                self.take_conversation_turn(conversation_id, topic, transcript, initiator)
                    .await
            }
            MailBody::ConversationResponse {
                conversation_id,
                speaker,
                message,
            } => {
                self.core
                    .advance_conversation(conversation_id, &speaker, &message);
            }
            MailBody::SummarizeConversation {
                conversation_id,
                parent_task_id,
                topic,
                transcript,
            } => {
                self.summarize_conversation(conversation_id, parent_task_id, topic, transcript)
                    .await
            }
        }
    }

    // === Task Intake ===

    async fn handle_new_task(&mut self, mut task: Task) {
        info!(agent = %self.profile.name, task = %task.id, goal = %task.goal, "Accepted task");
        // A task resuming after a conversation is already InProgress.
        if task.status != TaskStatus::InProgress {
            task.record(
                TaskStatus::InProgress,
                format!("Accepted by {}", self.profile.name),
            );
        }
        self.commit(task.clone());

        let manages = self.profile.permissions.can_delegate && !self.profile.subordinates.is_empty();
        if manages {
            self.delegate(task).await;
        } else {
            self.think_and_act(task).await;
        }
    }

    // === Manager Path ===

    async fn delegate(&mut self, mut task: Task) {
        let plan = self.plan(&task).await;
        if self.stale("planning") {
            return;
        }
        if plan.is_empty() {
            warn!(agent = %self.profile.name, task = %task.id, "Planning produced no usable sub-tasks");
            task.result = Some(json!({"error": "planning produced no usable sub-tasks"}));
            task.record(TaskStatus::Failed, "Planning produced no usable sub-tasks");
            self.commit(task.clone());
            self.report(task);
            return;
        }
        self.execute_plan(task, plan);
    }

    /// A matching, fully staffed procedure beats free planning; the brain
    /// is the fallback, and a one-task plan the fallback's fallback.
    async fn plan(&mut self, task: &Task) -> Vec<PlannedTask> {
        let assignments = self.core.role_assignments(&self.profile.name);
        if let Some(sop) = self.core.workflows().find_sop_for_goal(&task.goal) {
            let staffed = sop
                .roles_involved
                .iter()
                .all(|role| assignments.contains_key(role));
            if staffed {
                info!(agent = %self.profile.name, sop = %sop.id, "Planning from standard procedure");
                return self.core.workflows().create_plan_from_sop(sop, &assignments);
            }
            warn!(
                agent = %self.profile.name,
                sop = %sop.id,
                "Matching procedure is not staffed here, planning freely"
            );
        }

        let roster = self.core.subordinate_roster(&self.profile.name);
        let prompt_text = prompt::plan_prompt(task, &roster);
        match self
            .core
            .brain()
            .generate_response(&prompt_text, &self.profile.name, &[], false)
            .await
        {
            Ok(BrainResponse::Text(text)) => match prompt::parse_planned_tasks(&text) {
                Ok(plan) => {
                    let plan = sanitize_plan(&self.profile, plan);
                    if plan.is_empty() {
                        warn!(agent = %self.profile.name, "Brain plan had no usable items, assigning whole goal");
                        fallback_plan(&self.profile, task)
                    } else {
                        plan
                    }
                }
                Err(e) => {
                    warn!(agent = %self.profile.name, error = %e, "Unusable plan from brain, assigning whole goal");
                    fallback_plan(&self.profile, task)
                }
            },
            Ok(BrainResponse::FunctionCall { name, .. }) => {
                warn!(agent = %self.profile.name, tool = %name, "Brain answered planning with a tool call, assigning whole goal");
                fallback_plan(&self.profile, task)
            }
            Err(e) => {
                warn!(agent = %self.profile.name, error = %e, "Brain planning failed, assigning whole goal");
                fallback_plan(&self.profile, task)
            }
        }
    }

    /// Realize a plan: one registered task per item, template ids remapped
    /// to real ones, dependency-free tasks dispatched immediately.
    fn execute_plan(&mut self, mut parent: Task, plan: Vec<PlannedTask>) {
        let mut legend: HashMap<String, TaskId> = HashMap::new();
        let mut batch: Vec<Task> = Vec::new();
        for item in &plan {
            let sub = self.core.create_task(
                &item.goal,
                &item.assignee,
                &self.profile.name,
                TaskStatus::WaitingForDependency,
            );
            legend.insert(item.id.clone(), sub.id);
            batch.push(sub);
        }
        for (item, sub) in plan.iter().zip(batch.iter_mut()) {
            let mut dependencies = HashSet::new();
            for dep in &item.dependencies {
                match legend.get(dep) {
                    Some(id) => {
                        dependencies.insert(*id);
                    }
                    None => warn!(
                        agent = %self.profile.name,
                        template = %item.id,
                        dependency = %dep,
                        "Dropping dependency on unknown plan item"
                    ),
                }
            }
            if !dependencies.is_empty() {
                self.core
                    .update_task_dependencies(sub.id, dependencies.clone());
                sub.dependencies = dependencies;
            }
        }

        parent.sub_task_ids = batch.iter().map(|t| t.id).collect();
        info!(agent = %self.profile.name, task = %parent.id, batch = batch.len(), "Plan realized");
        self.commit(parent);

        for sub in batch {
            let ready = sub.dependencies.is_empty();
            let id = sub.id;
            self.tasks.insert(id, sub);
            if ready {
                self.core.dispatch_task(id);
            }
        }
    }

    /// React to a terminal update from a sub-task: retry, escalate,
    /// unblock waiting siblings, and settle the batch once all are done.
    async fn reflect_on_completion(&mut self, update: Task) {
        let update_id = update.id;
        self.tasks.insert(update_id, update.clone());

        let Some(parent_id) = self
            .tasks
            .values()
            .find(|t| t.sub_task_ids.contains(&update_id))
            .map(|t| t.id)
        else {
            debug!(agent = %self.profile.name, task = %update_id, "Update outside any current batch, ignoring");
            return;
        };
        let Some(parent) = self.tasks.get(&parent_id).cloned() else {
            return;
        };
        if parent.is_terminal() {
            debug!(agent = %self.profile.name, task = %parent_id, "Batch already settled, ignoring late update");
            return;
        }

        if update.status == TaskStatus::Failed {
            if update.retries < MAX_RETRIES {
                info!(
                    agent = %self.profile.name,
                    task = %update_id,
                    attempt = update.retries + 1,
                    "Sub-task failed, granting retry"
                );
                self.core.retry_task(update_id);
            } else {
                self.escalate(parent, &update);
            }
            return;
        }

        // A completion may satisfy waiting siblings' dependencies.
        let siblings = self.core.tasks_by_ids(&parent.sub_task_ids);
        let statuses: HashMap<TaskId, TaskStatus> =
            siblings.iter().map(|t| (t.id, t.status)).collect();
        for sibling in &siblings {
            if sibling.status != TaskStatus::WaitingForDependency
                || !dependencies_met(sibling, &statuses)
            {
                continue;
            }
            let context: Vec<Task> = parent
                .sub_task_ids
                .iter()
                .copied()
                .filter(|id| sibling.dependencies.contains(id))
                .filter_map(|id| self.core.task(id))
                .collect();
            let mut ready = sibling.clone();
            ready.goal = prompt::dependency_context(sibling, &context);
            ready.record(TaskStatus::Pending, "Dependencies satisfied");
            info!(agent = %self.profile.name, task = %ready.id, "Dependencies cleared, dispatching");
            self.commit(ready);
            self.core.dispatch_task(sibling.id);
        }

        // Settle check runs on every update; arrival order is not
        // guaranteed, and a just-dispatched sibling keeps the batch open.
        let batch = self.core.tasks_by_ids(&parent.sub_task_ids);
        if batch.is_empty() || batch.iter().any(|t| !t.is_terminal()) {
            return;
        }
        let failed = batch.iter().filter(|t| t.status == TaskStatus::Failed).count();
        let mut parent = parent;
        if failed > 0 {
            let message = format!("{failed} of {} sub-tasks failed", batch.len());
            parent.result = Some(json!({"error": message}));
            parent.record(TaskStatus::Failed, message);
        } else {
            let mut aggregate = serde_json::Map::new();
            for sub in &batch {
                aggregate.insert(
                    sub.assignee.clone(),
                    json!({"goal": sub.original_goal, "result": sub.result}),
                );
            }
            parent.result = Some(Value::Object(aggregate));
            parent.record(
                TaskStatus::Completed,
                format!("All {} sub-tasks completed", batch.len()),
            );
        }
        info!(agent = %self.profile.name, task = %parent.id, status = %parent.status, "Batch settled");
        self.commit(parent.clone());
        self.report(parent);
    }

    /// A sub-task is out of retries: fold the failure into the parent's
    /// goal, drop the old batch, and take the parent again from the top.
    fn escalate(&mut self, mut parent: Task, failed: &Task) {
        warn!(
            agent = %self.profile.name,
            task = %parent.id,
            failed = %failed.id,
            assignee = %failed.assignee,
            "Sub-task out of retries, escalating"
        );
        parent.goal = prompt::escalation_goal(&parent.original_goal, failed);
        parent.sub_task_ids.clear();
        parent.record(
            TaskStatus::Blocked,
            format!(
                "Escalated: sub-task assigned to {} failed permanently",
                failed.assignee
            ),
        );
        self.commit(parent.clone());
        self.core.dispatch_task(parent.id);
    }

    // === Worker Path ===

    async fn think_and_act(&mut self, mut task: Task) {
        let (environment_state, tools) = match &self.profile.environment_id {
            Some(env_id) => (
                self.core.environment_state(env_id).await,
                self.core.permitted_tools(env_id, &self.profile.role.name),
            ),
            None => (None, Vec::new()),
        };
        let memory = self.memory_snapshot();
        let prompt_text =
            prompt::task_prompt(&task, &self.profile, &memory, environment_state.as_ref());
        let response = self
            .core
            .brain()
            .generate_response(&prompt_text, &self.profile.name, &tools, false)
            .await;
        if self.stale("thinking") {
            return;
        }

        match response {
            Ok(BrainResponse::Text(text)) => {
                task.result = Some(Value::String(text));
                task.record(
                    TaskStatus::Completed,
                    format!("Completed by {}", self.profile.name),
                );
                self.commit(task.clone());
                self.report(task.clone());
                self.reflect_on_action(&task).await;
            }
            Ok(BrainResponse::FunctionCall { name, args }) => self.act(task, name, args).await,
            Err(e) => {
                warn!(agent = %self.profile.name, task = %task.id, error = %e, "Brain call failed");
                task.result = Some(json!({"error": e.to_string()}));
                task.record(TaskStatus::Failed, format!("Brain call failed: {e}"));
                self.commit(task.clone());
                self.report(task);
            }
        }
    }

    async fn act(&mut self, mut task: Task, tool: String, args: Value) {
        let Some(env_id) = self.profile.environment_id.clone() else {
            warn!(agent = %self.profile.name, task = %task.id, %tool, "No environment bound, cannot act");
            task.result = Some(json!({"error": format!("no environment bound for tool '{tool}'")}));
            task.record(TaskStatus::Failed, format!("No environment to run tool '{tool}'"));
            self.commit(task.clone());
            self.report(task);
            return;
        };
        let ctx = ToolContext {
            agent: self.profile.name.clone(),
            role: self.profile.role.name.clone(),
            task_id: task.id,
            task_goal: task.goal.clone(),
            brain: self.core.brain_handle(),
        };
        info!(agent = %self.profile.name, task = %task.id, %tool, "Acting via tool");
        let executed = self.core.execute_tool(&env_id, &tool, args, &ctx).await;
        if self.stale("acting") {
            return;
        }

        let outcome = match executed {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(agent = %self.profile.name, task = %task.id, %tool, error = %e, "Tool execution failed");
                task.result = Some(json!({"error": e.to_string()}));
                task.record(TaskStatus::Failed, format!("{e}"));
                self.commit(task.clone());
                self.report(task);
                return;
            }
        };
        match outcome.result {
            ToolResult::Value(value) => {
                task.result = Some(value);
                task.record(TaskStatus::Completed, format!("Completed via tool '{tool}'"));
                self.commit(task.clone());
                self.report(task.clone());
                self.reflect_on_action(&task).await;
            }
            ToolResult::NeedHumanInput { question } => {
                info!(agent = %self.profile.name, task = %task.id, "Parking task on operator input");
                task.record(
                    TaskStatus::AwaitingInput,
                    format!("Waiting on operator: {question}"),
                );
                self.commit(task.clone());
                self.core
                    .request_human_input(&task, &self.profile.name, question);
            }
            ToolResult::StartConversation {
                topic,
                participants,
            } => {
                if !self.profile.permissions.can_call_meeting {
                    warn!(agent = %self.profile.name, task = %task.id, "Meeting requested without permission");
                    task.result = Some(json!({"error": "meeting permission denied"}));
                    task.record(
                        TaskStatus::Failed,
                        format!("'{}' may not call meetings", self.profile.name),
                    );
                    self.commit(task.clone());
                    self.report(task);
                    return;
                }
                if participants.is_empty() {
                    task.result = Some(json!({"error": "conversation needs participants"}));
                    task.record(TaskStatus::Failed, "Conversation requested with no participants");
                    self.commit(task.clone());
                    self.report(task);
                    return;
                }
                task.record(
                    TaskStatus::Blocked,
                    format!("Parked pending conversation: {topic}"),
                );
                self.commit(task.clone());
                self.core.start_conversation(task.id, &topic, participants);
            }
        }
    }

    // === Conversations ===

    async fn take_conversation_turn(
        &mut self,
        conversation_id: ConversationId,
        topic: String,
        transcript: Vec<ConversationMessage>,
        initiator: String,
    ) {
        let prompt_text = prompt::conversation_prompt(&topic, &transcript, &self.profile);
        let response = self
            .core
            .brain()
            .generate_response(&prompt_text, &self.profile.name, &[], false)
            .await;
        if self.stale("conversing") {
            return;
        }
        // Always answer; a silent participant would stall the rotation.
        let message = match response {
            Ok(BrainResponse::Text(text)) => text,
            Ok(BrainResponse::FunctionCall { .. }) => "I have nothing further to add.".to_string(),
            Err(e) => {
                warn!(agent = %self.profile.name, conversation = %conversation_id, error = %e, "Could not compose a turn");
                format!("{} has nothing to add right now.", self.profile.name)
            }
        };
        self.core.send_mail(Mail::new(
            self.profile.name.clone(),
            initiator,
            MailBody::ConversationResponse {
                conversation_id,
                speaker: self.profile.name.clone(),
                message,
            },
        ));
    }

    async fn summarize_conversation(
        &mut self,
        conversation_id: ConversationId,
        parent_task_id: TaskId,
        topic: String,
        transcript: Vec<ConversationMessage>,
    ) {
        fn flatten(transcript: &[ConversationMessage]) -> String {
            transcript
                .iter()
                .map(|m| format!("{}: {}", m.agent, m.message))
                .collect::<Vec<_>>()
                .join("\n")
        }

        let prompt_text = prompt::summary_prompt(&topic, &transcript);
        let response = self
            .core
            .brain()
            .generate_response(&prompt_text, &self.profile.name, &[], false)
            .await;
        if self.stale("summarizing") {
            return;
        }
        let summary = match response {
            Ok(BrainResponse::Text(text)) => text,
            Ok(BrainResponse::FunctionCall { .. }) => flatten(&transcript),
            Err(e) => {
                warn!(agent = %self.profile.name, conversation = %conversation_id, error = %e, "Summary failed, using raw transcript");
                flatten(&transcript)
            }
        };
        let Some(mut task) = self.core.task(parent_task_id) else {
            warn!(agent = %self.profile.name, task = %parent_task_id, "Conversation resolved for unknown task");
            return;
        };
        task.result = Some(json!({"topic": topic, "conversation_resolution": summary}));
        task.record(TaskStatus::InProgress, format!("Conversation '{topic}' resolved"));
        info!(
            agent = %self.profile.name,
            task = %task.id,
            conversation = %conversation_id,
            "Conversation resolved, resuming task"
        );
        self.commit(task);
        self.core.dispatch_task(parent_task_id);
    }

    // === Memory ===

    /// Best-effort lesson extraction after a completed action. Failures
    /// are swallowed; memory is a bonus, not a dependency.
    async fn reflect_on_action(&mut self, task: &Task) {
        let meaningful = match &task.result {
            None => false,
            Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !meaningful {
            return;
        }
        let prompt_text = prompt::lesson_prompt(task);
        match self
            .core
            .brain()
            .generate_response(&prompt_text, &self.profile.name, &[], false)
            .await
        {
            Ok(BrainResponse::Text(lesson)) => {
                if self.stale("reflecting") {
                    return;
                }
                let lesson = lesson.trim();
                if !lesson.is_empty() {
                    debug!(agent = %self.profile.name, "Keeping a lesson");
                    push_lesson(&mut self.memory, lesson.to_string());
                }
            }
            Ok(BrainResponse::FunctionCall { .. }) => {}
            Err(e) => {
                debug!(agent = %self.profile.name, error = %e, "Skipping lesson, brain unavailable")
            }
        }
    }

    fn memory_snapshot(&self) -> Vec<String> {
        self.memory.iter().cloned().collect()
    }

    // === Plumbing ===

    /// Reconcile a working copy into the cache and canonical registry.
    fn commit(&mut self, task: Task) {
        self.tasks.insert(task.id, task.clone());
        self.core.update_task(task);
    }

    /// Mail a task update back to whoever issued it.
    fn report(&self, task: Task) {
        let to = task.issuer.clone();
        self.core.send_mail(Mail::new(
            self.profile.name.clone(),
            to,
            MailBody::TaskUpdate { task },
        ));
    }

    fn stale(&self, context: &str) -> bool {
        if self.core.epoch() != self.epoch {
            debug!(agent = %self.profile.name, context, "Run was reset, discarding in-flight work");
            true
        } else {
            false
        }
    }
}

fn push_lesson(memory: &mut VecDeque<String>, lesson: String) {
    while memory.len() >= MEMORY_CAPACITY {
        memory.pop_front();
    }
    memory.push_back(lesson);
}

/// Drop planned items whose assignee is neither the planner nor one of
/// its subordinates.
fn sanitize_plan(profile: &AgentProfile, plan: Vec<PlannedTask>) -> Vec<PlannedTask> {
    plan.into_iter()
        .filter(|item| {
            let known =
                item.assignee == profile.name || profile.subordinates.contains(&item.assignee);
            if !known {
                warn!(
                    agent = %profile.name,
                    template = %item.id,
                    assignee = %item.assignee,
                    "Dropping planned task for unknown assignee"
                );
            }
            known
        })
        .collect()
}

/// One-task plan handing the whole goal to the first subordinate.
fn fallback_plan(profile: &AgentProfile, task: &Task) -> Vec<PlannedTask> {
    match profile.subordinates.first() {
        Some(first) => vec![PlannedTask {
            id: "t1".to_string(),
            goal: task.goal.clone(),
            assignee: first.clone(),
            dependencies: Vec::new(),
        }],
        None => Vec::new(),
    }
}

fn dependencies_met(task: &Task, statuses: &HashMap<TaskId, TaskStatus>) -> bool {
    task.dependencies
        .iter()
        .all(|dep| statuses.get(dep) == Some(&TaskStatus::Completed))
}
