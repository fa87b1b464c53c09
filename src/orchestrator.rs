//! Orchestrator - builds the organization and owns canonical run state

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::agent::Agent;
use crate::brain::{Brain, BrainLimits, BrainStats, GovernedBrain, ToolDeclaration};
use crate::channel::{
    ChannelPair, GuildChannel, HostCommand, HostEvent, HumanInputRequest, InputRequestId,
};
use crate::config::{AgentNode, OrgConfig};
use crate::conversation::{Conversation, ConversationCoordinator, ConversationId};
use crate::environment::{Environment, EnvironmentEvent};
use crate::error::GuildError;
use crate::mail::{Mail, MailBody, MailRecord, MailRouter};
use crate::org::{AgentProfile, OrgDirectory, OrgTreeNode};
use crate::prompt;
use crate::task::{Task, TaskId, TaskStatus};
use crate::tools::{ToolContext, ToolOutcome, ToolRegistry};
use crate::workflow::WorkflowLibrary;

/// Routing address of the orchestrator's own mailbox. Reserved; no agent
/// may take this name.
pub const ORCHESTRATOR_ADDRESS: &str = "Orchestrator";

/// Root coordinator of one organization run.
///
/// The orchestrator assembles agents from config, owns the canonical task
/// registry, environments and conversations, and mirrors every state
/// change to the host as fire-and-forget events. Agents hold an
/// `Arc<Orchestrator>` and reach all shared services through it.
pub struct Orchestrator {
    name: String,
    tasks: RwLock<HashMap<TaskId, Task>>,
    directory: RwLock<OrgDirectory>,
    environments: RwLock<HashMap<String, Arc<Environment>>>,
    conversations: ConversationCoordinator,
    workflows: WorkflowLibrary,
    brain: Arc<GovernedBrain>,
    router: Arc<MailRouter>,
    event_tx: mpsc::UnboundedSender<HostEvent>,
    commands: Mutex<mpsc::UnboundedReceiver<HostCommand>>,
    own_mail: Mutex<mpsc::UnboundedReceiver<Mail>>,
    pending_inputs: RwLock<HashMap<InputRequestId, HumanInputRequest>>,
    root_task: RwLock<Option<TaskId>>,
    /// Run generation; bumped by reset so in-flight work knows to stop
    epoch: AtomicU64,
}

impl Orchestrator {
    /// Build an organization and its host channel. Must be called inside
    /// a Tokio runtime; agent workers are spawned immediately.
    pub fn build(
        config: OrgConfig,
        tools: ToolRegistry,
        brain: Arc<dyn Brain>,
    ) -> Result<(Arc<Self>, GuildChannel), GuildError> {
        let (channel, pair) = GuildChannel::new();
        let orchestrator = Self::with_channel_pair(config, tools, brain, pair)?;
        Ok((orchestrator, channel))
    }

    /// Build an organization over an existing channel pair.
    pub fn with_channel_pair(
        config: OrgConfig,
        tools: ToolRegistry,
        brain: Arc<dyn Brain>,
        pair: ChannelPair,
    ) -> Result<Arc<Self>, GuildError> {
        config.validate()?;
        let ChannelPair {
            command_rx,
            event_tx,
        } = pair;
        let tools = Arc::new(tools);
        let router = Arc::new(MailRouter::new());

        let mut environments = HashMap::new();
        for env in &config.environments {
            environments.insert(
                env.id.clone(),
                Arc::new(Environment::new(
                    &env.id,
                    env.initial_state.clone(),
                    Arc::clone(&tools),
                    env.tools.clone(),
                    env.permissions.clone(),
                )),
            );
        }

        let audit_tx = event_tx.clone();
        router.set_audit_hook(Arc::new(move |mail: &Mail| {
            let _ = audit_tx.send(HostEvent::MailLogged {
                mail: MailRecord::of(mail),
            });
        }));

        let (own_tx, own_rx) = mpsc::unbounded_channel();
        router.register(ORCHESTRATOR_ADDRESS, own_tx);

        let limits = BrainLimits {
            calls_per_minute: config.llm.calls_per_minute,
            max_total_calls: config.llm.max_total_calls,
        };

        let orchestrator = Arc::new(Self {
            name: config.name.clone(),
            tasks: RwLock::new(HashMap::new()),
            directory: RwLock::new(OrgDirectory::new()),
            environments: RwLock::new(environments),
            conversations: ConversationCoordinator::new(Arc::clone(&router)),
            workflows: WorkflowLibrary::new(config.sop_library.clone()),
            brain: Arc::new(GovernedBrain::new(brain, limits)),
            router,
            event_tx,
            commands: Mutex::new(command_rx),
            own_mail: Mutex::new(own_rx),
            pending_inputs: RwLock::new(HashMap::new()),
            root_task: RwLock::new(None),
            epoch: AtomicU64::new(0),
        });

        orchestrator.enroll(&config.master_agent, None);
        info!(
            organization = %orchestrator.name,
            agents = orchestrator.directory.read().len(),
            environments = orchestrator.environments.read().len(),
            "Organization assembled"
        );
        if let Some(tree) = orchestrator.directory.read().to_tree() {
            let _ = orchestrator
                .event_tx
                .send(HostEvent::OrganizationLoaded { tree });
        }
        Ok(orchestrator)
    }

    /// Register one agent and its subtree: profile into the directory,
    /// worker onto the runtime, mailbox into the router.
    fn enroll(self: &Arc<Self>, node: &AgentNode, manager: Option<String>) {
        let profile = AgentProfile {
            name: node.name.clone(),
            role: node.role.clone(),
            permissions: node.permissions,
            manager,
            subordinates: node.subordinates.iter().map(|s| s.name.clone()).collect(),
            environment_id: node.environment_id.clone(),
        };
        self.directory.write().insert(profile.clone());
        Agent::spawn(profile, node.memory.clone(), Arc::clone(self));
        debug!(agent = %node.name, role = %node.role.name, "Agent enrolled");
        for sub in &node.subordinates {
            self.enroll(sub, Some(node.name.clone()));
        }
    }

    /// Run the host command loop. Returns when the host channel closes or
    /// the run is torn down by [`HostCommand::Reset`].
    #[instrument(skip(self), fields(organization = %self.name))]
    pub async fn serve(&self) -> Result<(), GuildError> {
        info!("Serving host commands");
        let mut commands = self.commands.lock().await;
        let mut own_mail = self.own_mail.lock().await;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                mail = own_mail.recv() => match mail {
                    Some(mail) => self.handle_own_mail(mail),
                    None => break,
                },
            }
        }
        info!("Orchestrator stopped");
        Ok(())
    }

    fn handle_command(&self, command: HostCommand) {
        match command {
            HostCommand::RunGoal { goal } => {
                if let Err(e) = self.run_goal(&goal) {
                    warn!(error = %e, "Cannot run goal");
                }
            }
            HostCommand::HumanInput {
                request_id,
                response,
            } => {
                if let Err(e) = self.resume_with_human_input(request_id, &response) {
                    warn!(error = %e, "Ignoring unusable human input");
                }
            }
            HostCommand::Reset => self.reset(),
        }
    }

    /// The orchestrator's mailbox only cares about terminal updates of the
    /// root task; everything else routes between agents directly.
    fn handle_own_mail(&self, mail: Mail) {
        match mail.body {
            MailBody::TaskUpdate { task } => {
                let is_root = *self.root_task.read() == Some(task.id);
                if is_root && task.is_terminal() {
                    info!(task = %task.id, status = %task.status, "Root task settled");
                    let _ = self.event_tx.send(HostEvent::RunSettled {
                        task_id: task.id,
                        status: task.status,
                    });
                }
            }
            other => debug!(subject = other.subject(), "Orchestrator ignoring mail"),
        }
    }

    // === Tasks ===

    /// Seed and dispatch a root task for `goal` on the master agent.
    pub fn run_goal(&self, goal: &str) -> Result<TaskId, GuildError> {
        let master = self
            .directory
            .read()
            .root()
            .cloned()
            .ok_or(GuildError::NoMasterAgent)?;
        let task = self.create_task(goal, &master.name, ORCHESTRATOR_ADDRESS, TaskStatus::Pending);
        let previous = self.root_task.write().replace(task.id);
        if let Some(previous) = previous {
            if self.task(previous).is_some_and(|t| !t.is_terminal()) {
                warn!(task = %previous, "Previous root task still running; tracking the new one");
            }
        }
        info!(task = %task.id, agent = %master.name, goal, "Running goal");
        self.dispatch_task(task.id);
        Ok(task.id)
    }

    /// Create and register a task. The canonical copy lives here; agents
    /// work on clones and reconcile them back.
    pub fn create_task(
        &self,
        goal: &str,
        assignee: &str,
        issuer: &str,
        status: TaskStatus,
    ) -> Task {
        let task = Task::new(goal, assignee, issuer, status);
        self.tasks.write().insert(task.id, task.clone());
        self.push_task_snapshot();
        task
    }

    /// Reconcile an agent's working copy back into the registry. Updates
    /// for unregistered ids are dropped; a reset has cleared that run.
    pub fn update_task(&self, task: Task) {
        {
            let mut tasks = self.tasks.write();
            if !tasks.contains_key(&task.id) {
                debug!(task = %task.id, "Dropping update for unregistered task");
                return;
            }
            tasks.insert(task.id, task);
        }
        self.push_task_snapshot();
    }

    pub fn update_task_dependencies(&self, id: TaskId, dependencies: HashSet<TaskId>) {
        if let Some(task) = self.tasks.write().get_mut(&id) {
            task.dependencies = dependencies;
        }
        self.push_task_snapshot();
    }

    pub fn update_task_goal(&self, id: TaskId, goal: &str) {
        if let Some(task) = self.tasks.write().get_mut(&id) {
            task.goal = goal.to_string();
        }
        self.push_task_snapshot();
    }

    /// Grant a failed task another attempt: back to Pending on the same
    /// id, retry counter up, straight back to its assignee.
    pub fn retry_task(&self, id: TaskId) {
        {
            let mut tasks = self.tasks.write();
            let Some(task) = tasks.get_mut(&id) else {
                warn!(task = %id, "Cannot retry unknown task");
                return;
            };
            task.retries += 1;
            task.result = None;
            let attempt = task.retries;
            task.record(TaskStatus::Pending, format!("Retry attempt {attempt}"));
        }
        self.push_task_snapshot();
        self.dispatch_task(id);
    }

    /// Mail the task to its assignee.
    pub fn dispatch_task(&self, id: TaskId) {
        let Some(task) = self.task(id) else {
            warn!(task = %id, "Cannot dispatch unknown task");
            return;
        };
        debug!(task = %id, assignee = %task.assignee, "Dispatching task");
        let to = task.assignee.clone();
        self.send_mail(Mail::new(
            ORCHESTRATOR_ADDRESS,
            to,
            MailBody::NewTask { task },
        ));
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.tasks.read().get(&id).cloned()
    }

    pub fn tasks_by_ids(&self, ids: &[TaskId]) -> Vec<Task> {
        let tasks = self.tasks.read();
        ids.iter().filter_map(|id| tasks.get(id).cloned()).collect()
    }

    /// All tasks, oldest first.
    pub fn tasks_snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at());
        tasks
    }

    pub fn root_task_id(&self) -> Option<TaskId> {
        *self.root_task.read()
    }

    // === Mail ===

    pub fn send_mail(&self, mail: Mail) {
        self.router.send(mail);
    }

    pub(crate) fn router(&self) -> &MailRouter {
        &self.router
    }

    // === Environments ===

    fn environment(&self, environment_id: &str) -> Option<Arc<Environment>> {
        self.environments.read().get(environment_id).cloned()
    }

    pub async fn environment_state(&self, environment_id: &str) -> Option<Value> {
        let env = self.environment(environment_id)?;
        Some(env.state().await)
    }

    /// Tools the role may call in the environment, as brain declarations.
    pub fn permitted_tools(&self, environment_id: &str, role: &str) -> Vec<ToolDeclaration> {
        self.environment(environment_id)
            .map(|env| env.permitted_tools(role))
            .unwrap_or_default()
    }

    /// Execute a tool and fan out the consequences: state snapshot to the
    /// host, raised event to co-located agents.
    pub async fn execute_tool(
        &self,
        environment_id: &str,
        tool: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, GuildError> {
        let env = self
            .environment(environment_id)
            .ok_or_else(|| GuildError::EnvironmentNotFound(environment_id.to_string()))?;
        let (outcome, event) = env.execute_tool(tool, args, ctx).await?;
        self.push_environment_snapshot().await;
        if let Some(event) = event {
            self.broadcast_event(event);
        }
        Ok(outcome)
    }

    /// Replace an environment's state wholesale.
    pub async fn update_environment_state(
        &self,
        environment_id: &str,
        state: Value,
    ) -> Result<(), GuildError> {
        let env = self
            .environment(environment_id)
            .ok_or_else(|| GuildError::EnvironmentNotFound(environment_id.to_string()))?;
        env.set_state(state).await;
        self.push_environment_snapshot().await;
        Ok(())
    }

    /// Mail a raised event to everyone in its environment except the
    /// agent whose tool call produced it.
    fn broadcast_event(&self, event: EnvironmentEvent) {
        let peers = self
            .directory
            .read()
            .peers_in_environment(&event.environment_id, &event.source_agent);
        let _ = self.event_tx.send(HostEvent::EnvironmentEventRaised {
            event: event.clone(),
        });
        for peer in peers {
            self.send_mail(Mail::new(
                ORCHESTRATOR_ADDRESS,
                peer,
                MailBody::EnvironmentEvent {
                    event: event.clone(),
                },
            ));
        }
    }

    // === Conversations ===

    /// Open a conversation that will resolve `parent_task_id`. The parked
    /// task's assignee becomes the initiator; an unknown task only logs.
    pub fn start_conversation(
        &self,
        parent_task_id: TaskId,
        topic: &str,
        participants: Vec<String>,
    ) -> Option<ConversationId> {
        let Some(task) = self.task(parent_task_id) else {
            warn!(task = %parent_task_id, topic, "Cannot start conversation for unknown task");
            return None;
        };
        let id = self
            .conversations
            .start(parent_task_id, topic, participants, &task.assignee);
        self.push_conversation_snapshot();
        id
    }

    pub fn advance_conversation(&self, id: ConversationId, speaker: &str, message: &str) {
        self.conversations.advance(id, speaker, message);
        self.push_conversation_snapshot();
    }

    pub fn conversation(&self, id: ConversationId) -> Option<Conversation> {
        self.conversations.get(id)
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.conversations.snapshot()
    }

    // === Human Input ===

    /// Park a question with the operator on behalf of `task`.
    pub fn request_human_input(&self, task: &Task, agent: &str, question: String) {
        let request = HumanInputRequest {
            id: InputRequestId::new(),
            question,
            task_id: task.id,
            agent: agent.to_string(),
        };
        info!(request = %request.id, task = %task.id, agent, "Operator input requested");
        self.pending_inputs.write().insert(request.id, request.clone());
        let _ = self
            .event_tx
            .send(HostEvent::HumanInputRequested { request });
    }

    /// Fold the operator's answer into the parked task and put it back in
    /// motion.
    pub fn resume_with_human_input(
        &self,
        request_id: InputRequestId,
        response: &str,
    ) -> Result<(), GuildError> {
        let request = self
            .pending_inputs
            .write()
            .remove(&request_id)
            .ok_or(GuildError::InputRequestNotFound(request_id))?;
        {
            let mut tasks = self.tasks.write();
            let task = tasks
                .get_mut(&request.task_id)
                .ok_or(GuildError::TaskNotFound(request.task_id))?;
            task.goal = prompt::operator_context(&task.original_goal, &request.question, response);
            task.record(TaskStatus::Pending, "Operator input received");
        }
        info!(request = %request_id, task = %request.task_id, "Resuming with operator input");
        self.push_task_snapshot();
        self.dispatch_task(request.task_id);
        Ok(())
    }

    pub fn pending_input_requests(&self) -> Vec<HumanInputRequest> {
        self.pending_inputs.read().values().cloned().collect()
    }

    // === Run Control ===

    /// Tear the run down: bump the epoch so in-flight work discards its
    /// results, close every mailbox, clear all run state. Environments
    /// and their states survive only until the orchestrator is dropped;
    /// a new run means a new build.
    pub fn reset(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(organization = %self.name, epoch, "Resetting run; in-flight work will be discarded");
        self.router.reset();
        self.tasks.write().clear();
        self.conversations.reset();
        self.pending_inputs.write().clear();
        *self.root_task.write() = None;
        self.directory.write().clear();
        self.push_task_snapshot();
        self.push_conversation_snapshot();
    }

    /// Current run generation. Workers capture this at spawn and drop
    /// anything they finish after it moves.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    // === Directory ===

    pub fn org_tree(&self) -> Option<OrgTreeNode> {
        self.directory.read().to_tree()
    }

    pub fn agent_profile(&self, name: &str) -> Option<AgentProfile> {
        self.directory.read().get(name).cloned()
    }

    pub fn role_assignments(&self, manager: &str) -> HashMap<String, String> {
        self.directory.read().role_assignments(manager)
    }

    pub fn subordinate_roster(&self, manager: &str) -> Vec<(String, String)> {
        self.directory.read().subordinate_roster(manager)
    }

    // === Shared Services ===

    pub fn workflows(&self) -> &WorkflowLibrary {
        &self.workflows
    }

    pub fn brain(&self) -> &GovernedBrain {
        &self.brain
    }

    /// The governed brain as a shareable handle, for tool contexts.
    pub fn brain_handle(&self) -> Arc<dyn Brain> {
        Arc::clone(&self.brain) as Arc<dyn Brain>
    }

    pub fn brain_stats(&self) -> BrainStats {
        self.brain.stats()
    }

    // === Host Snapshots ===

    fn push_task_snapshot(&self) {
        let _ = self.event_tx.send(HostEvent::TasksChanged {
            tasks: self.tasks_snapshot(),
        });
    }

    fn push_conversation_snapshot(&self) {
        let _ = self.event_tx.send(HostEvent::ConversationsChanged {
            conversations: self.conversations.snapshot(),
        });
    }

    async fn push_environment_snapshot(&self) {
        let envs: Vec<Arc<Environment>> = self.environments.read().values().cloned().collect();
        let mut states = HashMap::new();
        for env in envs {
            states.insert(env.id.clone(), env.state().await);
        }
        let _ = self
            .event_tx
            .send(HostEvent::EnvironmentsChanged { states });
    }
}
