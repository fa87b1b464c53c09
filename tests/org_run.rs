//! End-to-end runs of small organizations over the public API.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::timeout;

use guildhall::{
    Brain, BrainError, BrainResponse, GuildChannel, GuildError, HostCommand, HostEvent,
    Orchestrator, OrgConfig, TaskId, TaskStatus, Tool, ToolContext, ToolDeclaration, ToolOutcome,
    ToolRegistry,
};

// === Test Brain ===

/// Scripts responses per actor; unscripted calls fall back to echoing.
struct RoutedBrain {
    scripts: Mutex<HashMap<String, VecDeque<Result<BrainResponse, BrainError>>>>,
}

impl RoutedBrain {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
        }
    }

    fn script(self, actor: &str, responses: Vec<Result<BrainResponse, BrainError>>) -> Self {
        self.scripts
            .lock()
            .insert(actor.to_string(), responses.into());
        self
    }
}

#[async_trait]
impl Brain for RoutedBrain {
    async fn generate_response(
        &self,
        prompt: &str,
        actor: &str,
        _tools: &[ToolDeclaration],
        _force_tool_call: bool,
    ) -> Result<BrainResponse, BrainError> {
        if let Some(queue) = self.scripts.lock().get_mut(actor) {
            if let Some(next) = queue.pop_front() {
                return next;
            }
        }
        let first_line = prompt.lines().next().unwrap_or("").trim();
        Ok(BrainResponse::Text(format!(
            "[{actor}] acknowledged: {first_line}"
        )))
    }

    async fn generate_images(
        &self,
        _prompt: &str,
        _actor: &str,
        count: usize,
    ) -> Result<Vec<String>, BrainError> {
        Ok(vec!["data:image/png;base64,".to_string(); count])
    }
}

fn text(s: &str) -> Result<BrainResponse, BrainError> {
    Ok(BrainResponse::Text(s.to_string()))
}

fn call(name: &str, args: Value) -> Result<BrainResponse, BrainError> {
    Ok(BrainResponse::FunctionCall {
        name: name.to_string(),
        args,
    })
}

fn offline() -> Result<BrainResponse, BrainError> {
    Err(BrainError::Transport("backend offline".to_string()))
}

// === Test Tools ===

/// Appends an entry to the shared ledger and announces it.
struct LedgerTool;

#[async_trait]
impl Tool for LedgerTool {
    fn name(&self) -> &str {
        "post_ledger"
    }

    fn description(&self) -> &str {
        "Post an entry to the workshop ledger"
    }

    async fn execute(
        &self,
        args: Value,
        ctx: &ToolContext,
        state: &Value,
    ) -> anyhow::Result<ToolOutcome> {
        let entry = args
            .get("entry")
            .and_then(Value::as_str)
            .unwrap_or("(blank)")
            .to_string();
        let mut ledger: Vec<Value> = state
            .get("ledger")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        ledger.push(json!(entry));
        Ok(
            ToolOutcome::completed(json!({ "ledger": ledger }), json!({ "posted": entry }))
                .with_event("ledger_posted", json!({ "by": ctx.agent })),
        )
    }
}

/// Always defers to the operator.
struct AskOperatorTool;

#[async_trait]
impl Tool for AskOperatorTool {
    fn name(&self) -> &str {
        "ask_operator"
    }

    fn description(&self) -> &str {
        "Ask the human operator a question"
    }

    async fn execute(
        &self,
        _args: Value,
        _ctx: &ToolContext,
        state: &Value,
    ) -> anyhow::Result<ToolOutcome> {
        Ok(ToolOutcome::needs_human_input(
            state.clone(),
            "Which account should this go to?",
        ))
    }
}

/// Convenes a fixed set of agents.
struct MeetingTool {
    topic: String,
    participants: Vec<String>,
}

#[async_trait]
impl Tool for MeetingTool {
    fn name(&self) -> &str {
        "call_meeting"
    }

    fn description(&self) -> &str {
        "Convene the named agents to settle a question"
    }

    async fn execute(
        &self,
        _args: Value,
        _ctx: &ToolContext,
        state: &Value,
    ) -> anyhow::Result<ToolOutcome> {
        Ok(ToolOutcome::starts_conversation(
            state.clone(),
            self.topic.clone(),
            self.participants.clone(),
        ))
    }
}

// === Harness ===

fn build_org(
    config_json: &str,
    tools: ToolRegistry,
    brain: RoutedBrain,
) -> (Arc<Orchestrator>, GuildChannel) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let config = OrgConfig::from_json(config_json).expect("config parses");
    let (orchestrator, channel) =
        Orchestrator::build(config, tools, Arc::new(brain)).expect("organization builds");
    let serve = Arc::clone(&orchestrator);
    tokio::spawn(async move { serve.serve().await });
    (orchestrator, channel)
}

/// Drain events until the run settles, returning everything seen.
async fn run_to_settled(
    channel: &GuildChannel,
    goal: &str,
) -> (Vec<HostEvent>, TaskId, TaskStatus) {
    channel
        .send(HostCommand::RunGoal {
            goal: goal.to_string(),
        })
        .expect("command sent");
    let mut seen = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(10), channel.recv())
            .await
            .expect("run settles in time")
            .expect("channel open");
        let settled = match &event {
            HostEvent::RunSettled { task_id, status } => Some((*task_id, *status)),
            _ => None,
        };
        seen.push(event);
        if let Some((task_id, status)) = settled {
            return (seen, task_id, status);
        }
    }
}

fn two_worker_config(sop_library: Value) -> String {
    json!({
        "name": "onboarding-guild",
        "master_agent": {
            "name": "mara",
            "role": {"name": "Guildmaster", "description": "Runs the guild"},
            "permissions": {"can_delegate": true},
            "subordinates": [
                {"name": "fennel", "role": {"name": "Clerk"}},
                {"name": "brick", "role": {"name": "Quartermaster"}}
            ]
        },
        "sop_library": sop_library
    })
    .to_string()
}

fn workshop_config(tools: Value, permissions: Value) -> String {
    json!({
        "name": "workshop-guild",
        "master_agent": {
            "name": "mara",
            "role": {"name": "Guildmaster"},
            "permissions": {"can_delegate": true},
            "subordinates": [
                {
                    "name": "fennel",
                    "role": {"name": "Clerk"},
                    "environment_id": "workshop",
                    "permissions": {"can_call_meeting": true}
                },
                {
                    "name": "brick",
                    "role": {"name": "Quartermaster"},
                    "environment_id": "workshop"
                }
            ]
        },
        "environments": [{
            "id": "workshop",
            "initial_state": {"ledger": []},
            "tools": tools,
            "permissions": permissions
        }]
    })
    .to_string()
}

// === Planning Runs ===

#[tokio::test]
async fn test_sop_plan_runs_to_completion() {
    let sops = json!([{
        "id": "sop-onboard",
        "goal_type": "onboard",
        "roles_involved": ["Clerk", "Quartermaster"],
        "steps": [
            {
                "task_id": "s1",
                "description": "Record the new member in the ledger",
                "assignee_role": "Clerk",
                "dependencies": []
            },
            {
                "task_id": "s2",
                "description": "Issue standard equipment",
                "assignee_role": "Quartermaster",
                "dependencies": ["s1"]
            }
        ]
    }]);
    let brain = RoutedBrain::new()
        .script("fennel", vec![text("Ledger updated with the new member")])
        .script("brick", vec![text("Standard kit issued")]);
    let (orchestrator, channel) = build_org(&two_worker_config(sops), ToolRegistry::new(), brain);

    let (_events, root_id, status) =
        run_to_settled(&channel, "Onboard the new member Tamsin").await;
    assert_eq!(status, TaskStatus::Completed);

    let root = orchestrator.task(root_id).expect("root kept");
    let result = root.result.expect("aggregate result");
    assert_eq!(
        result["fennel"]["goal"],
        json!("Record the new member in the ledger")
    );
    assert_eq!(
        result["fennel"]["result"],
        json!("Ledger updated with the new member")
    );
    assert_eq!(result["brick"]["result"], json!("Standard kit issued"));

    // The dependent step ran with its predecessor's findings in view.
    let tasks = orchestrator.tasks_snapshot();
    let brick_task = tasks
        .iter()
        .find(|t| t.assignee == "brick")
        .expect("brick's task");
    assert_eq!(brick_task.original_goal, "Issue standard equipment");
    assert!(brick_task.goal.contains("Context from completed dependencies"));
    assert!(brick_task.goal.contains("Ledger updated with the new member"));
    assert_eq!(brick_task.dependencies.len(), 1);
}

#[tokio::test]
async fn test_brain_plan_respects_dependencies() {
    let plan = r#"[
        {"id": "t1", "goal": "Draft the charter", "assignee": "fennel"},
        {"id": "t2", "goal": "Seal the charter", "assignee": "brick", "dependencies": ["t1"]}
    ]"#;
    let brain = RoutedBrain::new()
        .script("mara", vec![text(plan)])
        .script("fennel", vec![text("Charter drafted in duplicate")])
        .script("brick", vec![text("Sealed with the guild mark")]);
    let (orchestrator, channel) =
        build_org(&two_worker_config(json!([])), ToolRegistry::new(), brain);

    let (_events, root_id, status) = run_to_settled(&channel, "Renew the guild charter").await;
    assert_eq!(status, TaskStatus::Completed);

    let tasks = orchestrator.tasks_snapshot();
    let fennel_task = tasks
        .iter()
        .find(|t| t.assignee == "fennel")
        .expect("fennel's task");
    let brick_task = tasks
        .iter()
        .find(|t| t.assignee == "brick")
        .expect("brick's task");
    assert!(fennel_task.dependencies.is_empty());
    assert_eq!(brick_task.dependencies.len(), 1);
    assert!(brick_task.dependencies.contains(&fennel_task.id));
    assert!(brick_task.goal.contains("Charter drafted in duplicate"));

    let root = orchestrator.task(root_id).expect("root kept");
    let result = root.result.expect("aggregate result");
    assert_eq!(result["fennel"]["result"], json!("Charter drafted in duplicate"));
    assert_eq!(result["brick"]["result"], json!("Sealed with the guild mark"));
}

#[tokio::test]
async fn test_empty_brain_plan_falls_back_to_first_subordinate() {
    let brain = RoutedBrain::new()
        .script("mara", vec![text("[]")])
        .script("fennel", vec![text("Hall swept corner to corner")]);
    let (orchestrator, channel) =
        build_org(&two_worker_config(json!([])), ToolRegistry::new(), brain);

    let (_events, root_id, status) = run_to_settled(&channel, "Sweep the great hall").await;
    assert_eq!(status, TaskStatus::Completed);

    // The whole goal lands on the first subordinate.
    let tasks = orchestrator.tasks_snapshot();
    let sub = tasks
        .iter()
        .find(|t| t.assignee == "fennel")
        .expect("fallback sub-task for fennel");
    assert_eq!(sub.goal, "Sweep the great hall");
    assert_eq!(sub.status, TaskStatus::Completed);
    assert!(tasks.iter().all(|t| t.assignee != "brick"));

    let root = orchestrator.task(root_id).expect("root kept");
    let result = root.result.expect("aggregate result");
    assert_eq!(result["fennel"]["result"], json!("Hall swept corner to corner"));
}

#[tokio::test]
async fn test_plan_of_unknown_assignees_falls_back_to_first_subordinate() {
    let stray_plan = r#"[{"id": "t1", "goal": "File the deeds", "assignee": "nobody-here"}]"#;
    let brain = RoutedBrain::new()
        .script("mara", vec![text(stray_plan)])
        .script("fennel", vec![text("Deeds filed under seal")]);
    let (orchestrator, channel) =
        build_org(&two_worker_config(json!([])), ToolRegistry::new(), brain);

    let (_events, root_id, status) = run_to_settled(&channel, "Settle the estate paperwork").await;
    assert_eq!(status, TaskStatus::Completed);

    let tasks = orchestrator.tasks_snapshot();
    assert!(tasks.iter().all(|t| t.assignee != "nobody-here"));
    let sub = tasks
        .iter()
        .find(|t| t.assignee == "fennel")
        .expect("fallback sub-task for fennel");
    assert_eq!(sub.goal, "Settle the estate paperwork");

    let root = orchestrator.task(root_id).expect("root kept");
    let result = root.result.expect("aggregate result");
    assert_eq!(result["fennel"]["result"], json!("Deeds filed under seal"));
}

// === Failure Handling ===

#[tokio::test]
async fn test_leaf_failure_retries_once_then_escalates() {
    let first_plan = r#"[{"id": "t1", "goal": "Count the coffers", "assignee": "fennel"}]"#;
    let second_plan =
        r#"[{"id": "t1", "goal": "Count the coffers slowly", "assignee": "fennel"}]"#;
    let brain = RoutedBrain::new()
        .script("mara", vec![text(first_plan), text(second_plan)])
        .script(
            "fennel",
            vec![offline(), offline(), text("Forty-two crowns counted")],
        );
    let config = json!({
        "name": "treasury-guild",
        "master_agent": {
            "name": "mara",
            "role": {"name": "Guildmaster"},
            "permissions": {"can_delegate": true},
            "subordinates": [{"name": "fennel", "role": {"name": "Clerk"}}]
        }
    })
    .to_string();
    let (orchestrator, channel) = build_org(&config, ToolRegistry::new(), brain);

    let (_events, root_id, status) = run_to_settled(&channel, "Audit the treasury").await;
    assert_eq!(status, TaskStatus::Completed);

    let tasks = orchestrator.tasks_snapshot();
    let failed: Vec<_> = tasks
        .iter()
        .filter(|t| t.assignee == "fennel" && t.status == TaskStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    let failed = failed[0];
    assert_eq!(failed.retries, 1);
    let failures = failed
        .history
        .iter()
        .filter(|entry| entry.status == TaskStatus::Failed)
        .count();
    assert_eq!(failures, 2, "one retry means exactly two attempts");

    // Escalation folded the failure into the root goal verbatim.
    let root = orchestrator.task(root_id).expect("root kept");
    assert!(root.goal.contains("Audit the treasury"));
    assert!(root.goal.contains("Count the coffers"));
    assert!(root.goal.contains("fennel"));
    assert!(root.goal.contains("backend offline"));
    assert_eq!(root.original_goal, "Audit the treasury");
    assert!(root
        .history
        .iter()
        .any(|entry| entry.status == TaskStatus::Blocked));

    // The re-planned batch carried the run to completion.
    let result = root.result.expect("aggregate result");
    assert_eq!(result["fennel"]["goal"], json!("Count the coffers slowly"));
    assert_eq!(result["fennel"]["result"], json!("Forty-two crowns counted"));
}

#[tokio::test]
async fn test_unrecoverable_root_failure_reaches_host() {
    let brain = RoutedBrain::new().script("mara", vec![offline()]);
    let config = json!({
        "name": "solo-guild",
        "master_agent": {"name": "mara", "role": {"name": "Guildmaster"}}
    })
    .to_string();
    let (orchestrator, channel) = build_org(&config, ToolRegistry::new(), brain);

    let (_events, root_id, status) = run_to_settled(&channel, "Hold the annual feast").await;
    assert_eq!(status, TaskStatus::Failed);

    let root = orchestrator.task(root_id).expect("root kept");
    assert_eq!(root.status, TaskStatus::Failed);
    assert_eq!(root.result.as_ref().expect("error payload")["error"],
        json!("brain transport failure: backend offline"));
    assert!(root
        .last_message()
        .expect("history written")
        .contains("backend offline"));

    let stats = orchestrator.brain_stats();
    assert_eq!(stats.attempted, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 0);
}

// === Tools and Environments ===

#[tokio::test]
async fn test_tool_execution_updates_environment_and_broadcasts() {
    let plan = r#"[{"id": "t1", "goal": "Post the iron delivery", "assignee": "fennel"}]"#;
    let brain = RoutedBrain::new()
        .script("mara", vec![text(plan)])
        .script(
            "fennel",
            vec![call("post_ledger", json!({"entry": "iron x20"}))],
        );
    let mut tools = ToolRegistry::new();
    tools.register(LedgerTool);
    let config = workshop_config(json!(["post_ledger"]), json!({"post_ledger": ["Clerk"]}));
    let (orchestrator, channel) = build_org(&config, tools, brain);

    let (events, root_id, status) = run_to_settled(&channel, "Log today's deliveries").await;
    assert_eq!(status, TaskStatus::Completed);

    let state = orchestrator
        .environment_state("workshop")
        .await
        .expect("environment exists");
    assert_eq!(state, json!({"ledger": ["iron x20"]}));

    let raised = events
        .iter()
        .find_map(|event| match event {
            HostEvent::EnvironmentEventRaised { event } => Some(event),
            _ => None,
        })
        .expect("tool event surfaced to host");
    assert_eq!(raised.name, "ledger_posted");
    assert_eq!(raised.environment_id, "workshop");
    assert_eq!(raised.source_agent, "fennel");

    // Co-located brick saw the broadcast; the source agent did not.
    assert!(events.iter().any(|event| matches!(
        event,
        HostEvent::MailLogged { mail }
            if mail.subject == "ENVIRONMENT_EVENT" && mail.to == "brick"
    )));
    assert!(!events.iter().any(|event| matches!(
        event,
        HostEvent::MailLogged { mail }
            if mail.subject == "ENVIRONMENT_EVENT" && mail.to == "fennel"
    )));

    let root = orchestrator.task(root_id).expect("root kept");
    let result = root.result.expect("aggregate result");
    assert_eq!(result["fennel"]["result"], json!({"posted": "iron x20"}));
}

#[tokio::test]
async fn test_permission_denial_fails_task_and_escalates() {
    let first_plan = r#"[{"id": "t1", "goal": "Post the entry", "assignee": "fennel"}]"#;
    let second_plan =
        r#"[{"id": "t1", "goal": "Describe the entry instead", "assignee": "fennel"}]"#;
    let brain = RoutedBrain::new()
        .script("mara", vec![text(first_plan), text(second_plan)])
        .script(
            "fennel",
            vec![
                call("post_ledger", json!({"entry": "oak x5"})),
                call("post_ledger", json!({"entry": "oak x5"})),
                text("Noted by hand instead"),
            ],
        );
    let mut tools = ToolRegistry::new();
    tools.register(LedgerTool);
    // Clerks are not on the allow-list here.
    let config = workshop_config(
        json!(["post_ledger"]),
        json!({"post_ledger": ["Quartermaster"]}),
    );
    let (orchestrator, channel) = build_org(&config, tools, brain);

    let (_events, root_id, status) = run_to_settled(&channel, "Log today's deliveries").await;
    assert_eq!(status, TaskStatus::Completed);

    let tasks = orchestrator.tasks_snapshot();
    let denied = tasks
        .iter()
        .find(|t| t.assignee == "fennel" && t.status == TaskStatus::Failed)
        .expect("denied task kept");
    assert!(denied
        .last_message()
        .expect("history written")
        .contains("Permission denied: role 'Clerk' may not use tool 'post_ledger'"));

    let root = orchestrator.task(root_id).expect("root kept");
    assert!(root
        .goal
        .contains("Permission denied: role 'Clerk' may not use tool 'post_ledger'"));

    // The denied call never touched the environment.
    let state = orchestrator
        .environment_state("workshop")
        .await
        .expect("environment exists");
    assert_eq!(state, json!({"ledger": []}));
}

// === Operator Input ===

#[tokio::test]
async fn test_operator_input_round_trip() {
    let plan = r#"[{"id": "t1", "goal": "File the shipment", "assignee": "fennel"}]"#;
    let brain = RoutedBrain::new()
        .script("mara", vec![text(plan)])
        .script(
            "fennel",
            vec![
                call("ask_operator", json!({})),
                text("Filed under accounts payable"),
            ],
        );
    let mut tools = ToolRegistry::new();
    tools.register(AskOperatorTool);
    let config = workshop_config(json!(["ask_operator"]), json!({}));
    let (orchestrator, channel) = build_org(&config, tools, brain);

    channel
        .send(HostCommand::RunGoal {
            goal: "File the morning shipment".to_string(),
        })
        .expect("command sent");

    let mut answered = false;
    let (root_id, status) = loop {
        let event = timeout(Duration::from_secs(10), channel.recv())
            .await
            .expect("run settles in time")
            .expect("channel open");
        match event {
            HostEvent::HumanInputRequested { request } => {
                assert_eq!(request.agent, "fennel");
                assert!(request.question.contains("Which account"));
                channel
                    .send(HostCommand::HumanInput {
                        request_id: request.id,
                        response: "Accounts payable".to_string(),
                    })
                    .expect("answer sent");
                answered = true;
            }
            HostEvent::RunSettled { task_id, status } => break (task_id, status),
            _ => {}
        }
    };
    assert!(answered, "operator was consulted");
    assert_eq!(status, TaskStatus::Completed);

    let tasks = orchestrator.tasks_snapshot();
    let fennel_task = tasks
        .iter()
        .find(|t| t.assignee == "fennel")
        .expect("fennel's task");
    assert!(fennel_task.goal.contains("Operator guidance"));
    assert!(fennel_task.goal.contains("Q: Which account should this go to?"));
    assert!(fennel_task.goal.contains("A: Accounts payable"));
    assert!(fennel_task
        .history
        .iter()
        .any(|entry| entry.status == TaskStatus::AwaitingInput));
    assert!(orchestrator.pending_input_requests().is_empty());

    let root = orchestrator.task(root_id).expect("root kept");
    assert_eq!(
        root.result.expect("aggregate result")["fennel"]["result"],
        json!("Filed under accounts payable")
    );
}

// === Conversations ===

#[tokio::test]
async fn test_conversation_resolves_parked_task() {
    let plan = r#"[{"id": "t1", "goal": "Settle the storage dispute", "assignee": "fennel"}]"#;
    let brain = RoutedBrain::new()
        .script(
            "mara",
            vec![
                text(plan),
                text("As guildmaster I want it settled today"),
                text("Alternating suits the guild"),
            ],
        )
        .script(
            "fennel",
            vec![
                call("call_meeting", json!({})),
                text("Dispute settled: alternate market days"),
                text("Storage dispute resolved amicably"),
            ],
        )
        .script(
            "brick",
            vec![
                text("The north shelf is mine by charter"),
                text("Agreed, we alternate market days"),
            ],
        );
    let mut tools = ToolRegistry::new();
    tools.register(MeetingTool {
        topic: "Storage allocation".to_string(),
        participants: vec!["brick".to_string(), "mara".to_string()],
    });
    let config = workshop_config(json!(["call_meeting"]), json!({}));
    let (orchestrator, channel) = build_org(&config, tools, brain);

    let (_events, root_id, status) = run_to_settled(&channel, "Resolve the shelf question").await;
    assert_eq!(status, TaskStatus::Completed);

    let conversations = orchestrator.conversations();
    assert_eq!(conversations.len(), 1);
    let conversation = &conversations[0];
    assert_eq!(conversation.topic, "Storage allocation");
    assert_eq!(conversation.initiator, "fennel");
    assert!(matches!(
        conversation.status,
        guildhall::ConversationStatus::Resolved
    ));
    let speakers: Vec<&str> = conversation
        .history
        .iter()
        .map(|m| m.agent.as_str())
        .collect();
    assert_eq!(speakers, vec!["brick", "mara", "brick", "mara"]);
    assert_eq!(conversation.history[0].message, "The north shelf is mine by charter");

    let tasks = orchestrator.tasks_snapshot();
    let fennel_task = tasks
        .iter()
        .find(|t| t.assignee == "fennel")
        .expect("fennel's task");
    assert_eq!(conversation.parent_task_id, fennel_task.id);
    assert!(fennel_task
        .history
        .iter()
        .any(|entry| entry.message.contains("Parked pending conversation")));
    assert!(fennel_task
        .history
        .iter()
        .any(|entry| entry.message.contains("Conversation 'Storage allocation' resolved")));
    // Resuming the parked task records resolution once, not a second
    // acceptance entry on top of it.
    assert!(
        fennel_task.history.windows(2).all(|pair| {
            !(pair[0].status == TaskStatus::InProgress
                && pair[1].status == TaskStatus::InProgress)
        }),
        "duplicate consecutive InProgress entries: {:?}",
        fennel_task.history
    );

    let root = orchestrator.task(root_id).expect("root kept");
    assert_eq!(
        root.result.expect("aggregate result")["fennel"]["result"],
        json!("Storage dispute resolved amicably")
    );
}

// === Run Control ===

#[tokio::test]
async fn test_reset_discards_run_state() {
    let brain = RoutedBrain::new();
    let config = json!({
        "name": "resettable-guild",
        "master_agent": {"name": "mara", "role": {"name": "Guildmaster"}}
    })
    .to_string();
    let (orchestrator, channel) = build_org(&config, ToolRegistry::new(), brain);

    channel
        .send(HostCommand::RunGoal {
            goal: "Inventory the cellar".to_string(),
        })
        .expect("command sent");
    channel.send(HostCommand::Reset).expect("reset sent");

    for _ in 0..200 {
        if orchestrator.epoch() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(orchestrator.epoch(), 1);
    assert!(orchestrator.tasks_snapshot().is_empty());
    assert!(orchestrator.root_task_id().is_none());
    assert!(orchestrator.conversations().is_empty());
    assert!(orchestrator.org_tree().is_none());
    assert!(matches!(
        orchestrator.run_goal("again"),
        Err(GuildError::NoMasterAgent)
    ));
}
