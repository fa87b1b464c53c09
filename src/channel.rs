//! Host-facing command and event channels

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::environment::EnvironmentEvent;
use crate::mail::MailRecord;
use crate::org::OrgTreeNode;
use crate::task::{Task, TaskId, TaskStatus};

/// Unique identifier for a pending human-input request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct InputRequestId(Uuid);

impl InputRequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InputRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InputRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A question parked with the operator
#[derive(Debug, Clone, Serialize)]
pub struct HumanInputRequest {
    pub id: InputRequestId,
    pub question: String,
    /// The task parked until the answer arrives
    pub task_id: TaskId,
    /// Agent that asked
    pub agent: String,
}

/// Commands a host may issue to a running organization
#[derive(Debug, Clone)]
pub enum HostCommand {
    /// Seed and dispatch a root task for this goal
    RunGoal { goal: String },
    /// Answer a pending human-input request
    HumanInput {
        request_id: InputRequestId,
        response: String,
    },
    /// Tear the run down; in-flight work is discarded
    Reset,
}

/// Fire-and-forget state pushes to the host
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostEvent {
    /// Emitted once after the org chart is built
    OrganizationLoaded { tree: OrgTreeNode },
    /// Full task list after any task mutation
    TasksChanged { tasks: Vec<Task> },
    /// All environment states after any tool execution
    EnvironmentsChanged { states: HashMap<String, Value> },
    /// All conversations after any conversation mutation
    ConversationsChanged { conversations: Vec<Conversation> },
    /// A single tool-raised event, as broadcast to agents
    EnvironmentEventRaised { event: EnvironmentEvent },
    /// Audit record of one mail send attempt
    MailLogged { mail: MailRecord },
    /// A tool parked its task on an operator answer
    HumanInputRequested { request: HumanInputRequest },
    /// The root task reached a terminal status
    RunSettled { task_id: TaskId, status: TaskStatus },
}

/// Channel pair handed to the orchestrator
pub struct ChannelPair {
    pub command_rx: mpsc::UnboundedReceiver<HostCommand>,
    pub event_tx: mpsc::UnboundedSender<HostEvent>,
}

/// Client-side handle for hosts.
///
/// Clones share one event stream; each event is seen by exactly one
/// receiver call.
#[derive(Clone)]
pub struct GuildChannel {
    command_tx: mpsc::UnboundedSender<HostCommand>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<HostEvent>>>,
}

impl GuildChannel {
    /// Create a new channel, returning the host handle and the
    /// orchestrator-side pair.
    pub fn new() -> (Self, ChannelPair) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let channel = Self {
            command_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
        };
        let pair = ChannelPair {
            command_rx,
            event_tx,
        };
        (channel, pair)
    }

    /// Send a command to the orchestrator.
    pub fn send(&self, command: HostCommand) -> Result<(), ChannelError> {
        self.command_tx.send(command).map_err(|_| ChannelError::Closed)
    }

    /// Receive the next event, waiting for one.
    pub async fn recv(&self) -> Option<HostEvent> {
        self.event_rx.lock().await.recv().await
    }

    /// Receive an event if one is already queued.
    pub fn try_recv(&self) -> Option<HostEvent> {
        self.event_rx.try_lock().ok()?.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,
}
