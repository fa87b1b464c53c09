//! Multi-party conversations with bounded, strict turn-taking

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mail::{Mail, MailBody, MailRouter};
use crate::task::TaskId;

/// Turns each participant gets before the conversation ends
pub const MAX_TURNS_PER_PARTICIPANT: usize = 2;

/// Sender name on coordinator-generated mail; also the synthetic speaker
/// that seeds the rotation without being recorded
pub const SYSTEM_SPEAKER: &str = "System";

/// Unique identifier for a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationStatus {
    Active,
    Resolved,
}

/// One recorded turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub agent: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A conversation resolving one parked task
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// The task parked while this conversation runs
    pub parent_task_id: TaskId,
    pub topic: String,
    pub participants: Vec<String>,
    pub history: Vec<ConversationMessage>,
    pub status: ConversationStatus,
    /// Assignee of the parent task; receives the summary request
    pub initiator: String,
}

impl Conversation {
    /// Recorded turns after which the conversation resolves.
    fn turn_budget(&self) -> usize {
        self.participants.len() * MAX_TURNS_PER_PARTICIPANT
    }

    /// Speaker for the next turn: participants in fixed rotation, indexed
    /// by how many turns are already recorded.
    fn next_speaker(&self) -> &str {
        &self.participants[self.history.len() % self.participants.len()]
    }
}

/// Runs the turn-taking protocol over the mailbox router.
///
/// The coordinator never calls a brain itself; it invites participants to
/// speak and records what comes back until the turn budget is spent.
pub struct ConversationCoordinator {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
    router: Arc<MailRouter>,
}

impl ConversationCoordinator {
    pub fn new(router: Arc<MailRouter>) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            router,
        }
    }

    /// Open a conversation for a parked task and invite the first speaker.
    /// Returns `None` without side effects when there is nobody to talk to.
    pub fn start(
        &self,
        parent_task_id: TaskId,
        topic: &str,
        participants: Vec<String>,
        initiator: &str,
    ) -> Option<ConversationId> {
        if participants.is_empty() {
            warn!(task = %parent_task_id, topic, "Refusing to start a conversation with no participants");
            return None;
        }
        let conversation = Conversation {
            id: ConversationId::new(),
            parent_task_id,
            topic: topic.to_string(),
            participants,
            history: Vec::new(),
            status: ConversationStatus::Active,
            initiator: initiator.to_string(),
        };
        let id = conversation.id;
        info!(conversation = %id, topic, initiator, "Conversation opened");
        self.conversations.write().insert(id, conversation);

        // Synthetic seed turn: kicks the rotation without being recorded.
        self.advance(id, SYSTEM_SPEAKER, &format!("Discussion opened: {topic}"));
        Some(id)
    }

    /// Record a turn and move the rotation forward. Turns from the system
    /// speaker seed the rotation but are not recorded; turns arriving
    /// after resolution are ignored.
    pub fn advance(&self, id: ConversationId, speaker: &str, message: &str) {
        let outgoing = {
            let mut conversations = self.conversations.write();
            let Some(conversation) = conversations.get_mut(&id) else {
                warn!(conversation = %id, speaker, "Turn for unknown conversation, ignoring");
                return;
            };
            if conversation.status == ConversationStatus::Resolved {
                debug!(conversation = %id, speaker, "Turn after resolution, ignoring");
                return;
            }
            if speaker != SYSTEM_SPEAKER {
                conversation.history.push(ConversationMessage {
                    agent: speaker.to_string(),
                    message: message.to_string(),
                    at: Utc::now(),
                });
            }

            if conversation.history.len() >= conversation.turn_budget() {
                conversation.status = ConversationStatus::Resolved;
                info!(conversation = %id, turns = conversation.history.len(), "Conversation resolved, requesting summary");
                Mail::new(
                    SYSTEM_SPEAKER,
                    conversation.initiator.clone(),
                    MailBody::SummarizeConversation {
                        conversation_id: id,
                        parent_task_id: conversation.parent_task_id,
                        topic: conversation.topic.clone(),
                        transcript: conversation.history.clone(),
                    },
                )
            } else {
                let next = conversation.next_speaker().to_string();
                Mail::new(
                    SYSTEM_SPEAKER,
                    next,
                    MailBody::ConversationTurn {
                        conversation_id: id,
                        topic: conversation.topic.clone(),
                        transcript: conversation.history.clone(),
                        initiator: conversation.initiator.clone(),
                    },
                )
            }
        };
        self.router.send(outgoing);
    }

    pub fn get(&self, id: ConversationId) -> Option<Conversation> {
        self.conversations.read().get(&id).cloned()
    }

    /// All conversations, in no guaranteed order.
    pub fn snapshot(&self) -> Vec<Conversation> {
        self.conversations.read().values().cloned().collect()
    }

    pub fn reset(&self) {
        self.conversations.write().clear();
    }
}
