//! Mail protocol and the mailbox router

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::conversation::{ConversationId, ConversationMessage};
use crate::environment::EnvironmentEvent;
use crate::task::{Task, TaskId};

/// Unique identifier for a mail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MailId(Uuid);

impl MailId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MailId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload of a mail, one variant per subject
#[derive(Debug, Clone)]
pub enum MailBody {
    /// Assign a task to its assignee
    NewTask { task: Task },
    /// Report a task back to its issuer
    TaskUpdate { task: Task },
    /// Broadcast of a tool-raised event to co-located agents
    EnvironmentEvent { event: EnvironmentEvent },
    /// Invite the recipient to speak next in a conversation
    ConversationTurn {
        conversation_id: ConversationId,
        topic: String,
        transcript: Vec<ConversationMessage>,
        initiator: String,
    },
    /// A participant's spoken turn, routed to the initiator for recording
    ConversationResponse {
        conversation_id: ConversationId,
        speaker: String,
        message: String,
    },
    /// Ask the initiator to distill a finished conversation
    SummarizeConversation {
        conversation_id: ConversationId,
        parent_task_id: TaskId,
        topic: String,
        transcript: Vec<ConversationMessage>,
    },
}

impl MailBody {
    /// Subject line for logs and audit records.
    pub fn subject(&self) -> &'static str {
        match self {
            MailBody::NewTask { .. } => "NEW_TASK",
            MailBody::TaskUpdate { .. } => "TASK_UPDATE",
            MailBody::EnvironmentEvent { .. } => "ENVIRONMENT_EVENT",
            MailBody::ConversationTurn { .. } => "CONVERSATION_TURN",
            MailBody::ConversationResponse { .. } => "CONVERSATION_RESPONSE",
            MailBody::SummarizeConversation { .. } => "SUMMARIZE_CONVERSATION",
        }
    }
}

/// A message between named actors
#[derive(Debug, Clone)]
pub struct Mail {
    pub id: MailId,
    pub from: String,
    pub to: String,
    pub body: MailBody,
    pub sent_at: DateTime<Utc>,
}

impl Mail {
    pub fn new(from: impl Into<String>, to: impl Into<String>, body: MailBody) -> Self {
        Self {
            id: MailId::new(),
            from: from.into(),
            to: to.into(),
            body,
            sent_at: Utc::now(),
        }
    }
}

/// Flat, serializable view of a mail for the audit stream
#[derive(Debug, Clone, Serialize)]
pub struct MailRecord {
    pub id: MailId,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
}

impl MailRecord {
    pub fn of(mail: &Mail) -> Self {
        Self {
            id: mail.id,
            from: mail.from.clone(),
            to: mail.to.clone(),
            subject: mail.body.subject().to_string(),
            sent_at: mail.sent_at,
        }
    }
}

/// Callback invoked for every send attempt, delivered or not
pub type AuditHook = Arc<dyn Fn(&Mail) + Send + Sync>;

/// Delivers mail to registered mailboxes by exact agent name.
///
/// Sends never block: each mailbox is an unbounded queue drained by its
/// agent's worker. Mail to an unregistered name is logged and dropped.
#[derive(Default)]
pub struct MailRouter {
    entries: RwLock<HashMap<String, mpsc::UnboundedSender<Mail>>>,
    audit: RwLock<Option<AuditHook>>,
}

impl MailRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the audit callback. It observes every send attempt before
    /// delivery is tried.
    pub fn set_audit_hook(&self, hook: AuditHook) {
        *self.audit.write() = Some(hook);
    }

    /// Register a mailbox under `address`, replacing any previous one.
    pub fn register(&self, address: impl Into<String>, sender: mpsc::UnboundedSender<Mail>) {
        self.entries.write().insert(address.into(), sender);
    }

    /// Remove a mailbox. Returns whether one was registered.
    pub fn unregister(&self, address: &str) -> bool {
        self.entries.write().remove(address).is_some()
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.entries.read().contains_key(address)
    }

    /// Fire-and-forget delivery to the recipient's mailbox.
    pub fn send(&self, mail: Mail) {
        let hook = self.audit.read().clone();
        if let Some(hook) = hook {
            hook(&mail);
        }
        let entries = self.entries.read();
        match entries.get(&mail.to) {
            Some(sender) => {
                // A failed send means the receiver is gone mid-reset;
                // the mail is discarded either way.
                let _ = sender.send(mail);
            }
            None => {
                warn!(
                    to = %mail.to,
                    from = %mail.from,
                    subject = mail.body.subject(),
                    "Dropped mail: no mailbox registered"
                );
            }
        }
    }

    /// Drop every registration. Pending queues close as their senders go.
    pub fn reset(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
