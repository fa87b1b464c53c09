//! # Guildhall
//!
//! Hierarchical agent organization simulator - the guild at work.
//!
//! This crate runs an organization of AI agents arranged in a management
//! chain. A goal enters at the top, managers break it into dependency-ordered
//! sub-tasks and delegate them downward, and workers complete their piece by
//! thinking or by acting on shared environments through permissioned tools.
//!
//! ## Architecture
//!
//! ```text
//!                        HOST
//!            commands ▼        ▲ events
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         ORCHESTRATOR                         │
//! │      task registry · mail router · environments · brain      │
//! └───────────────────────────────┬──────────────────────────────┘
//!                                 │ mail
//!                          ┌──────┴──────┐
//!                          │ Guildmaster │
//!                          └──────┬──────┘
//!                ┌───────────────┼───────────────┐
//!                ▼               ▼               ▼
//!           ┌──────────┐    ┌──────────┐    ┌──────────┐
//!           │ Manager  │    │  Worker  │    │  Worker  │
//!           └────┬─────┘    └────┬─────┘    └────┬─────┘
//!              ┌─┴──┐            │ tools         │ tools
//!              ▼    ▼            ▼               ▼
//!           ┌───┐ ┌───┐    ┌─────────────────────────┐
//!           │ W │ │ W │    │  shared environments    │
//!           └───┘ └───┘    └─────────────────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Agent**: one organizational role with a mailbox, short-term memory
//!   and permissions; managers delegate, workers think and act
//! - **Task**: a unit of delegated work; flows down the chain as mail and
//!   is reported back to its issuer when it settles
//! - **Environment**: a named domain of shared mutable state that agents
//!   act on through permissioned tools
//! - **Brain**: the language-model boundary, rate limited and budgeted
//! - **SOP**: a standard operating procedure; a matching, fully staffed
//!   procedure beats free planning

pub mod agent;
pub mod brain;
pub mod channel;
pub mod config;
pub mod conversation;
pub mod environment;
pub mod error;
pub mod mail;
pub mod orchestrator;
pub mod org;
pub mod prompt;
pub mod task;
pub mod tools;
pub mod workflow;

pub use agent::{Agent, AgentHandle, MEMORY_CAPACITY};
pub use brain::{
    Brain, BrainError, BrainLimits, BrainResponse, BrainStats, GovernedBrain, ScriptedBrain,
    ToolDeclaration,
};
pub use channel::{
    ChannelError, ChannelPair, GuildChannel, HostCommand, HostEvent, HumanInputRequest,
    InputRequestId,
};
pub use config::{AgentNode, EnvironmentConfig, LlmConfig, OrgConfig};
pub use conversation::{
    Conversation, ConversationId, ConversationMessage, ConversationStatus,
    MAX_TURNS_PER_PARTICIPANT, SYSTEM_SPEAKER,
};
pub use environment::{Environment, EnvironmentEvent};
pub use error::GuildError;
pub use mail::{Mail, MailBody, MailId, MailRecord, MailRouter};
pub use orchestrator::{Orchestrator, ORCHESTRATOR_ADDRESS};
pub use org::{AgentProfile, OrgDirectory, OrgTreeNode, Permissions, Role};
pub use task::{HistoryEntry, PlannedTask, Task, TaskId, TaskStatus, MAX_RETRIES};
pub use tools::{EventDraft, Tool, ToolContext, ToolOutcome, ToolRegistry, ToolResult};
pub use workflow::{Sop, SopStep, WorkflowLibrary};
