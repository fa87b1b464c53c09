//! Guild error types

use thiserror::Error;

use crate::brain::BrainError;
use crate::channel::InputRequestId;
use crate::task::TaskId;

/// Errors that can occur in the guild system
#[derive(Debug, Error)]
pub enum GuildError {
    /// The organization has no manager-less top agent
    #[error("No master agent in organization")]
    NoMasterAgent,

    /// Task not found
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Environment not found
    #[error("Environment not found: {0}")]
    EnvironmentNotFound(String),

    /// Tool not registered or not available in the environment
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool exists but the caller's role is not on its allow-list
    #[error("Permission denied: role '{role}' may not use tool '{tool}'")]
    PermissionDenied { tool: String, role: String },

    /// Tool ran and failed internally
    #[error("Tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// Brain call failed
    #[error("Brain error: {0}")]
    Brain(#[from] BrainError),

    /// Planning produced nothing usable
    #[error("Planning error: {0}")]
    Planning(String),

    /// Human input request not found
    #[error("Input request not found: {0}")]
    InputRequestNotFound(InputRequestId),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
