//! External brain capability and call governance

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// A tool surfaced to the brain's function-calling interface
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// What the brain answered
#[derive(Debug, Clone, PartialEq)]
pub enum BrainResponse {
    /// Free text, treated as a direct answer
    Text(String),
    /// A request to invoke one of the declared tools
    FunctionCall { name: String, args: Value },
}

/// Failures at the brain boundary
#[derive(Debug, Error)]
pub enum BrainError {
    /// The run's total call budget is spent; callers must not wait
    #[error("brain call budget exhausted ({limit} calls)")]
    BudgetExhausted { limit: u64 },
    /// The backend itself failed
    #[error("brain transport failure: {0}")]
    Transport(String),
}

/// Opaque language and image generation capability.
///
/// The simulator never interprets prompts; everything an agent "thinks"
/// goes through this seam, so hosts decide what intelligence backs it.
#[async_trait]
pub trait Brain: Send + Sync {
    /// Generate a response for `actor`. When `tools` is non-empty the
    /// brain may answer with a function call instead of text; `force_tool_call`
    /// demands one.
    async fn generate_response(
        &self,
        prompt: &str,
        actor: &str,
        tools: &[ToolDeclaration],
        force_tool_call: bool,
    ) -> Result<BrainResponse, BrainError>;

    /// Generate `count` images as data URIs.
    async fn generate_images(
        &self,
        prompt: &str,
        actor: &str,
        count: usize,
    ) -> Result<Vec<String>, BrainError>;
}

/// Rate and budget limits applied to one run's brain
#[derive(Debug, Clone, Copy)]
pub struct BrainLimits {
    /// Admissions allowed inside any sliding 60 second window
    pub calls_per_minute: usize,
    /// Hard ceiling on total calls; `None` means unlimited
    pub max_total_calls: Option<u64>,
}

impl Default for BrainLimits {
    fn default() -> Self {
        Self {
            calls_per_minute: 30,
            max_total_calls: None,
        }
    }
}

/// Running tallies for a governed brain
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BrainStats {
    /// Calls admitted past the governor
    pub attempted: u64,
    /// Backend calls that returned Ok
    pub succeeded: u64,
    /// Backend calls that returned Err
    pub failed: u64,
}

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window and total-budget gate in front of a brain backend.
///
/// Window pressure delays callers until headroom opens; it never drops a
/// call. The total budget is different: once spent, every further call
/// fails fast with [`BrainError::BudgetExhausted`].
pub struct GovernedBrain {
    inner: Arc<dyn Brain>,
    limits: BrainLimits,
    window: Mutex<VecDeque<Instant>>,
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl GovernedBrain {
    pub fn new(inner: Arc<dyn Brain>, limits: BrainLimits) -> Self {
        Self {
            inner,
            limits,
            window: Mutex::new(VecDeque::new()),
            attempted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> BrainStats {
        BrainStats {
            attempted: self.attempted.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    /// Wait for window headroom, then claim a slot. Budget exhaustion is
    /// checked first on every pass so spent runs fail without waiting.
    async fn admit(&self) -> Result<(), BrainError> {
        loop {
            if let Some(limit) = self.limits.max_total_calls {
                if self.attempted.load(Ordering::SeqCst) >= limit {
                    return Err(BrainError::BudgetExhausted { limit });
                }
            }
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while window
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= WINDOW)
                {
                    window.pop_front();
                }
                if window.len() < self.limits.calls_per_minute.max(1) {
                    window.push_back(now);
                    None
                } else {
                    // Headroom opens when the oldest admission ages out.
                    let oldest = window[0];
                    Some(WINDOW.saturating_sub(now.duration_since(oldest)))
                }
            };
            match wait {
                None => {
                    self.attempted.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "Brain window full, waiting");
                    sleep(delay).await;
                }
            }
        }
    }

    fn tally<T>(&self, result: Result<T, BrainError>) -> Result<T, BrainError> {
        match &result {
            Ok(_) => self.succeeded.fetch_add(1, Ordering::SeqCst),
            Err(_) => self.failed.fetch_add(1, Ordering::SeqCst),
        };
        result
    }
}

#[async_trait]
impl Brain for GovernedBrain {
    async fn generate_response(
        &self,
        prompt: &str,
        actor: &str,
        tools: &[ToolDeclaration],
        force_tool_call: bool,
    ) -> Result<BrainResponse, BrainError> {
        self.admit().await?;
        self.tally(
            self.inner
                .generate_response(prompt, actor, tools, force_tool_call)
                .await,
        )
    }

    async fn generate_images(
        &self,
        prompt: &str,
        actor: &str,
        count: usize,
    ) -> Result<Vec<String>, BrainError> {
        self.admit().await?;
        self.tally(self.inner.generate_images(prompt, actor, count).await)
    }
}

/// Brain double that plays back a queued script, echoing once it runs dry.
///
/// Useful for hosts without a backend and for deterministic tests.
pub struct ScriptedBrain {
    script: parking_lot::Mutex<VecDeque<BrainResponse>>,
}

impl ScriptedBrain {
    pub fn new() -> Self {
        Self {
            script: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_script(responses: impl IntoIterator<Item = BrainResponse>) -> Self {
        Self {
            script: parking_lot::Mutex::new(responses.into_iter().collect()),
        }
    }

    /// Queue one more response.
    pub fn push(&self, response: BrainResponse) {
        self.script.lock().push_back(response);
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl Default for ScriptedBrain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Brain for ScriptedBrain {
    async fn generate_response(
        &self,
        prompt: &str,
        actor: &str,
        _tools: &[ToolDeclaration],
        _force_tool_call: bool,
    ) -> Result<BrainResponse, BrainError> {
        if let Some(next) = self.script.lock().pop_front() {
            return Ok(next);
        }
        let first_line = prompt.lines().next().unwrap_or("").trim();
        Ok(BrainResponse::Text(format!(
            "[{actor}] acknowledged: {first_line}"
        )))
    }

    async fn generate_images(
        &self,
        _prompt: &str,
        actor: &str,
        count: usize,
    ) -> Result<Vec<String>, BrainError> {
        Ok((0..count)
            .map(|i| format!("data:image/png;base64,scripted-{actor}-{i}"))
            .collect())
    }
}
