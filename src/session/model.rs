use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of conversation turns kept on a session. Older turns are
/// dropped first so the backend context stays bounded.
pub const MAX_HISTORY_LENGTH: usize = 20;

/// How many characters of the raw request a summary exposes.
const SUMMARY_REQUEST_CHARS: usize = 100;

/// Lifecycle stage of a refinement session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Created,
    P1Generated,
    EvaluationComplete,
    RefinementComplete,
    Completed,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::P1Generated => "p1_generated",
            Self::EvaluationComplete => "evaluation_complete",
            Self::RefinementComplete => "refinement_complete",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "p1_generated" => Ok(Self::P1Generated),
            "evaluation_complete" => Ok(Self::EvaluationComplete),
            "refinement_complete" => Ok(Self::RefinementComplete),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid stage: {}", s)),
        }
    }
}

/// Role of a conversation turn sent to or received from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One turn of the backend conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// A backend critique of the current prompt.
///
/// The backend is asked for JSON but is free to ignore that; parse failures
/// degrade to the raw text rather than erroring. Untagged variant order
/// matters: `Raw` must come first so a JSON string deserializes as raw text
/// and everything else falls through to `Structured`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvaluationReport {
    Raw(String),
    Structured(serde_json::Value),
}

impl EvaluationReport {
    /// Parse backend output as a structured critique, falling back to the
    /// raw text. Only JSON objects and arrays count as structured; a bare
    /// JSON scalar is kept as text.
    pub fn from_backend_text(text: &str) -> Self {
        let stripped = strip_json_fence(text);
        match serde_json::from_str::<serde_json::Value>(stripped) {
            Ok(value) if value.is_object() || value.is_array() => Self::Structured(value),
            _ => Self::Raw(text.trim().to_string()),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }

    /// The report as text, for embedding into the refinement prompt.
    pub fn as_text(&self) -> String {
        match self {
            Self::Raw(text) => text.clone(),
            Self::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

/// Peel a ```json ... ``` (or plain ```) fence off backend output.
fn strip_json_fence(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Which prompt field a manual edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditTarget {
    P1,
    Current,
    Final,
}

impl EditTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P1 => "p1",
            Self::Current => "current",
            Self::Final => "final",
        }
    }
}

impl FromStr for EditTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p1" => Ok(Self::P1),
            "current" => Ok(Self::Current),
            "final" => Ok(Self::Final),
            _ => Err(format!("Invalid edit target: {} (expected p1, current or final)", s)),
        }
    }
}

/// Append-only record of a manual prompt override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserModification {
    pub timestamp: DateTime<Utc>,
    pub stage: EditTarget,
    pub original_text: String,
    pub new_text: String,
    pub comment: Option<String>,
}

/// Per-phase counts of failed backend attempts. Observability only; nothing
/// reads these to drive backoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCounters {
    pub p1_generation: u32,
    pub evaluation: u32,
    pub refinement: u32,
}

/// The backend phase a retry counter or error record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    P1Generation,
    Evaluation,
    Refinement,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P1Generation => "p1_generation",
            Self::Evaluation => "evaluation",
            Self::Refinement => "refinement",
        }
    }
}

/// One end-to-end prompt-refinement task.
///
/// Mutated only through orchestrator operations; every mutation refreshes
/// `updated_at`. Field names follow the persisted JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub stage: SessionStage,
    pub raw_request: String,
    pub task_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Exact instruction text sent to the backend for the first draft.
    #[serde(default)]
    pub initial_prompt: String,
    /// First backend output (the P1 draft).
    #[serde(default)]
    pub p1_prompt: String,
    #[serde(default)]
    pub evaluation_reports: Vec<EvaluationReport>,
    #[serde(default)]
    pub refined_prompts: Vec<String>,
    /// The working prompt; authoritative input for the next evaluate/refine.
    #[serde(default)]
    pub current_prompt: String,
    /// Set only at completion; equals `current_prompt` at that moment.
    #[serde(default)]
    pub final_prompt: String,

    pub model_override: Option<String>,
    pub provider_override: Option<String>,
    pub template_name: Option<String>,
    pub template_variables: Option<HashMap<String, String>>,

    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    pub last_error: Option<String>,
    pub error_stage: Option<String>,
    #[serde(default)]
    pub retries: RetryCounters,
    #[serde(default)]
    pub user_modifications: Vec<UserModification>,

    pub current_recursion_depth: u32,
    pub max_recursion_depth: u32,
}

impl Session {
    pub fn new(
        raw_request: String,
        task_type: String,
        model_override: Option<String>,
        provider_override: Option<String>,
        template_name: Option<String>,
        template_variables: Option<HashMap<String, String>>,
        max_recursion_depth: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_session_id(),
            stage: SessionStage::Created,
            raw_request,
            task_type,
            created_at: now,
            updated_at: now,
            initial_prompt: String::new(),
            p1_prompt: String::new(),
            evaluation_reports: Vec::new(),
            refined_prompts: Vec::new(),
            current_prompt: String::new(),
            final_prompt: String::new(),
            model_override,
            provider_override,
            template_name,
            template_variables,
            conversation_history: Vec::new(),
            last_error: None,
            error_stage: None,
            retries: RetryCounters::default(),
            user_modifications: Vec::new(),
            current_recursion_depth: 0,
            max_recursion_depth,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Append a turn, evicting the oldest entries beyond the cap.
    pub fn push_history(&mut self, role: Role, content: impl Into<String>) {
        self.conversation_history.push(ConversationTurn {
            role,
            content: content.into(),
        });
        if self.conversation_history.len() > MAX_HISTORY_LENGTH {
            let excess = self.conversation_history.len() - MAX_HISTORY_LENGTH;
            self.conversation_history.drain(..excess);
        }
        self.touch();
    }

    /// Record a backend failure for the given phase.
    pub fn record_error(&mut self, phase: Phase, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.error_stage = Some(phase.as_str().to_string());
        self.increment_retry(phase);
        self.touch();
    }

    /// A successful call in the same phase clears the failure record.
    pub fn clear_error(&mut self, phase: Phase) {
        if self.error_stage.as_deref() == Some(phase.as_str()) {
            self.last_error = None;
            self.error_stage = None;
        }
    }

    pub fn increment_retry(&mut self, phase: Phase) -> u32 {
        let counter = match phase {
            Phase::P1Generation => &mut self.retries.p1_generation,
            Phase::Evaluation => &mut self.retries.evaluation,
            Phase::Refinement => &mut self.retries.refinement,
        };
        *counter += 1;
        *counter
    }

    /// Log a manual override of a prompt field. The caller applies the field
    /// mutation itself; this only records it.
    pub fn record_user_modification(
        &mut self,
        target: EditTarget,
        original_text: String,
        new_text: String,
        comment: Option<String>,
    ) {
        self.user_modifications.push(UserModification {
            timestamp: Utc::now(),
            stage: target,
            original_text,
            new_text,
            comment: comment.clone(),
        });
        let mut note = format!("User edited the {} prompt", target.as_str());
        if let Some(comment) = comment {
            note.push_str(&format!(" ({})", comment));
        }
        self.push_history(Role::System, note);
    }

    pub fn latest_evaluation(&self) -> Option<&EvaluationReport> {
        self.evaluation_reports.last()
    }

    pub fn summary(&self) -> SessionSummary {
        let user_request = if self.raw_request.chars().count() > SUMMARY_REQUEST_CHARS {
            let truncated: String = self.raw_request.chars().take(SUMMARY_REQUEST_CHARS).collect();
            format!("{}...", truncated)
        } else {
            self.raw_request.clone()
        };
        SessionSummary {
            id: self.id.clone(),
            user_request,
            task_type: self.task_type.clone(),
            stage: self.stage,
            created_at: self.created_at,
            updated_at: self.updated_at,
            has_p1: !self.p1_prompt.is_empty(),
            evaluation_count: self.evaluation_reports.len(),
            refinement_count: self.refined_prompts.len(),
            has_final: !self.final_prompt.is_empty(),
            has_error: self.last_error.is_some(),
            model: self.model_override.clone(),
            provider: self.provider_override.clone(),
            template: self.template_name.clone(),
        }
    }
}

/// Identifying/status fields only; listing sessions never loads histories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub user_request: String,
    pub task_type: String,
    pub stage: SessionStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub has_p1: bool,
    pub evaluation_count: usize,
    pub refinement_count: usize,
    pub has_final: bool,
    pub has_error: bool,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub template: Option<String>,
}

/// Session ids look like `sess_<12 hex>_<unix seconds>`.
pub fn generate_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("sess_{}_{}", &hex[..12], Utc::now().timestamp())
}
