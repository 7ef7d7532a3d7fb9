use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::{LlmError, OrchestratorError, StoreError};
use crate::llm::{ClientRegistry, TextGenerationClient, clean_output};
use crate::session::{
    Action, EditTarget, EvaluationReport, Phase, RefineDisposition, Role, Session, SessionStage,
    SessionSummary, TransitionError, can_transition, refine_disposition,
};
use crate::store::SessionStore;
use crate::templates;

/// Parameters for opening a new session. Everything beyond the raw request
/// is optional and defaults from config.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    pub raw_request: String,
    pub task_type: Option<String>,
    pub model_override: Option<String>,
    pub provider_override: Option<String>,
    pub template_name: Option<String>,
    pub template_variables: Option<HashMap<String, String>>,
    pub max_recursion_depth: Option<u32>,
}

/// How a refine attempt ended. All three carry the persisted session;
/// `Converged` and `MaxDepthReached` leave it `Completed`.
#[derive(Debug)]
pub enum RefineOutcome {
    Refined(Session),
    Converged(Session),
    MaxDepthReached(Session),
}

impl RefineOutcome {
    pub fn session(&self) -> &Session {
        match self {
            Self::Refined(s) | Self::Converged(s) | Self::MaxDepthReached(s) => s,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            Self::Refined(s) | Self::Converged(s) | Self::MaxDepthReached(s) => s,
        }
    }

    /// True when the session can take no further refine steps.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Refined(_))
    }
}

/// Sequences backend calls over persisted sessions.
///
/// Operations on the same session are serialized through a per-session lock;
/// a second caller blocks until the first persists, then revalidates against
/// the updated stage. Different sessions proceed concurrently.
pub struct RefinementOrchestrator {
    config: Config,
    store: Arc<dyn SessionStore>,
    registry: ClientRegistry,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RefinementOrchestrator {
    pub fn new(config: Config, store: Arc<dyn SessionStore>, registry: ClientRegistry) -> Self {
        Self {
            config,
            store,
            registry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Names of the registered backend providers.
    pub fn providers(&self) -> Vec<String> {
        self.registry.providers()
    }

    async fn session_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, id: &str) -> Result<Session, OrchestratorError> {
        match self.store.get(id).await {
            Ok(session) => Ok(session),
            Err(StoreError::NotFound { id }) => Err(OrchestratorError::SessionNotFound { id }),
            Err(err) => Err(err.into()),
        }
    }

    fn resolve_client(
        &self,
        session: &Session,
        phase: &'static str,
    ) -> Result<Box<dyn TextGenerationClient>, OrchestratorError> {
        self.registry
            .resolve(
                &self.config,
                session.provider_override.as_deref(),
                session.model_override.as_deref(),
            )
            .map_err(|e| match e {
                // Resolution failures are setup problems, not call failures
                LlmError::UnknownProvider(_) | LlmError::Misconfiguration(_) => {
                    OrchestratorError::Configuration(e.to_string())
                }
                other => OrchestratorError::llm(phase, other),
            })
    }

    /// Open a session in the `Created` stage. No backend call happens here.
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<Session, OrchestratorError> {
        if request.raw_request.trim().is_empty() {
            return Err(OrchestratorError::MissingPrompt {
                operation: "create_session",
            });
        }
        let session = Session::new(
            request.raw_request,
            request.task_type.unwrap_or_else(|| "general".to_string()),
            request.model_override,
            request.provider_override,
            request.template_name,
            request.template_variables,
            request
                .max_recursion_depth
                .unwrap_or(self.config.default_max_depth),
        );
        self.store.put(&session).await?;
        info!(session_id = %session.id, task_type = %session.task_type, "Session created");
        Ok(session)
    }

    /// Produce the first draft (P1) from the raw request.
    pub async fn generate_first_draft(&self, id: &str) -> Result<Session, OrchestratorError> {
        let lock = self.session_lock(id).await;
        let _guard = lock.lock().await;

        let mut session = self.load(id).await?;
        let next_stage = check(&session, Action::GenerateFirstDraft)?;
        let client = self.resolve_client(&session, "p1_generation")?;

        let instruction = templates::resolve_initial_prompt(
            session.template_name.as_deref(),
            session.template_variables.as_ref(),
            &session.task_type,
            &session.raw_request,
        );
        session.initial_prompt = instruction.clone();

        // First draft starts a fresh conversation
        let output = match client.generate(&instruction, &[]).await {
            Ok(text) => text,
            Err(err) => {
                return self
                    .fail(session, Phase::P1Generation, "p1_generation", err.to_string())
                    .await;
            }
        };
        let draft = clean_output(&output);
        if draft.is_empty() {
            return self
                .fail(
                    session,
                    Phase::P1Generation,
                    "p1_generation",
                    "backend returned empty output".to_string(),
                )
                .await;
        }

        session.push_history(Role::User, instruction);
        session.push_history(Role::Assistant, draft.clone());
        session.p1_prompt = draft.clone();
        session.current_prompt = draft;
        session.clear_error(Phase::P1Generation);
        session.stage = next_stage;
        session.touch();
        self.store.put(&session).await?;
        info!(session_id = %session.id, "First draft generated");
        Ok(session)
    }

    /// Critique the working prompt.
    pub async fn evaluate(&self, id: &str) -> Result<Session, OrchestratorError> {
        let lock = self.session_lock(id).await;
        let _guard = lock.lock().await;

        let mut session = self.load(id).await?;
        let next_stage = check(&session, Action::Evaluate)?;
        let client = self.resolve_client(&session, "evaluation")?;

        let instruction =
            templates::render_evaluation_prompt(&session.raw_request, &session.current_prompt);
        let output = match client.generate(&instruction, &session.conversation_history).await {
            Ok(text) => text,
            Err(err) => {
                return self
                    .fail(session, Phase::Evaluation, "evaluation", err.to_string())
                    .await;
            }
        };
        let cleaned = clean_output(&output);
        if cleaned.is_empty() {
            return self
                .fail(
                    session,
                    Phase::Evaluation,
                    "evaluation",
                    "backend returned empty output".to_string(),
                )
                .await;
        }
        let report = EvaluationReport::from_backend_text(&cleaned);
        if !report.is_structured() {
            warn!(session_id = %session.id, "Evaluation report kept as raw text");
        }

        session.push_history(Role::User, instruction);
        session.push_history(Role::Assistant, cleaned);
        session.evaluation_reports.push(report);
        session.clear_error(Phase::Evaluation);
        session.stage = next_stage;
        session.touch();
        self.store.put(&session).await?;
        info!(
            session_id = %session.id,
            evaluations = session.evaluation_reports.len(),
            "Evaluation complete"
        );
        Ok(session)
    }

    /// Rewrite the working prompt from the latest critique.
    ///
    /// Depth ceiling and convergence both finish the session instead of
    /// erroring; the distinction is in the returned [`RefineOutcome`].
    pub async fn refine(&self, id: &str) -> Result<RefineOutcome, OrchestratorError> {
        let lock = self.session_lock(id).await;
        let _guard = lock.lock().await;

        let mut session = self.load(id).await?;
        check(&session, Action::Refine)?;

        // Ceiling check happens before any backend call
        if refine_disposition(&session, None) == RefineDisposition::MaxDepthReached {
            session.push_history(
                Role::System,
                format!(
                    "Refinement depth limit ({}) reached; finalizing",
                    session.max_recursion_depth
                ),
            );
            session.final_prompt = session.current_prompt.clone();
            session.stage = SessionStage::Completed;
            session.touch();
            self.store.put(&session).await?;
            info!(session_id = %session.id, "Depth ceiling reached; session completed");
            return Ok(RefineOutcome::MaxDepthReached(session));
        }

        let client = self.resolve_client(&session, "refinement")?;
        let report_text = session
            .latest_evaluation()
            .map(EvaluationReport::as_text)
            .unwrap_or_default();
        let instruction = templates::render_refinement_prompt(
            &session.raw_request,
            &session.current_prompt,
            &report_text,
        );
        let output = match client.generate(&instruction, &session.conversation_history).await {
            Ok(text) => text,
            Err(err) => {
                return self
                    .fail(session, Phase::Refinement, "refinement", err.to_string())
                    .await
                    .map(RefineOutcome::Refined);
            }
        };
        let refined = clean_output(&output);
        if refined.is_empty() {
            return self
                .fail(
                    session,
                    Phase::Refinement,
                    "refinement",
                    "backend returned empty output".to_string(),
                )
                .await
                .map(RefineOutcome::Refined);
        }

        session.push_history(Role::User, instruction);
        session.push_history(Role::Assistant, refined.clone());
        let disposition = refine_disposition(&session, Some(&refined));
        // The text is logged either way so evaluation and refinement records
        // stay paired
        session.refined_prompts.push(refined.clone());
        session.clear_error(Phase::Refinement);

        match disposition {
            RefineDisposition::Converged => {
                session.final_prompt = session.current_prompt.clone();
                session.stage = SessionStage::Completed;
                session.touch();
                self.store.put(&session).await?;
                info!(session_id = %session.id, "Refinement converged; session completed");
                Ok(RefineOutcome::Converged(session))
            }
            _ => {
                session.current_prompt = refined;
                session.current_recursion_depth += 1;
                session.stage = SessionStage::RefinementComplete;
                session.touch();
                self.store.put(&session).await?;
                info!(
                    session_id = %session.id,
                    depth = session.current_recursion_depth,
                    "Prompt refined"
                );
                Ok(RefineOutcome::Refined(session))
            }
        }
    }

    /// Accept the working prompt as final. Legal from any stage with a
    /// non-empty prompt, including re-completing a completed session.
    pub async fn complete(&self, id: &str) -> Result<Session, OrchestratorError> {
        let lock = self.session_lock(id).await;
        let _guard = lock.lock().await;

        let mut session = self.load(id).await?;
        let next_stage = check(&session, Action::Complete)?;
        session.final_prompt = session.current_prompt.clone();
        session.stage = next_stage;
        session.touch();
        self.store.put(&session).await?;
        info!(session_id = %session.id, "Session completed");
        Ok(session)
    }

    /// Manually overwrite one of the prompt fields.
    ///
    /// Editing the draft rewinds the session to `P1Generated` so the edit
    /// gets re-evaluated; editing the final completes the session.
    pub async fn apply_user_edit(
        &self,
        id: &str,
        target: EditTarget,
        new_text: &str,
        comment: Option<String>,
    ) -> Result<Session, OrchestratorError> {
        if new_text.trim().is_empty() {
            return Err(OrchestratorError::MissingPrompt {
                operation: "apply_user_edit",
            });
        }
        let lock = self.session_lock(id).await;
        let _guard = lock.lock().await;

        let mut session = self.load(id).await?;
        let next_stage = check(&session, Action::ApplyUserEdit(target))?;
        let new_text = new_text.trim().to_string();

        let original = match target {
            EditTarget::P1 => {
                let original = session.p1_prompt.clone();
                session.p1_prompt = new_text.clone();
                session.current_prompt = new_text.clone();
                // Rewinding reopens the session; only a completed session
                // carries a final prompt
                session.final_prompt.clear();
                original
            }
            EditTarget::Current => {
                let original = session.current_prompt.clone();
                session.current_prompt = new_text.clone();
                original
            }
            EditTarget::Final => {
                let original = if session.final_prompt.is_empty() {
                    session.current_prompt.clone()
                } else {
                    session.final_prompt.clone()
                };
                session.final_prompt = new_text.clone();
                session.current_prompt = new_text.clone();
                original
            }
        };
        session.record_user_modification(target, original, new_text, comment);
        session.stage = next_stage;
        session.touch();
        self.store.put(&session).await?;
        info!(session_id = %session.id, target = target.as_str(), "User edit applied");
        Ok(session)
    }

    /// Drive a session from wherever it is to `Completed`: draft if needed,
    /// then evaluate/refine cycles until convergence or the depth ceiling.
    pub async fn run_to_completion(&self, id: &str) -> Result<Session, OrchestratorError> {
        let mut session = self.load(id).await?;
        if session.stage == SessionStage::Created {
            session = self.generate_first_draft(id).await?;
        }
        loop {
            match session.stage {
                SessionStage::Completed => return Ok(session),
                SessionStage::P1Generated | SessionStage::RefinementComplete => {
                    session = self.evaluate(id).await?;
                }
                SessionStage::EvaluationComplete => {
                    session = self.refine(id).await?.into_session();
                }
                SessionStage::Created => {
                    // Only reachable if a concurrent caller rewound the
                    // session; draft again.
                    session = self.generate_first_draft(id).await?;
                }
            }
        }
    }

    /// One-shot explanation of a term within the working prompt. Read-only;
    /// the session is not mutated.
    pub async fn explain_term(&self, id: &str, term: &str) -> Result<String, OrchestratorError> {
        let session = self.load(id).await?;
        let context = if session.current_prompt.trim().is_empty() {
            if session.raw_request.trim().is_empty() {
                return Err(OrchestratorError::MissingPrompt {
                    operation: "explain_term",
                });
            }
            session.raw_request.clone()
        } else {
            session.current_prompt.clone()
        };
        let client = self.resolve_client(&session, "explain_term")?;
        let instruction = templates::render_explain_prompt(term, &context);
        let output = client
            .generate(&instruction, &[])
            .await
            .map_err(|e| OrchestratorError::llm("explain_term", e))?;
        Ok(clean_output(&output))
    }

    pub async fn get_session(&self, id: &str) -> Result<Session, OrchestratorError> {
        self.load(id).await
    }

    pub async fn list_sessions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionSummary>, OrchestratorError> {
        Ok(self.store.list(limit, offset).await?)
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), OrchestratorError> {
        let lock = self.session_lock(id).await;
        let _guard = lock.lock().await;
        match self.store.delete(id).await {
            Ok(()) => {
                self.locks.lock().await.remove(id);
                Ok(())
            }
            Err(StoreError::NotFound { id }) => Err(OrchestratorError::SessionNotFound { id }),
            Err(err) => Err(err.into()),
        }
    }

    /// Reap sessions idle longer than the configured TTL.
    pub async fn sweep_expired(&self) -> Result<usize, OrchestratorError> {
        let removed = self.store.sweep_expired(self.config.session_ttl).await?;
        // Drop lock entries no caller currently holds, so the map does not
        // grow with every swept session; a live session gets its lock back
        // on the next operation.
        self.locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        if removed > 0 {
            info!(removed, "Swept expired sessions");
        }
        Ok(removed)
    }

    /// Record a backend failure on the session and persist it before
    /// surfacing the error; the stage is untouched so the caller can retry.
    async fn fail(
        &self,
        mut session: Session,
        phase: Phase,
        phase_name: &'static str,
        message: String,
    ) -> Result<Session, OrchestratorError> {
        warn!(session_id = %session.id, phase = phase_name, error = %message, "Backend call failed");
        session.record_error(phase, message.clone());
        self.store.put(&session).await?;
        Err(OrchestratorError::Llm {
            phase: phase_name,
            message,
        })
    }
}

/// Map a transition rejection into the public error taxonomy.
fn check(session: &Session, action: Action) -> Result<SessionStage, OrchestratorError> {
    can_transition(session, action).map_err(|err| match err {
        TransitionError::InvalidStage { allowed } => OrchestratorError::InvalidStage {
            action: action.as_str(),
            current: session.stage,
            allowed,
        },
        TransitionError::MissingPrompt => OrchestratorError::MissingPrompt {
            operation: action.as_str(),
        },
    })
}
