//! Pure transition logic for the session state machine.
//!
//! `can_transition` answers "is this action legal right now, and where does
//! it lead" from session fields alone. It never touches the store or the
//! backend; the orchestrator owns the side effects.

use super::model::{EditTarget, Session, SessionStage};

/// A requested operation on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    GenerateFirstDraft,
    Evaluate,
    Refine,
    Complete,
    ApplyUserEdit(EditTarget),
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateFirstDraft => "generate_first_draft",
            Self::Evaluate => "evaluate",
            Self::Refine => "refine",
            Self::Complete => "complete",
            Self::ApplyUserEdit(_) => "apply_user_edit",
        }
    }

    /// Stages from which this action is legal. User edits and completion are
    /// legal from any stage.
    pub fn allowed_stages(&self) -> Vec<SessionStage> {
        match self {
            Self::GenerateFirstDraft => vec![SessionStage::Created],
            Self::Evaluate => vec![
                SessionStage::P1Generated,
                SessionStage::RefinementComplete,
            ],
            Self::Refine => vec![SessionStage::EvaluationComplete],
            Self::Complete | Self::ApplyUserEdit(_) => vec![
                SessionStage::Created,
                SessionStage::P1Generated,
                SessionStage::EvaluationComplete,
                SessionStage::RefinementComplete,
                SessionStage::Completed,
            ],
        }
    }
}

/// Why a transition was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The action does not match the current stage. Carries the allowed set
    /// for diagnostics.
    InvalidStage { allowed: Vec<SessionStage> },
    /// The action needs a non-empty working prompt.
    MissingPrompt,
}

/// Compute the stage a legal action leads to, or reject it.
///
/// For `Refine` this returns the normal next stage (`RefinementComplete`);
/// the depth-ceiling and convergence completions are overrides the
/// orchestrator applies via [`refine_disposition`] because they depend on
/// the backend response.
pub fn can_transition(session: &Session, action: Action) -> Result<SessionStage, TransitionError> {
    let stage = session.stage;
    match action {
        Action::GenerateFirstDraft => {
            if stage == SessionStage::Created {
                Ok(SessionStage::P1Generated)
            } else {
                Err(invalid(action))
            }
        }
        Action::Evaluate => {
            if stage != SessionStage::P1Generated && stage != SessionStage::RefinementComplete {
                return Err(invalid(action));
            }
            require_prompt(session)?;
            Ok(SessionStage::EvaluationComplete)
        }
        Action::Refine => {
            if stage != SessionStage::EvaluationComplete {
                return Err(invalid(action));
            }
            Ok(SessionStage::RefinementComplete)
        }
        Action::Complete => {
            require_prompt(session)?;
            Ok(SessionStage::Completed)
        }
        Action::ApplyUserEdit(target) => Ok(match target {
            // Editing the draft rewinds the loop; the caller must
            // re-evaluate the edited text.
            EditTarget::P1 => SessionStage::P1Generated,
            EditTarget::Current => stage,
            EditTarget::Final => SessionStage::Completed,
        }),
    }
}

fn invalid(action: Action) -> TransitionError {
    TransitionError::InvalidStage {
        allowed: action.allowed_stages(),
    }
}

fn require_prompt(session: &Session) -> Result<(), TransitionError> {
    if session.current_prompt.trim().is_empty() {
        Err(TransitionError::MissingPrompt)
    } else {
        Ok(())
    }
}

/// Outcome classification of a refine attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineDisposition {
    /// New text accepted; depth increments, stage becomes `RefinementComplete`.
    Refined,
    /// Backend returned the input unchanged; session completes, depth untouched.
    Converged,
    /// Depth ceiling hit before the call; session completes, no backend call.
    MaxDepthReached,
}

/// Classify a refinement before/after the backend call.
///
/// `refined_text` is `None` when deciding whether to call the backend at all
/// (depth check), and `Some` once a response is in hand (convergence check).
pub fn refine_disposition(session: &Session, refined_text: Option<&str>) -> RefineDisposition {
    if refined_text.is_none() && session.current_recursion_depth >= session.max_recursion_depth {
        return RefineDisposition::MaxDepthReached;
    }
    match refined_text {
        Some(text) if text.trim() == session.current_prompt.trim() => {
            RefineDisposition::Converged
        }
        _ => RefineDisposition::Refined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::Session;

    fn session_at(stage: SessionStage) -> Session {
        let mut session = Session::new("req".into(), "qa".into(), None, None, None, None, 3);
        session.stage = stage;
        session.current_prompt = "working prompt".into();
        session
    }

    #[test]
    fn test_generate_first_draft_only_from_created() {
        let session = session_at(SessionStage::Created);
        assert_eq!(
            can_transition(&session, Action::GenerateFirstDraft),
            Ok(SessionStage::P1Generated)
        );

        for stage in [
            SessionStage::P1Generated,
            SessionStage::EvaluationComplete,
            SessionStage::RefinementComplete,
            SessionStage::Completed,
        ] {
            let session = session_at(stage);
            let err = can_transition(&session, Action::GenerateFirstDraft).unwrap_err();
            assert_eq!(
                err,
                TransitionError::InvalidStage {
                    allowed: vec![SessionStage::Created]
                }
            );
        }
    }

    #[test]
    fn test_evaluate_from_p1_and_refinement_complete() {
        for stage in [SessionStage::P1Generated, SessionStage::RefinementComplete] {
            let session = session_at(stage);
            assert_eq!(
                can_transition(&session, Action::Evaluate),
                Ok(SessionStage::EvaluationComplete)
            );
        }
    }

    #[test]
    fn test_evaluate_rejected_from_created_with_allowed_set() {
        let session = session_at(SessionStage::Created);
        match can_transition(&session, Action::Evaluate).unwrap_err() {
            TransitionError::InvalidStage { allowed } => {
                assert_eq!(
                    allowed,
                    vec![SessionStage::P1Generated, SessionStage::RefinementComplete]
                );
            }
            other => panic!("Expected InvalidStage, got {:?}", other),
        }
    }

    #[test]
    fn test_evaluate_requires_prompt() {
        let mut session = session_at(SessionStage::P1Generated);
        session.current_prompt = "   ".into();
        assert_eq!(
            can_transition(&session, Action::Evaluate),
            Err(TransitionError::MissingPrompt)
        );
    }

    #[test]
    fn test_refine_only_from_evaluation_complete() {
        let session = session_at(SessionStage::EvaluationComplete);
        assert_eq!(
            can_transition(&session, Action::Refine),
            Ok(SessionStage::RefinementComplete)
        );

        let session = session_at(SessionStage::P1Generated);
        assert!(matches!(
            can_transition(&session, Action::Refine),
            Err(TransitionError::InvalidStage { .. })
        ));
    }

    #[test]
    fn test_complete_from_any_stage_with_prompt() {
        for stage in [
            SessionStage::Created,
            SessionStage::P1Generated,
            SessionStage::EvaluationComplete,
            SessionStage::RefinementComplete,
            SessionStage::Completed,
        ] {
            let session = session_at(stage);
            assert_eq!(
                can_transition(&session, Action::Complete),
                Ok(SessionStage::Completed)
            );
        }
    }

    #[test]
    fn test_complete_requires_prompt() {
        let mut session = session_at(SessionStage::P1Generated);
        session.current_prompt.clear();
        assert_eq!(
            can_transition(&session, Action::Complete),
            Err(TransitionError::MissingPrompt)
        );
    }

    #[test]
    fn test_user_edit_transitions() {
        let session = session_at(SessionStage::Completed);
        assert_eq!(
            can_transition(&session, Action::ApplyUserEdit(EditTarget::P1)),
            Ok(SessionStage::P1Generated)
        );

        let session = session_at(SessionStage::EvaluationComplete);
        assert_eq!(
            can_transition(&session, Action::ApplyUserEdit(EditTarget::Current)),
            Ok(SessionStage::EvaluationComplete)
        );
        assert_eq!(
            can_transition(&session, Action::ApplyUserEdit(EditTarget::Final)),
            Ok(SessionStage::Completed)
        );
    }

    #[test]
    fn test_refine_disposition_max_depth() {
        let mut session = session_at(SessionStage::EvaluationComplete);
        session.current_recursion_depth = 3;
        assert_eq!(
            refine_disposition(&session, None),
            RefineDisposition::MaxDepthReached
        );
    }

    #[test]
    fn test_refine_disposition_convergence_ignores_whitespace() {
        let session = session_at(SessionStage::EvaluationComplete);
        assert_eq!(
            refine_disposition(&session, Some("  working prompt \n")),
            RefineDisposition::Converged
        );
    }

    #[test]
    fn test_refine_disposition_new_text_is_refined() {
        let mut session = session_at(SessionStage::EvaluationComplete);
        session.current_recursion_depth = 1;
        assert_eq!(
            refine_disposition(&session, Some("a better prompt")),
            RefineDisposition::Refined
        );
        // Depth below ceiling, no text yet: proceed with the call
        assert_eq!(refine_disposition(&session, None), RefineDisposition::Refined);
    }
}
