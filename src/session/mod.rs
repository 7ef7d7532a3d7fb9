//! Session domain model and pure transition logic.

pub mod model;
pub mod state;

pub use model::{
    ConversationTurn, EditTarget, EvaluationReport, Phase, RetryCounters, Role, Session,
    SessionStage, SessionSummary, MAX_HISTORY_LENGTH,
};
pub use state::{Action, RefineDisposition, TransitionError, can_transition, refine_disposition};
