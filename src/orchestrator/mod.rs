//! Orchestration of the refinement loop.
//!
//! [`RefinementOrchestrator`] is the only component that mutates sessions:
//! every operation loads from the store, validates the transition, calls the
//! backend if needed, applies the mutation and persists before returning.

mod engine;

pub use engine::{CreateSessionRequest, RefineOutcome, RefinementOrchestrator};
