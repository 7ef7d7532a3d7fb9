//! Integration tests for metaprompt
//!
//! These tests exercise the refinement loop end-to-end against the file
//! store, plus the CLI surface.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use async_trait::async_trait;
use predicates::prelude::*;
use tempfile::TempDir;

use metaprompt::api::build_store;
use metaprompt::config::Config;
use metaprompt::errors::LlmError;
use metaprompt::llm::{ClientRegistry, TextGenerationClient};
use metaprompt::orchestrator::{CreateSessionRequest, RefineOutcome, RefinementOrchestrator};
use metaprompt::session::{ConversationTurn, EditTarget, SessionStage};

/// Helper to create a metaprompt Command
fn metaprompt_cmd() -> Command {
    cargo_bin_cmd!("metaprompt")
}

/// A client that pops one scripted response per call.
#[derive(Debug)]
struct ScriptedClient {
    responses: Arc<Mutex<VecDeque<Result<String, LlmError>>>>,
}

#[async_trait]
impl TextGenerationClient for ScriptedClient {
    fn provider(&self) -> &str {
        "scripted"
    }
    fn model(&self) -> &str {
        "scripted-1"
    }
    async fn generate(
        &self,
        _prompt: &str,
        _history: &[ConversationTurn],
    ) -> Result<String, LlmError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok("unscripted output".into()))
    }
}

/// Build an orchestrator over a file store in `dir`, backed by scripted
/// responses. Separate calls over the same dir share persisted sessions.
fn file_backed_orchestrator(
    dir: &TempDir,
    responses: Vec<Result<String, LlmError>>,
) -> RefinementOrchestrator {
    let mut config = Config::for_testing(dir.path().to_path_buf());
    config.active_provider = "scripted".into();
    config.session_storage = "file".into();
    let store = build_store(&config).unwrap();
    let shared = Arc::new(Mutex::new(VecDeque::from(responses)));
    let mut registry = ClientRegistry::new();
    registry.register("scripted", move |_, _| {
        Ok(Box::new(ScriptedClient {
            responses: shared.clone(),
        }))
    });
    RefinementOrchestrator::new(config, store, registry)
}

fn ok(text: &str) -> Result<String, LlmError> {
    Ok(text.to_string())
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        metaprompt_cmd().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        metaprompt_cmd().arg("--version").assert().success();
    }

    #[test]
    fn test_templates_lists_builtins() {
        metaprompt_cmd()
            .arg("templates")
            .assert()
            .success()
            .stdout(predicate::str::contains("general"))
            .stdout(predicate::str::contains("code_snippet"));
    }

    #[test]
    fn test_sessions_list_empty_store() {
        let dir = TempDir::new().unwrap();
        metaprompt_cmd()
            .env("METAPROMPT_DATA_DIR", dir.path())
            .env("SESSION_STORAGE_TYPE", "file")
            .args(["sessions", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No sessions stored."));
    }

    #[test]
    fn test_sessions_show_unknown_id_fails() {
        let dir = TempDir::new().unwrap();
        metaprompt_cmd()
            .env("METAPROMPT_DATA_DIR", dir.path())
            .env("SESSION_STORAGE_TYPE", "file")
            .args(["sessions", "show", "sess_missing_0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("sess_missing_0"));
    }

    #[test]
    fn test_sweep_on_empty_store() {
        let dir = TempDir::new().unwrap();
        metaprompt_cmd()
            .env("METAPROMPT_DATA_DIR", dir.path())
            .env("SESSION_STORAGE_TYPE", "file")
            .arg("sweep")
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 0"));
    }
}

// =============================================================================
// Refinement loop over the file store
// =============================================================================

mod refinement_flow {
    use super::*;

    #[tokio::test]
    async fn test_full_loop_persists_every_step() {
        let dir = TempDir::new().unwrap();
        let orchestrator = file_backed_orchestrator(
            &dir,
            vec![
                ok("draft one"),
                ok("{\"score\": 5, \"weaknesses\": [\"too terse\"]}"),
                ok("draft two"),
                ok("{\"score\": 9}"),
                ok("draft two"), // convergence
            ],
        );

        let session = orchestrator
            .create_session(CreateSessionRequest {
                raw_request: "help me ask for a summary".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let session = orchestrator.run_to_completion(&session.id).await.unwrap();

        assert_eq!(session.stage, SessionStage::Completed);
        assert_eq!(session.final_prompt, "draft two");
        assert_eq!(session.evaluation_reports.len(), 2);
        assert_eq!(session.refined_prompts.len(), 2);
        assert_eq!(session.current_recursion_depth, 1);

        // The finished session is on disk under its id
        let path = dir
            .path()
            .join("sessions")
            .join(format!("{}.json", session.id));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_session_resumes_across_processes() {
        let dir = TempDir::new().unwrap();

        // First "process": create and draft
        let orchestrator = file_backed_orchestrator(&dir, vec![ok("the draft")]);
        let session = orchestrator
            .create_session(CreateSessionRequest {
                raw_request: "req".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        orchestrator.generate_first_draft(&session.id).await.unwrap();
        let id = session.id;
        drop(orchestrator);

        // Second "process": pick up where the first left off
        let orchestrator = file_backed_orchestrator(&dir, vec![ok("a critique")]);
        let session = orchestrator.evaluate(&id).await.unwrap();
        assert_eq!(session.stage, SessionStage::EvaluationComplete);
        assert_eq!(session.current_prompt, "the draft");
        assert_eq!(session.evaluation_reports.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_record_survives_restart() {
        let dir = TempDir::new().unwrap();
        let orchestrator = file_backed_orchestrator(
            &dir,
            vec![Err(LlmError::Request {
                provider: "scripted".into(),
                message: "timeout".into(),
            })],
        );
        let session = orchestrator
            .create_session(CreateSessionRequest {
                raw_request: "req".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(orchestrator.generate_first_draft(&session.id).await.is_err());
        let id = session.id;
        drop(orchestrator);

        let orchestrator = file_backed_orchestrator(&dir, vec![ok("recovered")]);
        let session = orchestrator.get_session(&id).await.unwrap();
        assert_eq!(session.stage, SessionStage::Created);
        assert_eq!(session.error_stage.as_deref(), Some("p1_generation"));
        assert_eq!(session.retries.p1_generation, 1);

        // And the retry works in the new process
        let session = orchestrator.generate_first_draft(&id).await.unwrap();
        assert_eq!(session.p1_prompt, "recovered");
        assert!(session.last_error.is_none());
    }

    #[tokio::test]
    async fn test_depth_ceiling_of_zero_completes_immediately() {
        let dir = TempDir::new().unwrap();
        let orchestrator = file_backed_orchestrator(
            &dir,
            vec![ok("only draft"), ok("a critique")],
        );
        let session = orchestrator
            .create_session(CreateSessionRequest {
                raw_request: "req".into(),
                max_recursion_depth: Some(0),
                ..Default::default()
            })
            .await
            .unwrap();
        orchestrator.generate_first_draft(&session.id).await.unwrap();
        orchestrator.evaluate(&session.id).await.unwrap();

        let outcome = orchestrator.refine(&session.id).await.unwrap();
        assert!(matches!(outcome, RefineOutcome::MaxDepthReached(_)));
        let session = outcome.into_session();
        assert_eq!(session.stage, SessionStage::Completed);
        assert_eq!(session.final_prompt, "only draft");
        assert!(session.refined_prompts.is_empty());
    }
}

// =============================================================================
// Manual control and housekeeping
// =============================================================================

mod manual_control {
    use super::*;

    #[tokio::test]
    async fn test_edit_then_reevaluate_edited_draft() {
        let dir = TempDir::new().unwrap();
        let orchestrator = file_backed_orchestrator(
            &dir,
            vec![ok("machine draft"), ok("a critique of my wording")],
        );
        let session = orchestrator
            .create_session(CreateSessionRequest {
                raw_request: "req".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        orchestrator.generate_first_draft(&session.id).await.unwrap();

        let session = orchestrator
            .apply_user_edit(&session.id, EditTarget::P1, "my wording", None)
            .await
            .unwrap();
        assert_eq!(session.stage, SessionStage::P1Generated);

        // The next evaluation critiques the edited text
        let session = orchestrator.evaluate(&session.id).await.unwrap();
        assert_eq!(session.current_prompt, "my wording");
        assert_eq!(session.evaluation_reports.len(), 1);
        assert_eq!(session.user_modifications.len(), 1);
    }

    #[tokio::test]
    async fn test_early_completion_from_first_draft() {
        let dir = TempDir::new().unwrap();
        let orchestrator = file_backed_orchestrator(&dir, vec![ok("good enough")]);
        let session = orchestrator
            .create_session(CreateSessionRequest {
                raw_request: "req".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        orchestrator.generate_first_draft(&session.id).await.unwrap();

        let session = orchestrator.complete(&session.id).await.unwrap();
        assert_eq!(session.stage, SessionStage::Completed);
        assert_eq!(session.final_prompt, "good enough");
        assert!(session.evaluation_reports.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_sessions() {
        let dir = TempDir::new().unwrap();
        let orchestrator = file_backed_orchestrator(&dir, vec![]);
        let fresh = orchestrator
            .create_session(CreateSessionRequest {
                raw_request: "fresh".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let stale = orchestrator
            .create_session(CreateSessionRequest {
                raw_request: "stale".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        // Age the second session past the TTL by rewriting its file
        let path = dir
            .path()
            .join("sessions")
            .join(format!("{}.json", stale.id));
        let raw = std::fs::read_to_string(&path).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["updated_at"] = serde_json::json!("2020-01-01T00:00:00Z");
        std::fs::write(&path, value.to_string()).unwrap();

        let removed = orchestrator.sweep_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(orchestrator.get_session(&fresh.id).await.is_ok());
        assert!(orchestrator.get_session(&stale.id).await.is_err());
    }
}
