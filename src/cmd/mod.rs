//! CLI command implementations. Thin wrappers that wire config, store and
//! orchestrator together and print results; all behavior lives in the lib.

use anyhow::{Context, Result};

use metaprompt::api::{ServerConfig, build_store, start_server};
use metaprompt::config::Config;
use metaprompt::llm::ClientRegistry;
use metaprompt::orchestrator::{CreateSessionRequest, RefinementOrchestrator};
use metaprompt::templates;

fn build_orchestrator(config: Config) -> Result<RefinementOrchestrator> {
    let store = build_store(&config)?;
    Ok(RefinementOrchestrator::new(
        config,
        store,
        ClientRegistry::with_builtin_providers(),
    ))
}

pub async fn cmd_serve(config: Config, host: String, port: u16, dev: bool) -> Result<()> {
    start_server(
        config,
        ServerConfig {
            host,
            port,
            permissive_cors: dev,
        },
    )
    .await
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_run(
    config: Config,
    request: String,
    task_type: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    template: Option<String>,
    vars: Vec<(String, String)>,
    max_depth: Option<u32>,
    json: bool,
) -> Result<()> {
    config.check_configuration()?;
    let orchestrator = build_orchestrator(config)?;

    let template_variables = if vars.is_empty() {
        None
    } else {
        Some(vars.into_iter().collect())
    };
    let session = orchestrator
        .create_session(CreateSessionRequest {
            raw_request: request,
            task_type,
            model_override: model,
            provider_override: provider,
            template_name: template,
            template_variables,
            max_recursion_depth: max_depth,
        })
        .await?;
    eprintln!("Session {} created, refining...", session.id);

    let session = orchestrator.run_to_completion(&session.id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        println!("{}", session.final_prompt);
        eprintln!(
            "({} evaluation(s), {} refinement(s), session {})",
            session.evaluation_reports.len(),
            session.refined_prompts.len(),
            session.id
        );
    }
    Ok(())
}

pub async fn cmd_sessions_list(config: Config, limit: usize, offset: usize) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let summaries = orchestrator.list_sessions(limit, offset).await?;
    if summaries.is_empty() {
        println!("No sessions stored.");
        return Ok(());
    }
    for summary in summaries {
        println!(
            "{}  {:<20}  {}  {}",
            summary.id,
            summary.stage.as_str(),
            summary.updated_at.format("%Y-%m-%d %H:%M:%S"),
            summary.user_request
        );
    }
    Ok(())
}

pub async fn cmd_sessions_show(config: Config, id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let session = orchestrator.get_session(id).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&session).context("Failed to serialize session")?
    );
    Ok(())
}

pub async fn cmd_sessions_delete(config: Config, id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    orchestrator.delete_session(id).await?;
    println!("Deleted {}", id);
    Ok(())
}

pub async fn cmd_sweep(config: Config) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let removed = orchestrator.sweep_expired().await?;
    println!("Removed {} expired session(s)", removed);
    Ok(())
}

pub fn cmd_templates() {
    for name in templates::structured_template_names() {
        println!("{}", name);
    }
}
