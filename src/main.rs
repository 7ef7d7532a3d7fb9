use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use metaprompt::config::Config;

mod cmd;

#[derive(Parser)]
#[command(name = "metaprompt")]
#[command(version, about = "Interactive prompt refinement orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value = "8788")]
        port: u16,

        /// Permissive CORS for a local UI dev server
        #[arg(long)]
        dev: bool,
    },
    /// Refine a request end-to-end and print the final prompt
    Run {
        /// The raw request to turn into a polished prompt
        request: String,

        #[arg(long)]
        task_type: Option<String>,

        /// Backend provider (ollama, qwen, gemini)
        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        model: Option<String>,

        /// Structured template name
        #[arg(long)]
        template: Option<String>,

        /// Template variable as key=value (repeatable)
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,

        /// Refinement depth ceiling
        #[arg(long)]
        max_depth: Option<u32>,

        /// Print the full session as JSON instead of the final prompt
        #[arg(long)]
        json: bool,
    },
    /// Inspect stored sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommands,
    },
    /// Delete sessions idle past the configured TTL
    Sweep,
    /// List structured template names
    Templates,
}

#[derive(Subcommand)]
pub enum SessionsCommands {
    /// List stored sessions, newest first
    List {
        #[arg(long, default_value = "50")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Print one session as JSON
    Show { id: String },
    /// Delete one session
    Delete { id: String },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("Invalid variable '{}' (expected key=value)", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "metaprompt=debug" } else { "metaprompt=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve { host, port, dev } => cmd::cmd_serve(config, host, port, dev).await?,
        Commands::Run {
            request,
            task_type,
            provider,
            model,
            template,
            vars,
            max_depth,
            json,
        } => {
            cmd::cmd_run(
                config, request, task_type, provider, model, template, vars, max_depth, json,
            )
            .await?
        }
        Commands::Sessions { command } => match command {
            SessionsCommands::List { limit, offset } => {
                cmd::cmd_sessions_list(config, limit, offset).await?
            }
            SessionsCommands::Show { id } => cmd::cmd_sessions_show(config, &id).await?,
            SessionsCommands::Delete { id } => cmd::cmd_sessions_delete(config, &id).await?,
        },
        Commands::Sweep => cmd::cmd_sweep(config).await?,
        Commands::Templates => cmd::cmd_templates(),
    }

    Ok(())
}
