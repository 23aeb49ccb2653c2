use std::path::{Path, PathBuf};

use agent_builder_client::{ClientConfig, ExecutionBackend, ExecutionClient};
use agent_builder_core::compile::{AliasResolution, CompileOptions, compile_workflow};
use agent_builder_core::timeline::{self, TimelineItem, TimelineOptions, TimelineStatus};
use agent_builder_core::{Workflow, validate_for_preview, validate_workflow};
use agent_builder_preview::{PreviewError, PreviewSession};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ── CLI ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "agent-builder",
    about = "Validate, compile and run canvas workflows"
)]
struct Cli {
    /// Base URL of the workflow execution API
    #[arg(
        long,
        global = true,
        env = "AGENT_BUILDER_API_URL",
        default_value = "http://localhost:8000/api/v1/workflows"
    )]
    api_url: String,

    /// Bearer token sent with every API request
    #[arg(long, global = true, env = "AGENT_BUILDER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = 120)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a canvas document for structural problems
    Validate {
        canvas: PathBuf,
        /// Also require the start, agent and end nodes the chat preview needs
        #[arg(long)]
        preview: bool,
    },
    /// Print the execution request a canvas compiles to
    Compile {
        canvas: PathBuf,
        /// User request to embed in the input data
        #[arg(long, default_value = "")]
        input: String,
        /// Override the workflow definition id
        #[arg(long)]
        workflow_id: Option<String>,
        /// Rewrite `${workflow.<alias>...}` references to node ids
        #[arg(long)]
        resolve_aliases: bool,
    },
    /// Execute a canvas once and print the reply and activity timeline
    Run {
        canvas: PathBuf,
        input: String,
        /// Maximum number of timeline entries to print
        #[arg(long, default_value_t = timeline::DEFAULT_MAX_ITEMS)]
        max_items: usize,
        /// Print the raw execution response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Chat with a canvas workflow, one run per line read from stdin
    Chat { canvas: PathBuf },
    /// Check that the execution API is reachable
    Health,
    /// List past executions, or show one in detail
    Executions { run_id: Option<String> },
}

// ── Canvas loading ──────────────────────────────────────────────

fn load_canvas(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read canvas: {}", path.display()))?;
    let mut workflow: Workflow = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse canvas: {}", path.display()))?;
    workflow.ensure_all_data();
    debug!(
        nodes = workflow.nodes().len(),
        connections = workflow.connections().len(),
        "loaded canvas {}",
        path.display()
    );
    Ok(workflow)
}

// ── Output ──────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{text}");
    Ok(())
}

fn status_marker(status: TimelineStatus) -> &'static str {
    match status {
        TimelineStatus::Complete => "ok",
        TimelineStatus::Progress => "..",
        TimelineStatus::Error => "!!",
    }
}

fn render_timeline(items: &[TimelineItem]) -> String {
    items
        .iter()
        .map(|item| {
            let mut line = format!(
                "[{}] {}: {}",
                status_marker(item.status),
                item.title,
                item.description
            );
            if let Some(error) = &item.error {
                line.push_str(&format!("\n     error: {error}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Cli {
    fn client(&self) -> Result<ExecutionClient> {
        ExecutionClient::new(ClientConfig {
            base_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            timeout_secs: self.timeout,
        })
    }
}

// ── Commands ────────────────────────────────────────────────────

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Validate { canvas, preview } => {
            let workflow = load_canvas(canvas)?;
            validate_workflow(&workflow)?;
            if *preview {
                validate_for_preview(&workflow)?;
            }
            println!(
                "{}: {} nodes, {} connections, valid",
                canvas.display(),
                workflow.nodes().len(),
                workflow.connections().len()
            );
        }
        Command::Compile {
            canvas,
            input,
            workflow_id,
            resolve_aliases,
        } => {
            let workflow = load_canvas(canvas)?;
            let mut options = CompileOptions::default();
            if let Some(id) = workflow_id {
                options.workflow_id = id.clone();
            }
            if *resolve_aliases {
                options.alias_resolution = AliasResolution::NodeIds;
            }
            print_json(&compile_workflow(&workflow, input, &options))?;
        }
        Command::Run {
            canvas,
            input,
            max_items,
            json,
        } => {
            let workflow = load_canvas(canvas)?;
            validate_workflow(&workflow)?;
            let request = compile_workflow(&workflow, input, &CompileOptions::default());
            let response = cli.client()?.execute(&request).await?;

            if *json {
                return print_json(&response);
            }
            println!("{}", timeline::extract_ai_response(&response));
            println!();
            let items = timeline::project(
                &response,
                &TimelineOptions {
                    max_items: *max_items,
                },
            );
            println!("{}", render_timeline(&items));
            if let Some(secs) = response.duration_seconds {
                println!(
                    "\n{} in {}",
                    response.status,
                    timeline::format_duration(secs * 1000.0)
                );
            }
        }
        Command::Chat { canvas } => {
            let workflow = load_canvas(canvas)?;
            chat(PreviewSession::new(cli.client()?), &workflow).await?;
        }
        Command::Health => {
            let health = cli.client()?.health().await?;
            info!(status = %health.status, "API health");
            print_json(&health)?;
        }
        Command::Executions { run_id: Some(run_id) } => {
            print_json(&cli.client()?.execution(run_id).await?)?;
        }
        Command::Executions { run_id: None } => {
            print_json(&cli.client()?.list_executions().await?)?;
        }
    }
    Ok(())
}

async fn chat<B: ExecutionBackend>(session: PreviewSession<B>, workflow: &Workflow) -> Result<()> {
    session.open(workflow)?;
    for message in session.messages() {
        println!("assistant> {}", message.content);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }
        match session.send(workflow, &line).await {
            Ok(reply) => println!("assistant> {}", reply.content),
            Err(PreviewError::EmptyInput) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    run(Cli::parse()).await
}
