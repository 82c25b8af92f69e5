//! Stepwise operator CLI.
//!
//! A thin driver around `stepwise-core`: loads a task knowledge base,
//! wires up the tracker and query orchestrator, and reads a line-oriented
//! REPL from stdin — `obs: <text>` feeds the subconscious loop, anything
//! else is treated as a user query for the instant-response loop. This is
//! an operator tool for local testing, not a production transport surface
//! (no HTTP/gRPC server here).

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use stepwise_core::prelude::*;

/// Stepwise command line arguments.
#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(about = "Dual-loop state-tracking engine for a real-time manual assistant")]
struct Args {
    /// Directory of YAML task definitions to load at startup.
    #[arg(short, long, value_name = "DIR")]
    knowledge_dir: PathBuf,

    /// VLM HTTP endpoint (OpenAI-compatible chat completions). If unset,
    /// a mock client answers every escalation with a canned response.
    #[arg(long, value_name = "URL")]
    vlm_endpoint: Option<String>,

    /// Bearer token for the VLM endpoint.
    #[arg(long, value_name = "TOKEN")]
    vlm_api_key: Option<String>,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if args.verbose { "debug" } else { "info" })
            }),
        )
        .init();

    info!(version = stepwise_core::VERSION, "starting stepwise");

    let config = Config::from_env();
    let knowledge = KnowledgeStore::load(&args.knowledge_dir)?;
    info!(
        task_count = knowledge.task_count(),
        rejected = knowledge.rejected_files().len(),
        "loaded task knowledge base"
    );
    for rejected in knowledge.rejected_files() {
        warn!(path = %rejected.path, reason = %rejected.reason, "rejected task file");
    }

    let tracker = StateTracker::new(config);

    match args.vlm_endpoint {
        Some(endpoint) => {
            let client = stepwise_core::vlm::HttpVlmClient::new(
                endpoint,
                args.vlm_api_key,
                config.vlm_timeout,
            );
            run_repl(knowledge, tracker, client, config).await
        }
        None => {
            warn!("no --vlm-endpoint given; VLM escalations will return a canned response");
            let client = MockVlmClient::responding(
                "I don't have a live model connected, but based on what I can see I'd check the \
                 current step's description for guidance.",
            );
            run_repl(knowledge, tracker, client, config).await
        }
    }
}

async fn run_repl<C: VlmClient + 'static>(
    knowledge: KnowledgeStore,
    tracker: StateTracker,
    vlm_client: C,
    config: Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let vlm = VlmFallbackClient::new(
        vlm_client,
        config.vlm_max_retries,
        config.circuit_failure_threshold,
        config.circuit_window,
        config.circuit_cooldown,
        "You are a concise assistant helping with a real-world manual task.",
    );
    let orchestrator = Arc::new(QueryOrchestrator::new(knowledge, tracker, vlm));
    let encoder = Arc::new(StubEmbedder::new());

    // Build the embedding index for every loaded task's steps up front.
    let mut index = EmbeddingIndex::new(encoder.dimensions());
    for task in orchestrator.knowledge().all_tasks() {
        for step in &task.steps {
            let vector = encoder.encode(&step.composed_text())?;
            index.upsert(step_key(&task.task_name, step.step_id), vector)?;
        }
    }
    let index = Arc::new(index);

    // The subconscious loop runs as its own task, ticking on a fixed
    // interval and draining whatever observations have queued up since the
    // last tick rather than reacting to each one inline.
    let (obs_tx, mut obs_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let subconscious = {
        let orchestrator = orchestrator.clone();
        let encoder = encoder.clone();
        let index = index.clone();
        let mut ticker = tokio::time::interval(config.subconscious_tick_interval);
        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                let mut pending = Vec::new();
                while let Ok(observation) = obs_rx.try_recv() {
                    pending.push(observation);
                }
                for observation in pending {
                    handle_observation(&orchestrator, encoder.as_ref(), index.as_ref(), &observation)
                        .await;
                }
                if obs_rx.is_closed() && obs_rx.try_recv().is_err() {
                    break;
                }
            }
        })
    };

    println!("stepwise ready. Lines starting with 'obs:' feed an observation; anything else is a query. Ctrl-D to exit.");
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(observation) = line.strip_prefix("obs:") {
            let _ = obs_tx.send(observation.trim().to_string());
        } else {
            let response = orchestrator.answer(line).await;
            let payload = serde_json::to_string(&response).unwrap_or_default();
            writeln!(stdout, "{payload}")?;
        }
    }

    drop(obs_tx);
    let _ = subconscious.await;

    Ok(())
}

async fn handle_observation<C: VlmClient>(
    orchestrator: &QueryOrchestrator<C>,
    encoder: &StubEmbedder,
    index: &EmbeddingIndex,
    observation: &str,
) {
    let outcome = orchestrator
        .tracker()
        .process_observation_text(orchestrator.knowledge(), encoder, index, observation)
        .await;
    info!(?outcome, "processed observation");
}
