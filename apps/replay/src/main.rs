use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{
    ClientEvent, Conversation, EventSource, HttpEventSource, MonospaceMeasure, ReplayEventSource,
    TurnChange,
};
use shared::domain::{NavDirection, TurnId};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

mod config;

use config::load_settings;

/// Streams one turn (from a recorded log or a live endpoint) and prints its
/// phases page by page.
#[derive(Parser, Debug)]
struct Args {
    /// Recorded NDJSON or SSE event log.
    #[arg(long, conflicts_with = "server_url")]
    events: Option<PathBuf>,
    /// Streaming endpoint; overrides `server_url` from the config file.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    width: Option<f64>,
    #[arg(long)]
    height: Option<f64>,
    #[arg(long, default_value = "replay.toml")]
    config: PathBuf,
    /// Print committed turns as JSON instead of the page walk.
    #[arg(long)]
    export: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config);
    if let Some(width) = args.width {
        settings.card_width = width;
    }
    if let Some(height) = args.height {
        settings.card_height = height;
    }

    let source: Box<dyn EventSource> = match (&args.events, args.server_url.or(settings.server_url.clone())) {
        (Some(path), _) => {
            let log = fs::read_to_string(path)
                .with_context(|| format!("failed to read event log '{}'", path.display()))?;
            Box::new(ReplayEventSource::new(log))
        }
        (None, Some(server_url)) => {
            let endpoint = Url::parse(&server_url)
                .with_context(|| format!("invalid server url '{server_url}'"))?;
            Box::new(HttpEventSource::new(endpoint))
        }
        (None, None) => bail!("pass --events <file> or --server-url <url>"),
    };

    let conversation = Conversation::new(
        settings.client_settings(),
        Arc::new(MonospaceMeasure::new(settings.char_width, settings.line_height)),
    );
    let logger = spawn_event_logger(&conversation);

    let (turn_id, state) = conversation.run_turn(source.as_ref(), &args.prompt).await?;
    info!(%turn_id, ?state, "turn finished");

    if args.export {
        println!("{}", conversation.export_json().await?);
    } else {
        print_walk(&conversation, turn_id).await?;
    }

    logger.abort();
    Ok(())
}

fn spawn_event_logger(conversation: &Arc<Conversation>) -> tokio::task::JoinHandle<()> {
    let mut events = conversation.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ClientEvent::TurnChanged { turn_id, change }) => match change {
                    TurnChange::PhaseFailed { phase, error } => {
                        warn!(%turn_id, %phase, %error, "phase failed")
                    }
                    TurnChange::SelectionChanged { phase, pinned } => {
                        info!(%turn_id, %phase, pinned, "selection moved")
                    }
                    _ => {}
                },
                Ok(ClientEvent::EventDropped { turn_id, reason }) => {
                    warn!(%turn_id, ?reason, "stream event dropped")
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event logger lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Walks the carousel forward from the first available phase until it
/// wraps or runs out, printing every page once.
async fn print_walk(conversation: &Conversation, turn_id: TurnId) -> Result<()> {
    let snapshot = conversation.snapshot(turn_id).await?;
    println!(
        "turn {} [{:?}] preview: {}",
        snapshot.turn_id,
        snapshot.state,
        snapshot.preview.as_deref().unwrap_or("-")
    );
    if let Some(reason) = &snapshot.failure {
        println!("failure: {reason}");
    }
    let Some(first) = snapshot.available_phases.first().copied() else {
        println!("(no phase has anything to show)");
        return Ok(());
    };

    conversation.select_phase(turn_id, first).await?;
    let mut seen = Vec::new();
    loop {
        let card = conversation.visible_card(turn_id).await?;
        if seen.contains(&(card.phase, card.page)) {
            break;
        }
        seen.push((card.phase, card.page));
        println!(
            "\n== {} ({}/{}) ==\n{}",
            card.phase.display_name(),
            card.page + 1,
            card.page_count,
            card.text
        );
        if conversation
            .advance_page(turn_id, NavDirection::Next)
            .await?
            .is_empty()
        {
            break;
        }
    }

    let stats = conversation.pagination_stats();
    info!(
        hits = stats.hits,
        computations = stats.computations,
        forced_advances = stats.forced_advances,
        "pagination stats"
    );
    Ok(())
}
