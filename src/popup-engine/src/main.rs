//! popup-engine: replays recorded storefront page views through the popup
//! targeting engine and prints every decision as JSON.

mod timeline;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use popup_core::config::AppConfig;
use popup_core::event_bus::{EngineEvent, EngineSink};
use popup_core::feed::{load_campaigns, CampaignApi, CampaignRequest, RawResponse};
use popup_core::types::VisitorContext;
use popup_core::{PopupError, PopupResult};
use popup_decisioning::experiments::{assignment_digest, bucket};
use popup_decisioning::PageRuntime;
use popup_delivery::{JsonFileStore, KeyValueStore, VisitorIdentity};
use serde_json::json;
use tracing::info;

use crate::timeline::{parse_timeline, TimelineStep};

#[derive(Parser, Debug)]
#[command(name = "popup-engine")]
#[command(about = "Storefront popup targeting and trigger evaluation engine")]
#[command(version)]
struct Cli {
    /// Local state file (overrides config)
    #[arg(long, global = true, env = "POPUP_ENGINE__STORAGE__PATH")]
    state: Option<PathBuf>,

    /// Session inactivity timeout in minutes (overrides config)
    #[arg(long, global = true, env = "POPUP_ENGINE__SESSION__TIMEOUT_MINUTES")]
    session_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a page timeline against a campaign feed
    Simulate {
        /// Campaign feed as returned by the campaign API
        #[arg(long)]
        campaigns: PathBuf,

        /// Visitor context for the page view
        #[arg(long)]
        context: PathBuf,

        /// Page events and dismissals, each stamped with `at_ms`
        #[arg(long)]
        timeline: PathBuf,
    },

    /// Compute the experiment variant for a visitor
    Assign {
        /// Experiment id
        #[arg(long)]
        experiment: String,

        /// Visitor id
        #[arg(long)]
        visitor: String,

        /// Comma-separated `variant=weight` pairs, e.g. `A=50,B=50`
        #[arg(long)]
        allocation: String,
    },
}

/// Prints every engine event as one JSON line.
struct StdoutSink;

impl EngineSink for StdoutSink {
    fn emit(&self, event: EngineEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to encode engine event"),
        }
    }
}

/// Serves the campaign feed from a file in place of the campaign API.
struct FileCampaignApi {
    path: PathBuf,
}

impl CampaignApi for FileCampaignApi {
    fn fetch(&self, _request: &CampaignRequest) -> PopupResult<RawResponse> {
        let body = std::fs::read(&self.path)
            .map_err(|e| PopupError::Transport(format!("{}: {e}", self.path.display())))?;
        Ok(RawResponse::ok(body))
    }
}

fn parse_allocation(raw: &str) -> anyhow::Result<BTreeMap<String, u32>> {
    let mut allocation = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, weight)) = pair.split_once('=') else {
            bail!("allocation entry '{pair}' is not of the form variant=weight");
        };
        let weight: u32 = weight
            .trim()
            .parse()
            .with_context(|| format!("invalid weight in '{pair}'"))?;
        allocation.insert(key.trim().to_string(), weight);
    }
    Ok(allocation)
}

async fn simulate(
    config: &AppConfig,
    campaigns: PathBuf,
    context: PathBuf,
    timeline: PathBuf,
) -> anyhow::Result<()> {
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&config.storage.path)?);

    let context_body = tokio::fs::read(&context)
        .await
        .with_context(|| format!("reading {}", context.display()))?;
    let mut context: VisitorContext =
        serde_json::from_slice(&context_body).context("parsing visitor context")?;

    let minutes = i64::try_from(config.session.timeout_minutes)
        .unwrap_or(i64::MAX)
        .min(i64::MAX / 60_000);
    let timeout = Duration::minutes(minutes);
    let identity =
        VisitorIdentity::resume(store.as_ref(), &config.storage.key_prefix, Utc::now(), timeout)?;
    if context.visitor_id.is_empty() {
        context.visitor_id = identity.visitor_id.clone();
    }
    if context.session_id.is_empty() {
        context.session_id = identity.session_id.clone();
    }
    context.is_returning_visitor |= identity.is_returning();

    let timeline_body = tokio::fs::read(&timeline)
        .await
        .with_context(|| format!("reading {}", timeline.display()))?;
    let steps = parse_timeline(&timeline_body).context("parsing timeline")?;

    let request = CampaignRequest {
        page_url: context.page_url.clone(),
        device: context.device,
        country: context.country.clone(),
        visitor_id: context.visitor_id.clone(),
        session_id: context.session_id.clone(),
    };
    let feed = load_campaigns(&FileCampaignApi { path: campaigns }, &request);

    info!(
        visitor_id = %context.visitor_id,
        session_id = %context.session_id,
        campaigns = feed.campaigns.len(),
        steps = steps.len(),
        "replaying page view"
    );

    let mut runtime = PageRuntime::start(feed, context, config, store, Arc::new(StdoutSink));
    for step in &steps {
        match step {
            TimelineStep::Event(event) => {
                if let Some(decision) = runtime.dispatch(event) {
                    println!("{}", serde_json::to_string(&json!({"show": decision}))?);
                }
            }
            TimelineStep::Dismiss { dismiss, .. } => {
                runtime.dismiss(*dismiss);
            }
        }
    }
    runtime.unload();

    println!(
        "{}",
        serde_json::to_string(&json!({
            "final_state": runtime.state(),
            "presented": runtime.presented(),
        }))?
    );
    Ok(())
}

fn assign(experiment: &str, visitor: &str, allocation: &str) -> anyhow::Result<()> {
    let allocation = parse_allocation(allocation)?;
    let variant = bucket(experiment, visitor, &allocation);
    let digest = assignment_digest(experiment, visitor);
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "experiment_id": experiment,
            "visitor_id": visitor,
            "variant": variant,
            "digest": hex::encode(&digest[..8]),
        }))?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON decisions.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "popup_engine=info,popup_decisioning=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(path) = cli.state {
        config.storage.path = path.to_string_lossy().into_owned();
    }
    if let Some(minutes) = cli.session_timeout {
        config.session.timeout_minutes = minutes;
    }

    match cli.command {
        Commands::Simulate {
            campaigns,
            context,
            timeline,
        } => simulate(&config, campaigns, context, timeline).await,
        Commands::Assign {
            experiment,
            visitor,
            allocation,
        } => assign(&experiment, &visitor, &allocation),
    }
}
