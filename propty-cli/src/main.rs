//! PropTy Command Line Interface
//!
//! Usage:
//!   propty exec '<request json>'   - Execute one request or an array of requests
//!   propty exec --file <FILE>      - Same, reading the JSON from a file
//!   propty stats                   - Show platform statistics
//!   propty events --since <N>      - Show ledger events after sequence N
//!   propty demo                    - Run the end-to-end scenario in memory
//!
//! With `--state FILE` the ledger is restored from and saved to a JSON
//! snapshot, so consecutive invocations share state.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use propty_ledger::{
    models::{AccountId, BadgeType, DisputeType, PropertyType, Resolution, ReviewType, Role},
    ApiResult, JsonFileStore, MemoryStore, NewDispute, NewProperty, NewReview, Platform,
    PlatformConfig, Request,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "propty")]
#[command(about = "PropTy property registry and escrow ledger CLI")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ledger snapshot file
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute requests against the ledger
    Exec {
        /// Request JSON: one object or an array of objects
        json: Option<String>,
        /// Read the request JSON from a file
        #[arg(short, long, conflicts_with = "json")]
        file: Option<PathBuf>,
    },

    /// Show platform statistics
    Stats,

    /// Show ledger events
    Events {
        /// Only events with a greater sequence number
        #[arg(long, default_value_t = 0)]
        since: u64,
    },

    /// Run register, list, escrow and dispute on a fresh in-memory ledger
    Demo,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config =
        PlatformConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Exec { json, file } => {
            let input = match (json, file) {
                (Some(json), _) => json,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, None) => bail!("exec needs request JSON as an argument or --file"),
            };
            let requests = parse_requests(&input)?;

            let (platform, store) = open_platform(config, cli.state.as_deref()).await?;
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(render(platform.execute(request).await));
            }
            print_json(&Value::Array(results))?;

            if let Some(store) = store {
                platform.persist(&store).await?;
            }
        }

        Commands::Stats => {
            let (platform, _) = open_platform(config, cli.state.as_deref()).await?;
            print_json(&serde_json::to_value(platform.admin().get_platform_stats().await)?)?;
        }

        Commands::Events { since } => {
            let (platform, _) = open_platform(config, cli.state.as_deref()).await?;
            print_json(&serde_json::to_value(platform.events_since(since).await)?)?;
        }

        Commands::Demo => run_demo(config).await?,
    }

    Ok(())
}

/// Parse one request object or an array of them
fn parse_requests(input: &str) -> Result<Vec<Request>> {
    let value: Value = serde_json::from_str(input).context("request is not valid JSON")?;

    let requests = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Request>, _>>(),
        single => serde_json::from_value(single).map(|request| vec![request]),
    };

    requests.context("request does not match any operation")
}

async fn open_platform(
    config: PlatformConfig,
    state: Option<&Path>,
) -> Result<(Platform, Option<JsonFileStore>)> {
    match state {
        Some(path) => {
            let store = JsonFileStore::new(path);
            let platform = Platform::open(config, &store)
                .await
                .with_context(|| format!("failed to open ledger at {}", path.display()))?;
            Ok((platform, Some(store)))
        }
        None => Ok((Platform::new(config)?, None)),
    }
}

fn render(result: ApiResult) -> Value {
    match result {
        Ok(response) => json!({ "ok": response }),
        Err(error) => json!({ "error": error }),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_demo(config: PlatformConfig) -> Result<()> {
    let admin = AccountId::from("0xadmin");
    let owner = AccountId::from("0xowner");
    let buyer = AccountId::from("0xbuyer");
    let neighbour = AccountId::from("0xneighbour");

    let platform = Platform::new(config.with_genesis_admin(admin.clone()))?;
    info!("Running demo scenario");

    let price = 250_000;
    let steps = vec![
        Request::RegisterUser {
            caller: owner.clone(),
            full_name: "Olu Owner".to_string(),
            decentralized_id: "did:propty:owner".to_string(),
            role: Role::Owner,
        },
        Request::RegisterUser {
            caller: buyer.clone(),
            full_name: "Bisi Buyer".to_string(),
            decentralized_id: "did:propty:buyer".to_string(),
            role: Role::Seeker,
        },
        Request::RegisterUser {
            caller: neighbour.clone(),
            full_name: "Nneka Neighbour".to_string(),
            decentralized_id: "did:propty:neighbour".to_string(),
            role: Role::Seeker,
        },
        Request::CreateProperty {
            caller: owner.clone(),
            listing: NewProperty {
                property_type: PropertyType::Residential,
                location: "Lekki Phase 1, Lagos".to_string(),
                price,
                terms: "Outright purchase".to_string(),
                content_hash: "QmDemoListing".to_string(),
                metadata_uri: "ipfs://QmDemoListing/metadata.json".to_string(),
            },
        },
        Request::SubmitReview {
            caller: neighbour.clone(),
            review: NewReview {
                property_id: 1,
                review_type: ReviewType::Community,
                content_hash: "QmDemoReview".to_string(),
                rating: 4,
                comment: "Quiet street, good drainage".to_string(),
            },
        },
        Request::AwardBadge {
            caller: admin.clone(),
            recipient: owner.clone(),
            badge_type: BadgeType::TrustedOwner,
            content_hash: "QmDemoBadge".to_string(),
            level: 1,
        },
        Request::OpenDeal {
            caller: buyer.clone(),
            property_id: 1,
            buyer: buyer.clone(),
            seller: owner.clone(),
            amount: price,
        },
        Request::FundDeal {
            caller: buyer.clone(),
            deal_id: 1,
            amount: price,
        },
        // Rejected: the deal already holds its funds
        Request::FundDeal {
            caller: buyer.clone(),
            deal_id: 1,
            amount: price,
        },
        Request::StartInspection {
            caller: buyer.clone(),
            deal_id: 1,
        },
        Request::CreateDispute {
            caller: buyer.clone(),
            dispute: NewDispute {
                dispute_type: DisputeType::TransactionDispute,
                respondent: owner.clone(),
                related_entity_id: 1,
                evidence_hash: "QmDemoInspectionReport".to_string(),
            },
        },
        Request::ResolveDispute {
            caller: admin.clone(),
            dispute_id: 1,
            resolution: Resolution::FavorComplainant,
        },
        Request::GetDeal { deal_id: 1 },
        Request::BalanceOf {
            account: buyer.clone(),
        },
        Request::GetPlatformStats,
    ];

    let mut transcript = Vec::with_capacity(steps.len());
    for (index, request) in steps.into_iter().enumerate() {
        let request_json = serde_json::to_value(&request)?;
        let result = render(platform.execute(request).await);
        transcript.push(json!({
            "step": index + 1,
            "request": request_json,
            "result": result,
        }));
    }
    print_json(&Value::Array(transcript))?;

    let health = platform.health_check().await;
    print_json(&serde_json::to_value(&health)?)?;
    if !health.healthy {
        bail!("demo ledger failed its health check: {:?}", health.issues);
    }

    // Save, reopen from the store, and check nothing was lost
    let store = MemoryStore::new();
    platform.persist(&store).await?;
    let reopened = Platform::open(platform.config().clone(), &store).await?;
    let (before, after) = (
        platform.admin().get_platform_stats().await,
        reopened.admin().get_platform_stats().await,
    );
    if before != after {
        bail!("demo snapshot did not round-trip: {:?} != {:?}", before, after);
    }
    info!(events = reopened.events_since(0).await.len(), "Snapshot reopened");

    info!(
        events = platform.events_since(0).await.len(),
        "Demo scenario finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_batch_requests() {
        let single = parse_requests(r#"{"op": "get_platform_stats"}"#).unwrap();
        assert_eq!(single, vec![Request::GetPlatformStats]);

        let batch = parse_requests(
            r#"[{"op": "list_users"}, {"op": "get_deal", "deal_id": 3}]"#,
        )
        .unwrap();
        assert_eq!(batch, vec![Request::ListUsers, Request::GetDeal { deal_id: 3 }]);

        assert!(parse_requests(r#"{"op": "launch_rocket"}"#).is_err());
    }

    #[tokio::test]
    async fn test_demo_is_healthy_and_reopens_from_store() {
        run_demo(PlatformConfig::default()).await.unwrap();
    }
}
