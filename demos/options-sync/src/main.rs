//! zukit-sync - read and write plugin options from the command line
//!
//! Drives an options store against a live site:
//!
//! ```sh
//! # Read two options, waiting until both arrived
//! zukit-sync --base-url https://example.com/wp-json --router zuplus get color layout
//!
//! # Write a batch (values are JSON, bare words are strings)
//! zukit-sync --base-url https://example.com/wp-json --nonce abc set color=blue layout.columns=3
//!
//! # Same, through the debounced queue
//! zukit-sync --base-url https://example.com/wp-json queue color=blue --debounce-ms 200
//! ```
//!
//! Logging follows `RUST_LOG`, e.g. `RUST_LOG=zukit_store_core=debug`.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;
use zukit_store::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "zukit-sync")]
#[command(about = "Read and write plugin options through the zukit REST API")]
struct Args {
    /// Site REST endpoint, e.g. https://example.com/wp-json
    #[arg(long, env = "ZUKIT_BASE_URL")]
    base_url: String,

    /// Plugin instance answering requests
    #[arg(long, short)]
    router: Option<String>,

    /// REST nonce sent as X-WP-Nonce
    #[arg(long, env = "ZUKIT_NONCE")]
    nonce: Option<String>,

    /// API namespace root
    #[arg(long, default_value = "zukit")]
    root: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the values of some options
    Get {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Write options in one request
    Set {
        /// key=value pairs
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Write options through the debounced queue
    Queue {
        #[arg(required = true)]
        pairs: Vec<String>,

        #[arg(long, default_value = "500")]
        debounce_ms: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut rest = RestConfig {
        root: args.root,
        ..RestConfig::default()
    }
    .with_base_url(args.base_url)
    .with_timeout(Duration::from_secs(args.timeout));
    if let Some(router) = args.router {
        rest = rest.with_router(router);
    }
    if let Some(nonce) = args.nonce {
        rest = rest.with_nonce(nonce);
    }

    let transport = HttpTransport::new(&rest)?;
    let context = StoreContext::new(rest);
    let name = format!("{}/options", context.rest().router.as_deref().unwrap_or("zukit"));

    match args.command {
        Command::Get { keys } => {
            let store = context.register(StoreConfig::options(name), transport)?;
            let mut subscription = store.subscribe(keys, true);
            let options = subscription.ready().await;
            print_json(&Value::Object(options))
        }
        Command::Set { pairs } => {
            let store = context.register(StoreConfig::options(name), transport)?;
            let confirmed = store.update_values(parse_pairs(&pairs)?).await?;
            print_confirmed(&confirmed)
        }
        Command::Queue { pairs, debounce_ms } => {
            let config = StoreConfig::options(name).with_debounce(Duration::from_millis(debounce_ms));
            let store = context.register(config, transport)?;
            let values = parse_pairs(&pairs)?;
            let keys: Vec<String> = values.keys().cloned().collect();

            let mut applied = store.watch();
            for (key, value) in values {
                let mut single = Map::new();
                single.insert(key, value);
                store.queue_update(single)?;
            }
            tracing::info!(pending = store.pending_len(), "Queued writes");

            // the flush either lands in the cache or is dropped
            tracing::debug!(store = %store.name(), "Waiting for flush");
            let wait = Duration::from_millis(debounce_ms) + context.rest().timeout();
            let partition = store.partition().to_string();
            let landed = applied.wait_for(|cache| {
                keys.iter().all(|k| cache.get(&partition, k).is_some())
            });
            if tokio::time::timeout(wait, landed).await.is_err() {
                tracing::warn!("Timed out waiting for the queued writes");
            }

            let confirmed: Vec<Confirmed> = keys
                .iter()
                .filter_map(|key| {
                    let value = store.peek(&ValueRequest::new(key.as_str()));
                    value.is_resolved().then(|| Confirmed {
                        key: key.clone(),
                        value: value.to_json(),
                    })
                })
                .collect();
            print_confirmed(&confirmed)
        }
    }
}

/// Parse `key=value` pairs. Values are JSON when they parse as JSON and
/// strings otherwise.
fn parse_pairs(pairs: &[String]) -> Result<Map<String, Value>> {
    pairs
        .iter()
        .map(|pair| -> Result<(String, Value)> {
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("expected key=value, got {pair:?}")))?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

fn print_confirmed(confirmed: &[Confirmed]) -> Result<()> {
    if confirmed.is_empty() {
        eprintln!("Server did not confirm any value");
    }
    let values: Map<String, Value> = confirmed
        .iter()
        .map(|c| (c.key.clone(), c.value.clone()))
        .collect();
    print_json(&Value::Object(values))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_pairs() {
        let pairs = vec![
            "color=blue".to_string(),
            "layout.columns=3".to_string(),
            "flags=[1,2]".to_string(),
            "empty=".to_string(),
        ];
        let values = parse_pairs(&pairs).unwrap();
        assert_eq!(
            Value::Object(values),
            json!({ "color": "blue", "layout.columns": 3, "flags": [1, 2], "empty": "" })
        );
    }

    #[test]
    fn test_parse_pairs_rejects_bare_keys() {
        let err = parse_pairs(&["color".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "zukit-sync",
            "--base-url",
            "https://example.com/wp-json",
            "--router",
            "zuplus",
            "get",
            "color",
        ])
        .unwrap();
        assert_eq!(args.router.as_deref(), Some("zuplus"));
        assert!(matches!(args.command, Command::Get { ref keys } if keys == &["color"]));
    }
}
