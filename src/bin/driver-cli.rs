use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use cluster_driver::config::{load_config, ConfigWatcher};
use cluster_driver::discovery::FileDiscovery;
use cluster_driver::observability::logging::init_logging;
use cluster_driver::resilience::backoff::BackoffPolicy;
use cluster_driver::{Driver, DriverConfig};

#[derive(Parser)]
#[command(name = "driver-cli")]
#[command(about = "Inspect cluster driver configuration and endpoints", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a config file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the backoff windows of a tier
    Backoff {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = Tier::Fast)]
        class: Tier,

        #[arg(short, long, default_value_t = 10)]
        attempts: u32,
    },
    /// Connect to the configured endpoints and print their state
    Probe {
        #[arg(short, long)]
        config: PathBuf,

        /// Keep running, reloading endpoints when the file changes
        #[arg(short, long)]
        watch: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Tier {
    Fast,
    Slow,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => match load_config(&config) {
            Ok(config) => {
                let summary = json!({
                    "valid": true,
                    "endpoints": config.endpoints,
                    "balancer": config.balancer.algorithm,
                    "retry": config.retry,
                    "timeouts": config.timeouts,
                    "discovery": config.discovery,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Err(e) => {
                let summary = json!({ "valid": false, "error": e.to_string() });
                println!("{}", serde_json::to_string_pretty(&summary)?);
                std::process::exit(1);
            }
        },
        Commands::Backoff {
            config,
            class,
            attempts,
        } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => DriverConfig::default(),
            };
            let retry = &config.retry;
            let policy = match class {
                Tier::Fast => BackoffPolicy {
                    base: Duration::from_millis(retry.fast_base_ms),
                    max: Duration::from_millis(retry.fast_max_ms),
                    jitter: retry.jitter,
                },
                Tier::Slow => BackoffPolicy {
                    base: Duration::from_millis(retry.slow_base_ms),
                    max: Duration::from_millis(retry.slow_max_ms),
                    jitter: retry.jitter,
                },
            };

            let windows: Vec<_> = (1..=attempts)
                .map(|attempt| {
                    json!({
                        "attempt": attempt,
                        "min_ms": policy.min_delay(attempt).as_millis() as u64,
                        "max_ms": policy.window(attempt).as_millis() as u64,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&windows)?);
        }
        Commands::Probe { config: path, watch } => {
            let config = load_config(&path)?;
            init_logging(&config.observability);

            let token = CancellationToken::new();
            let driver =
                Driver::connect(&token, config, Arc::new(FileDiscovery::new(&path))).await?;
            println!("{}", serde_json::to_string_pretty(&driver.endpoints())?);

            if watch {
                let discovery = match driver.discovery_handle() {
                    Some(handle) => handle,
                    None => {
                        eprintln!("Discovery is disabled in {}; nothing to watch", path.display());
                        driver.close();
                        return Ok(());
                    }
                };
                let _watcher = ConfigWatcher::new(&path, discovery).run()?;
                let mut ticker = tokio::time::interval(Duration::from_secs(5));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            println!("{}", serde_json::to_string(&driver.endpoints())?);
                        }
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
            }

            driver.close();
            token.cancel();
        }
    }

    Ok(())
}
