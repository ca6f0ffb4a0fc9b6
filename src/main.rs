//! Resilience demo harness.
//!
//! ```text
//! caller ─▶ BreakerRegistry ─▶ CircuitBreaker ─▶ retry engine ─▶ agent / gateway
//!                                (fail fast)     (backoff+jitter)
//! ```
//!
//! `simulate` drives an in-process dependency that fails a fixed number of
//! times and then recovers, so the full Closed → Open → Half-Open → Closed
//! cycle can be watched in the logs. `send` posts one JSON message to a real
//! agent endpoint through the same stack.

use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};

use agent_resilience::config::{load_config, ResilienceConfig};
use agent_resilience::observability::{logging, metrics};
use agent_resilience::resilience::{retry_with_config, BreakerRegistry, Context};
use agent_resilience::transport::AgentClient;

#[derive(Parser)]
#[command(name = "agent-resilience")]
#[command(
    about = "Exercise circuit breakers and retries against agent endpoints",
    long_about = None
)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive an in-process dependency that fails, then recovers
    Simulate {
        /// Dependency name, selects the breaker settings
        #[arg(long, default_value = "simulated-agent")]
        dependency: String,

        /// Failing invocations before the dependency recovers
        #[arg(long, default_value_t = 10)]
        failures: u32,

        /// Calls to issue
        #[arg(long, default_value_t = 20)]
        calls: u32,

        /// Pause between calls in milliseconds
        #[arg(long, default_value_t = 250)]
        interval_ms: u64,
    },
    /// POST a JSON message to an agent endpoint
    Send {
        #[arg(long)]
        url: String,

        /// JSON message body
        #[arg(long, default_value = "{}")]
        message: String,

        /// Overall deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("simulated agent failure #{0}")]
struct SimulatedFailure(u32);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "agent-resilience starting");

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let ctx = Context::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling outstanding calls");
            interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Simulate {
            dependency,
            failures,
            calls,
            interval_ms,
        } => {
            simulate(
                &ctx,
                &config,
                &dependency,
                failures,
                calls,
                Duration::from_millis(interval_ms),
            )
            .await;
        }
        Commands::Send {
            url,
            message,
            timeout_ms,
        } => {
            let message: serde_json::Value = serde_json::from_str(&message)?;
            let ctx = match timeout_ms {
                Some(ms) => ctx.with_timeout(Duration::from_millis(ms)),
                None => ctx,
            };

            let client = AgentClient::new(&config)?;
            let response = client.send(&ctx, &url, &message).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

async fn simulate(
    ctx: &Context,
    config: &ResilienceConfig,
    dependency: &str,
    failures: u32,
    calls: u32,
    interval: Duration,
) {
    let registry = BreakerRegistry::new(config.breaker_defaults.clone(), config.breakers.clone());
    let breaker = registry.get_or_create(dependency);
    let retry = config.retry.to_retry_config();

    let label = dependency.to_string();
    breaker.set_on_state_change(move |from, to| {
        println!("[{}] {} -> {}", label, from, to);
    });

    let invocations = AtomicU32::new(0);

    for call in 1..=calls {
        if ctx.err().is_some() {
            break;
        }

        let result = breaker
            .execute(|| {
                retry_with_config(ctx, &retry, || async {
                    let n = invocations.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= failures {
                        Err(SimulatedFailure(n))
                    } else {
                        Ok(n)
                    }
                })
            })
            .await;

        match result {
            Ok(n) => tracing::info!(
                call,
                invocation = n,
                state = %breaker.state(),
                "Call succeeded"
            ),
            Err(e) if e.is_rejection() => tracing::warn!(
                call,
                state = %breaker.state(),
                error = %e,
                "Call rejected by breaker"
            ),
            Err(e) => tracing::warn!(
                call,
                state = %breaker.state(),
                failures = breaker.failures(),
                error = %e,
                "Call failed"
            ),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = ctx.done() => break,
        }
    }

    tracing::info!(
        state = %breaker.state(),
        invocations = invocations.load(Ordering::SeqCst),
        "Simulation finished"
    );
}
