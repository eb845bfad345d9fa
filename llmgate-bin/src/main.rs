use std::path::PathBuf;

use clap::{Parser, Subcommand};
use llmgate_core::{Gateway, GatewayConfig, InvokeOptions, telemetry::MemorySink};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "llmgate CLI smoke tool", long_about = None)]
struct Cli {
    /// JSON or TOML config file; defaults plus environment overrides when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one generation request through the gateway
    Invoke {
        #[arg(long, default_value = "openrouter")]
        service: String,
        #[arg(long, default_value = "You are a helpful assistant.")]
        system: String,
        #[arg(short, long, help = "Message from the user")]
        user: String,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Send the same request this many times (watch the breaker trip)
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Print one JSON line per HTTP attempt
        #[arg(long)]
        trace: bool,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = GatewayConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        Commands::Invoke {
            service,
            system,
            user,
            temperature,
            max_tokens,
            repeat,
            trace,
        } => {
            let mut opts = InvokeOptions::default();
            if let Some(t) = temperature {
                opts = opts.temperature(t);
            }
            if let Some(n) = max_tokens {
                opts = opts.max_tokens(n);
            }

            let sink = MemorySink::new();
            let mut gateway = Gateway::from_config(&cfg)?;
            if trace {
                gateway = gateway.with_telemetry(sink.clone());
            }
            if gateway.endpoints().is_empty() {
                tracing::warn!("no providers have an API key set; every call will be NOT_FOUND");
            }

            let mut failed = false;
            for i in 1..=repeat.max(1) {
                match gateway.invoke(&service, &system, &user, opts).await {
                    Ok(text) => println!("{service} -> {text}"),
                    Err(err) => {
                        failed = true;
                        eprintln!("[{i}] {}", serde_json::to_string(&err.to_body())?);
                    }
                }
                let snap = gateway.breakers().snapshot(&service);
                eprintln!(
                    "[{i}] breaker {} failures={}",
                    snap.state, snap.consecutive_failures
                );
            }

            for t in sink.traces() {
                println!("{}", serde_json::to_string(&t)?);
            }
            if failed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
