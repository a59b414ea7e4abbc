use clap::{Parser, Subcommand};
use serde_json::Value;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "container-ctl")]
#[command(about = "Query a running service container's admin surface", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8099")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lifecycle state and listener addresses
    Status,
    /// Loopback health check; exits non-zero when unhealthy
    Health,
    /// Raw Prometheus metrics
    Metrics,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{base}/status")).send().await?;
            let status = res.status();
            if !status.is_success() {
                eprintln!("Error: admin surface returned status {status}");
                return Ok(ExitCode::FAILURE);
            }
            let json: Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Commands::Health => {
            let res = client.get(format!("{base}/health")).send().await?;
            let healthy = res.status().is_success();
            println!("{}", res.text().await?.trim());
            if !healthy {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Metrics => {
            let res = client.get(format!("{base}/metrics")).send().await?;
            let status = res.status();
            let body = res.text().await?;
            if !status.is_success() {
                eprintln!("Error: admin surface returned status {status}: {}", body.trim());
                return Ok(ExitCode::FAILURE);
            }
            print!("{body}");
        }
    }

    Ok(ExitCode::SUCCESS)
}
