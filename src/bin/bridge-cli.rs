use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Management CLI for the provider bridge", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "BRIDGE_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show bridge status and routing settings
    Status,
    /// List circuit breakers
    Circuits {
        /// Only show circuits that are not closed
        #[arg(long)]
        unhealthy: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", cli.key))?);

    let base = cli.url.trim_end_matches('/');
    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/admin/status", base)).headers(headers).send().await?;
            if let Some(json) = read_json(res).await? {
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
        }
        Commands::Circuits { unhealthy } => {
            let res = client.get(format!("{}/admin/circuits", base)).headers(headers).send().await?;
            if let Some(Value::Array(circuits)) = read_json(res).await? {
                print_circuits(&circuits, unhealthy);
            }
        }
    }

    Ok(())
}

async fn read_json(res: reqwest::Response) -> Result<Option<Value>, Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(None);
    }
    Ok(Some(res.json().await?))
}

fn print_circuits(circuits: &[Value], unhealthy_only: bool) {
    println!("{:<40} {:<10} {:>8} {:>8} {:>12}", "KEY", "STATE", "REQS", "FAIL%", "RETRY IN");
    for c in circuits {
        let state = c["state"].as_str().unwrap_or("?");
        if unhealthy_only && state == "closed" {
            continue;
        }
        let retry_in = c["next_attempt_in_ms"]
            .as_u64()
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:<10} {:>8} {:>7.1}% {:>12}",
            c["key"].as_str().unwrap_or("?"),
            state,
            c["window_requests"].as_u64().unwrap_or(0),
            c["failure_rate"].as_f64().unwrap_or(0.0),
            retry_in,
        );
    }
}
