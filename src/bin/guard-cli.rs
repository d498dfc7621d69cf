use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use field_guard::config::{load_config, GuardConfig};
use field_guard::security::audit::MemoryAuditSink;
use field_guard::security::geometry::{GeoPayload, GeometryValidator};
use field_guard::security::injection::InjectionDetector;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Operator CLI for field-guard", long_about = None)]
struct Cli {
    /// Config file whose detector and geometry limits are used.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a text with the injection detector
    Assess { text: String },
    /// Validate a GeoJSON geometry file
    CheckGeometry { file: PathBuf },
    /// Load and validate a config file
    CheckConfig { file: PathBuf },
    /// Query a running server
    Status {
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,

        /// Admin key; also fetches /admin/stats when given.
        #[arg(short, long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the checked input was acceptable.
async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Assess { text } => {
            let config = base_config(cli.config.as_deref())?;
            let detector = InjectionDetector::new(config.injection, Arc::new(MemoryAuditSink::new()));
            match detector.assess(&text) {
                Ok(assessment) => {
                    print_json(&json!(assessment))?;
                    Ok(!assessment.is_flagged)
                }
                Err(err) => {
                    print_json(&json!({ "code": err.code(), "message": err.message(), "errors": err.errors() }))?;
                    Ok(false)
                }
            }
        }
        Commands::CheckGeometry { file } => {
            let config = base_config(cli.config.as_deref())?;
            let raw: Value = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let geometry = raw.get("aoiGeoJSON").or_else(|| raw.get("geometry")).unwrap_or(&raw);
            let payload: GeoPayload = serde_json::from_value(geometry.clone())?;

            let validator = GeometryValidator::new(config.geometry, Arc::new(MemoryAuditSink::new()));
            let result = validator.validate(&payload);
            print_json(&json!(result))?;
            Ok(result.valid)
        }
        Commands::CheckConfig { file } => match load_config(&file) {
            Ok(config) => {
                println!("{} is valid", file.display());
                println!("  bind address: {}", config.listener.bind_address);
                println!("  environment:  {:?}", config.errors.environment);
                println!("  rate limits:  {}", if config.rate_limit.enabled { "on" } else { "off" });
                Ok(true)
            }
            Err(e) => {
                eprintln!("{} is invalid: {e}", file.display());
                Ok(false)
            }
        },
        Commands::Status { url, key } => {
            let client = reqwest::Client::new();
            let res = client.get(format!("{url}/health")).send().await?;
            let healthy = print_response(res).await?;

            if let Some(key) = key {
                let mut headers = HeaderMap::new();
                headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {key}"))?);
                let res = client
                    .get(format!("{url}/admin/stats"))
                    .headers(headers)
                    .send()
                    .await?;
                print_response(res).await?;
            }
            Ok(healthy)
        }
    }
}

fn base_config(path: Option<&Path>) -> Result<GuardConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    })
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {status}");
        if let Ok(text) = res.text().await {
            eprintln!("Response: {text}");
        }
        return Ok(false);
    }

    let json: Value = res.json().await?;
    print_json(&json)?;
    Ok(true)
}
