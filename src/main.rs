use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use drawdown::api::{handle_request, run_http_server, SimulationRequest};
use drawdown::core::CancelToken;

#[derive(Parser, Debug)]
#[command(
    name = "drawdown",
    about = "Monte Carlo retirement drawdown simulation engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the engine over HTTP
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Evaluate one simulation request from a JSON file and print the response
    Run {
        /// Path to a JSON file with `{ "scenario": {...}, "run_id": ... }`
        scenario: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port } => {
            if let Err(e) = run_http_server(port).await {
                eprintln!("Server error: {e}");
                return ExitCode::FAILURE;
            }
        }
        Command::Run { scenario } => match run_from_file(&scenario) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        },
    }
    ExitCode::SUCCESS
}

fn run_from_file(path: &Path) -> Result<String, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let request: SimulationRequest =
        serde_json::from_str(&text).map_err(|e| format!("invalid request JSON: {e}"))?;
    let cancel = CancelToken::new();
    let response = handle_request(request, &cancel).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&response).map_err(|e| e.to_string())
}
