use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use incident_index::api::RegisterRequest;
use incident_index::config::{DEFAULT_API_BASE_URL, Timeouts};
use incident_index::{ApiError, AuthStore, ClientConfig, ConfigError, FileStorage, IndexClient, StorageError};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("cannot locate token file; pass --token-file or set INCIDENT_TOKEN_FILE")]
    MissingTokenFile,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("response body read failed: {0}")]
    Body(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "incident-cli", about = "Police incident index API client")]
struct Cli {
    #[arg(long, env = "INCIDENT_API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    base_url: String,

    #[arg(long, env = "INCIDENT_TOKEN_FILE", help = "Defaults to ~/.incident-index/tokens.json")]
    token_file: Option<PathBuf>,

    #[arg(long, env = "INCIDENT_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    #[arg(long, env = "INCIDENT_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    connect_timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        email: String,
        #[arg(long, env = "INCIDENT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register(RegisterArgs),
    Logout,
    Whoami,
    Officer {
        uid: String,
    },
    Agency {
        uid: String,
    },
    Unit {
        uid: String,
    },
    Search {
        term: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Authenticated GET of an arbitrary API path; prints status and body.
    Get {
        path: String,
    },
}

#[derive(Args, Debug)]
struct RegisterArgs {
    email: String,
    #[arg(long, env = "INCIDENT_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    phone_number: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    init_tracing();
    let cli = Cli::parse();

    let config = client_config(&cli)?;
    let token_file = config.token_file.clone().ok_or(CliError::MissingTokenFile)?;
    let client = IndexClient::new(config, AuthStore::new(), Arc::new(FileStorage::new(token_file)))?;
    let phase = client.mount()?;
    tracing::debug!(?phase, "session restored");

    match cli.command {
        Command::Login { email, password } => {
            client.login(&email, &password).await?;
            eprintln!("logged in as {email}");
            Ok(())
        }
        Command::Register(args) => {
            let request = RegisterRequest {
                email: args.email,
                password: args.password,
                first_name: args.first_name,
                last_name: args.last_name,
                phone_number: args.phone_number,
            };
            client.register(&request).await?;
            eprintln!("registered {}", request.email);
            Ok(())
        }
        Command::Logout => {
            client.logout().await?;
            eprintln!("logged out");
            Ok(())
        }
        Command::Whoami => print_json(&client.current_user().await?),
        Command::Officer { uid } => print_json(&client.officer(&uid).await?),
        Command::Agency { uid } => print_json(&client.agency(&uid).await?),
        Command::Unit { uid } => print_json(&client.unit(&uid).await?),
        Command::Search { term, page } => print_json(&client.search(&term, page).await?),
        Command::Get { path } => run_get(&client, &path).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn client_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::new(cli.base_url.clone());
    config.timeouts = Timeouts { request_secs: cli.request_timeout_secs, connect_secs: cli.connect_timeout_secs };
    config.token_file = cli.token_file.clone().or_else(default_token_file);
    config.validate()?;
    Ok(config)
}

fn default_token_file() -> Option<PathBuf> {
    let home = std::env::var_os("HOME").filter(|v| !v.is_empty())?;
    Some(PathBuf::from(home).join(".incident-index").join("tokens.json"))
}

async fn run_get(client: &IndexClient, path: &str) -> Result<(), CliError> {
    let response = client.get_raw(path).await?;
    let status = response.status();
    let body = response.text().await.map_err(|e| CliError::Body(e.to_string()))?;
    eprintln!("HTTP {}", status.as_u16());
    match serde_json::from_str::<Value>(&body) {
        Ok(value) => print_json(&value),
        Err(_) => {
            println!("{body}");
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
