//! greenfuel - command-line client for the greenfuel business API.
//!
//! Signs in, keeps the session on disk (or in the OS keychain) and issues
//! authenticated requests, refreshing the access token when it expires.

mod console;

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use greenfuel_core::{
    resolve_base_url, AuthenticatedClient, Collaborators, Config, FileStorage, KeyringStorage,
    ReqwestTransport, Route, SessionStorage, SessionStore, StorageBackend,
};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use console::{ConsoleNavigator, ConsoleNotifier};

/// Log file name in cache directory
const LOG_FILE: &str = "greenfuel.log";

const USAGE: &str = "\
Usage: greenfuel <command>

Commands:
  login [email]   Sign in (password from GREENFUEL_PASSWORD or prompt)
  logout          Clear the stored session
  whoami          Show the signed-in user
  status          Show base URL and token expiry
  get <path>      GET an API path and print the JSON response
";

enum Command {
    Login(Option<String>),
    Logout,
    Whoami,
    Status,
    Get(String),
    Help,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let command = match args.first().map(String::as_str) {
            Some("login") => Command::Login(args.get(1).cloned()),
            Some("logout") => Command::Logout,
            Some("whoami") => Command::Whoami,
            Some("status") => Command::Status,
            Some("get") => match args.get(1) {
                Some(path) => Command::Get(path.clone()),
                None => bail!("get requires a path\n\n{}", USAGE),
            },
            Some("help") | Some("--help") | Some("-h") | None => Command::Help,
            Some(other) => bail!("Unknown command: {}\n\n{}", other, USAGE),
        };
        Ok(command)
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

fn build_store(config: &Config, navigator: Arc<ConsoleNavigator>) -> Result<SessionStore> {
    let base_url = resolve_base_url(&config.environment());

    let storage: Arc<dyn SessionStorage> = match config.storage {
        StorageBackend::File => Arc::new(FileStorage::new(config.cache_dir()?)),
        StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
    };
    let transport = ReqwestTransport::new(Duration::from_secs(config.request_timeout_secs))
        .context("Failed to build HTTP client")?;

    Ok(SessionStore::new(
        base_url,
        config.refresh_mode,
        Collaborators {
            transport: Arc::new(transport),
            storage,
            navigator,
            notifier: Arc::new(ConsoleNotifier),
        },
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config_result = Config::load();
    let config = config_result.as_ref().cloned().unwrap_or_default();
    let _log_guard = init_tracing(config.cache_dir().ok().as_deref());
    if let Err(e) = config_result {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    let navigator = Arc::new(ConsoleNavigator::default());
    let store = build_store(&config, navigator.clone())?;
    debug!(base_url = %store.base_url(), storage = ?config.storage, "Session store ready");

    match command {
        Command::Help => print!("{}", USAGE),
        Command::Login(email) => login(&store, config, email).await?,
        Command::Logout => {
            store.logout();
            println!("Logged out");
        }
        Command::Whoami => whoami(&store)?,
        Command::Status => status(&store),
        Command::Get(path) => get(&store, &navigator, &path).await?,
    }
    Ok(())
}

async fn login(store: &SessionStore, mut config: Config, email: Option<String>) -> Result<()> {
    let email = match email
        .or_else(|| std::env::var("GREENFUEL_EMAIL").ok())
        .or_else(|| config.last_email.clone())
    {
        Some(email) => email,
        None => prompt_email()?,
    };
    let password = match std::env::var("GREENFUEL_PASSWORD") {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Password: ")?,
    };

    println!("Authenticating...");
    let outcome = store.login(&email, &password).await;
    if !outcome.success {
        bail!(outcome.message);
    }

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("{}", outcome.message);
    if let Some(user) = store.user() {
        println!("Signed in as {} <{}>", user.display_name(), user.email);
    }
    info!("Login complete");
    Ok(())
}

fn prompt_email() -> Result<String> {
    print!("Email: ");
    io::stdout().flush()?;

    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    Ok(email.trim().to_string())
}

fn whoami(store: &SessionStore) -> Result<()> {
    let Some(user) = store.user() else {
        bail!("Not logged in. Run `greenfuel login` first.");
    };
    println!("{} <{}>", user.display_name(), user.email);
    if let Some(role) = user.role() {
        println!("Role:        {}", role);
    }
    if let Some(ref department) = user.department {
        println!("Department:  {}", department);
    }
    if let Some(ref designation) = user.designation {
        println!("Designation: {}", designation);
    }
    if !user.is_active() {
        println!("Status:      inactive");
    }
    Ok(())
}

fn status(store: &SessionStore) {
    println!("API:     {}", store.base_url());
    match store.tokens() {
        Some(tokens) if tokens.is_expired() => {
            println!("Session: access token expired (will refresh on next request)")
        }
        Some(tokens) => println!(
            "Session: active, access token expires in {}m ({})",
            tokens.minutes_until_expiry(),
            tokens.expires_at().with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        ),
        None => println!("Session: not logged in"),
    }
}

async fn get(store: &SessionStore, navigator: &ConsoleNavigator, path: &str) -> Result<()> {
    let client = AuthenticatedClient::new(store);
    let response = match client.get(path).await {
        Ok(response) => response,
        Err(e) => {
            if e.is_session_invalid() {
                bail!("{}. Run `greenfuel login` to sign in again.", e);
            }
            bail!(e);
        }
    };

    let Some(response) = response else {
        bail!("No response from {}", store.base_url());
    };
    if navigator.last_route() == Some(Route::Login) {
        bail!("Session expired. Run `greenfuel login` to sign in again.");
    }

    match serde_json::from_slice::<serde_json::Value>(&response.body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", response.text()),
    }
    if !response.is_success() {
        bail!("Request failed with status {}", response.status);
    }
    Ok(())
}
