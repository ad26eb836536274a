use anyhow::{anyhow, Context, Result};
use cgwallet_core::{UserRegistry, UserSummary, WalletConfig};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const PASSWORD_ENV: &str = "CGWALLET_PASSWORD";
const NEW_PASSWORD_ENV: &str = "CGWALLET_NEW_PASSWORD";

#[derive(Parser)]
#[command(name = "cgwallet")]
#[command(about = "Local wallet accounts with OS-sealed seeds", long_about = None)]
struct Cli {
    /// Data directory (overrides config and platform default)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new user and seal a fresh wallet seed
    Register { username: String },

    /// Verify a password and record the login
    Login { username: String },

    /// List registered users
    List,

    /// Delete a user and their sealed seed
    Delete { username: String },

    /// Print the wallet seed as hex
    RevealSeed { username: String },

    /// Replace a user's password
    ChangePassword { username: String },

    /// Show database location and backend
    Info,
}

#[derive(Serialize)]
struct UserView {
    username: String,
    wallet_public_identifier: String,
    created_at: String,
    last_login_at: Option<String>,
}

impl From<UserSummary> for UserView {
    fn from(u: UserSummary) -> Self {
        Self {
            username: u.username,
            wallet_public_identifier: u.wallet_public_identifier,
            created_at: rfc3339(u.created_at),
            last_login_at: (u.last_login_at > 0).then(|| rfc3339(u.last_login_at)),
        }
    }
}

#[derive(Serialize)]
struct InfoView {
    database: String,
    db_id: String,
    backend: &'static str,
    exists: bool,
    users: usize,
}

fn rfc3339(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

fn prompt_password(prompt: &str, env: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(env) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let pw = rpassword::prompt_password(prompt).map_err(|e| anyhow!("password prompt: {e}"))?;
    Ok(Zeroizing::new(pw))
}

fn prompt_new_password(prompt: &str, env: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(env) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let first = prompt_password(prompt, env)?;
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm password: ")
            .map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    if *first != *second {
        return Err(anyhow!("passwords do not match"));
    }
    Ok(first)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = WalletConfig::load(cli.config.as_deref()).context("loading config")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }

    let mut registry = UserRegistry::native(config)?;
    registry.open_default()?;
    registry.unlock()?;
    tracing::debug!(backend = registry.backend(), "registry ready");

    match cli.command {
        Commands::Register { username } => {
            let password = prompt_new_password("Password: ", PASSWORD_ENV)?;
            let user = registry.register(&username, &password)?;
            print_json(&UserView::from(user))?;
        }

        Commands::Login { username } => {
            let password = prompt_password("Password: ", PASSWORD_ENV)?;
            let user = registry.login(&username, &password)?;
            print_json(&UserView::from(user))?;
        }

        Commands::List => {
            let users: Vec<UserView> = registry
                .list_users()?
                .into_iter()
                .map(UserView::from)
                .collect();
            print_json(&users)?;
        }

        Commands::Delete { username } => {
            let password = prompt_password("Password: ", PASSWORD_ENV)?;
            registry.delete_user(&username, &password)?;
            print_json(&serde_json::json!({ "deleted": username }))?;
        }

        Commands::RevealSeed { username } => {
            let password = prompt_password("Password: ", PASSWORD_ENV)?;
            let seed = registry.reveal_seed(&username, &password)?;
            let hex = Zeroizing::new(hex::encode(seed.as_slice()));
            println!("{}", hex.as_str());
        }

        Commands::ChangePassword { username } => {
            let old = prompt_password("Current password: ", PASSWORD_ENV)?;
            let new = prompt_new_password("New password: ", NEW_PASSWORD_ENV)?;
            registry.change_password(&username, &old, &new)?;
            print_json(&serde_json::json!({ "changed": username }))?;
        }

        Commands::Info => {
            let path = registry
                .database_path()
                .ok_or_else(|| anyhow!("no database bound"))?;
            let info = InfoView {
                database: path.display().to_string(),
                exists: path.exists(),
                db_id: registry.db_id().unwrap_or_default().to_string(),
                backend: registry.backend(),
                users: registry.user_count()?,
            };
            print_json(&info)?;
        }
    }

    registry.lock()?;
    Ok(())
}
