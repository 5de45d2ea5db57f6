use anyhow::{bail, Context};
use cinefluent_core::config::{ClientConfig, StorageKind};
use cinefluent_core::domain::GamificationClient;
use cinefluent_core::session::{SessionManager, SessionPhase};
use cinefluent_core::vault::TokenStore;
use cinefluent_core::{telemetry, ApiGateway};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "cinefluent", version, about = "CineFluent command-line client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Override the backend base URL.
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Token storage backend: `keyring` or `file`.
    #[arg(long, global = true)]
    storage: Option<StorageKind>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and persist the session.
    Login { email: String, password: String },
    /// Create an account and sign in.
    Register {
        email: String,
        password: String,
        confirm_password: String,
    },
    /// End the session and clear stored tokens.
    Logout,
    /// Show the signed-in user's profile.
    Whoami,
    /// Show the current session phase.
    Status,
    /// Show the learning streak.
    Streak,
    /// Show overall learning progress.
    Progress,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing(telemetry::default_filter())?;

    let cli = Cli::parse();
    let runtime = Runtime::new()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ClientConfig::load()?;
    if let Some(url) = &cli.api_url {
        config = config.with_base_url(url)?;
    }
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }
    debug!(base_url = %config.base_url, storage = ?config.storage, "resolved configuration");

    let tokens = TokenStore::new(config.storage.open_vault());
    let gateway = ApiGateway::new(&config, tokens.clone())?;
    let session = SessionManager::new(
        Arc::new(gateway.clone()),
        tokens,
        config.password_policy.clone(),
    );
    session.bootstrap().await;

    match cli.command {
        Command::Login { email, password } => {
            session
                .login(&email, &password)
                .await
                .map_err(|err| anyhow::anyhow!(err.user_message()))?;
            let snapshot = session.snapshot();
            match snapshot.user {
                Some(user) => println!("Signed in as {}", user.email),
                None => bail!("login did not produce a session"),
            }
        }
        Command::Register {
            email,
            password,
            confirm_password,
        } => {
            session
                .register(&email, &password, &confirm_password)
                .await
                .map_err(|err| anyhow::anyhow!(err.user_message()))?;
            let snapshot = session.snapshot();
            match snapshot.user {
                Some(user) => println!("Registered and signed in as {}", user.email),
                None => bail!("registration did not produce a session"),
            }
        }
        Command::Logout => {
            session.logout().await;
            println!("Signed out");
        }
        Command::Whoami => {
            let snapshot = session.snapshot();
            let Some(user) = snapshot.user else {
                bail!("not signed in");
            };
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::Status => {
            let snapshot = session.snapshot();
            let phase = match snapshot.phase {
                SessionPhase::Authenticated | SessionPhase::RefreshingToken => "authenticated",
                SessionPhase::Unauthenticated => "unauthenticated",
                SessionPhase::Unknown | SessionPhase::CheckingSession => "unknown",
            };
            match &snapshot.user {
                Some(user) => println!("{phase} ({})", user.email),
                None => println!("{phase}"),
            }
        }
        Command::Streak => {
            require_signed_in(&session)?;
            let client = GamificationClient::new(gateway, session.clone());
            let streak = client.streak().await.context("failed to fetch streak")?;
            println!(
                "Current streak: {} days (longest {})",
                streak.current_streak, streak.longest_streak
            );
        }
        Command::Progress => {
            require_signed_in(&session)?;
            let client = GamificationClient::new(gateway, session.clone());
            let stats = client.progress().await.context("failed to fetch progress")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

fn require_signed_in(session: &SessionManager) -> anyhow::Result<()> {
    if !session.snapshot().is_authenticated() {
        bail!("not signed in, run `cinefluent login` first");
    }
    Ok(())
}
