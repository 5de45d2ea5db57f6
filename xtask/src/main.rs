use anyhow::{ensure, Result};
use cinefluent_core::api::MockApi;
use cinefluent_core::config::PasswordPolicy;
use cinefluent_core::session::SessionManager;
use cinefluent_core::telemetry;
use cinefluent_core::vault::TokenStore;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for CineFluent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a lightweight smoke test that exercises the session core.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    runtime.block_on(async {
        let tokens = TokenStore::in_memory();
        let api = Arc::new(MockApi::new(tokens.clone()));
        let session = SessionManager::new(api.clone(), tokens.clone(), PasswordPolicy::default());

        session.bootstrap().await;
        ensure!(
            !session.snapshot().is_authenticated(),
            "fresh store must start signed out"
        );

        session
            .register("smoke@example.com", "Smoke123", "Smoke123")
            .await?;
        ensure!(session.snapshot().is_authenticated(), "register must sign in");
        ensure!(tokens.load()?.is_some(), "tokens must be persisted");
        info!("registered and signed in");

        // Simulate a server-side access-token wipe and recover via refresh.
        api.expire_access_tokens();
        let retried = session.recover_unauthorized().await?;
        ensure!(retried, "refresh recovery must allow a retry");
        ensure!(
            session.snapshot().is_authenticated(),
            "session must survive token rotation"
        );
        info!("recovered from expired access token");

        session.logout().await;
        ensure!(
            !session.snapshot().is_authenticated(),
            "logout must sign out"
        );
        ensure!(tokens.load()?.is_none(), "logout must clear the vault");
        info!("smoke test passed");
        Ok(())
    })
}
