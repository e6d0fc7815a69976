use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use edugate_auth::{Action, Role};
use edugate_core::UserId;
use edugate_infra::store::{InMemoryStore, MenuStore, PermissionStore, PostgresStore, run_migrations};
use edugate_infra::{EdugateConfig, MenuComposer, PermissionResolver, StoreBackend};
use edugate_observability::LogFormat;

mod seed;

/// Operator tool for inspecting permissions and menus.
#[derive(Parser, Debug)]
#[command(name = "edugate", about = "Edugate authorization inspector")]
struct Cli {
    /// JSON fixture loaded into the in-memory store (ignored with Postgres)
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Human-readable logs instead of JSON
    #[arg(long)]
    pretty_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the capability matrix of a role
    Matrix { role: String },

    /// Print the menu tree a user sees under a role
    Menu { user_id: UserId, role: String },

    /// Decide one permission and show which tier decided it
    Check {
        role: String,
        resource: String,
        action: Action,
    },

    /// Apply pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    edugate_observability::init(if cli.pretty_logs { LogFormat::Pretty } else { LogFormat::Json });

    let config = EdugateConfig::from_env().context("invalid configuration")?;

    match &config.backend {
        StoreBackend::Postgres { database_url } => {
            let store = PostgresStore::connect(database_url)
                .await
                .context("failed to connect to Postgres")?;
            if let Command::Migrate = cli.command {
                run_migrations(store.pool()).await.context("migrations failed")?;
                tracing::info!("database is up to date");
                return Ok(());
            }
            run(store, &config, cli.command).await
        }
        StoreBackend::InMemory => {
            let store = InMemoryStore::new();
            if let Some(path) = &cli.seed {
                seed::load(&store, path)?;
            }
            run(store, &config, cli.command).await
        }
    }
}

async fn run<S>(store: S, config: &EdugateConfig, command: Command) -> Result<()>
where
    S: PermissionStore + MenuStore,
{
    let resolver = PermissionResolver::from_config(store, config);

    match command {
        Command::Matrix { role } => {
            let matrix = resolver.effective_permissions(&Role::new(role)).await?;
            print_json(&matrix)
        }
        Command::Menu { user_id, role } => {
            let tree = MenuComposer::new(resolver).compose_menu(user_id, &Role::new(role)).await?;
            print_json(&tree)
        }
        Command::Check { role, resource, action } => {
            let decision = resolver.check(&Role::new(role), &resource, action, None).await?;
            print_json(&decision)
        }
        Command::Migrate => anyhow::bail!("migrate requires USE_PERSISTENT_STORES=true and DATABASE_URL"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
