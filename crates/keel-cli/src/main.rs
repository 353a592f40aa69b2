use std::process::ExitCode;

use clap::{Parser, Subcommand};
use keel::{
    BootstrapOptions, Connection, DatabaseConfig, DatabaseSchema, DatabaseService, PgDatabase,
    schema_diff,
};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod output;

/// Schema reconciliation and vector-extension bootstrap for Postgres.
///
/// Connection settings come from the environment (`DB_URL`, or `DB_HOSTNAME`,
/// `DB_PORT`, `DB_USERNAME`, `DB_PASSWORD`, `DB_DATABASE_NAME`); a `.env`
/// file in the working directory is loaded first.
#[derive(Debug, Parser)]
#[command(name = "keel", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check the Postgres version and reconcile the vector extension
    Bootstrap,
    /// Show the changes that would turn the configured database into another one
    Diff {
        /// Connection URL of the database whose schema is the desired state
        #[arg(long)]
        against: String,
        /// Print the SQL statements instead of the summary
        #[arg(long)]
        sql: bool,
    },
    /// Dump the schema of the configured database
    Schema,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> keel::Result<()> {
    let config = DatabaseConfig::from_env()?;
    tracing::debug!(database = %config.display_url(), "loaded configuration");

    match cli.command {
        Commands::Bootstrap => {
            if !config.skip_migrations {
                tracing::info!("no application schema is declared here, migrations are skipped");
            }
            let db = PgDatabase::connect(config, DatabaseSchema::default())?;
            let service = DatabaseService::new(
                db,
                BootstrapOptions {
                    skip_migrations: true,
                },
            );
            service.bootstrap().await?;
            println!("{}", "Database is ready.".green());
        }
        Commands::Diff { against, sql } => {
            let live = PgDatabase::connect(config.clone(), DatabaseSchema::default())?
                .introspect()
                .await?;
            let desired_config = DatabaseConfig {
                connection: Connection::Url(against),
                ..config
            };
            let desired = PgDatabase::connect(desired_config, DatabaseSchema::default())?
                .introspect()
                .await?;

            let diff = schema_diff(&desired, &live);
            if sql {
                print!("{}", diff.to_sql());
            } else {
                output::print_diff(&diff);
            }
        }
        Commands::Schema => {
            let schema = PgDatabase::connect(config, DatabaseSchema::default())?
                .introspect()
                .await?;
            output::print_schema(&schema);
        }
    }

    Ok(())
}
