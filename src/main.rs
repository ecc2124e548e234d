use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use directory_connector::telemetry::init_tracing;
use directory_connector::{
    AuthOutcome, Configuration, ConnectorError, DirectoryConnector,
    DirectoryEntry, TracingLogger,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration.
    #[clap(long, short, default_value = "directory.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Run server selection and print the pinned server.
    Servers,
    /// Look up an entry by account name.
    User { username: String },
    /// Look up an entry by email.
    Email { email: String },
    /// Look up an entry by numeric identifier.
    Id { id: u64 },
    /// Verify credentials.
    Auth {
        username: String,
        #[clap(long, short, env = "DIRECTORY_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let config = match Configuration::default().path(args.config).read() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "cannot load configuration");
            return ExitCode::FAILURE;
        },
    };
    let connector =
        DirectoryConnector::from_config(&config, Arc::new(TracingLogger));

    match run(&connector, args.cmd).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "operation failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(
    connector: &DirectoryConnector,
    cmd: Commands,
) -> Result<ExitCode, ConnectorError> {
    match cmd {
        Commands::Servers => {
            let result = connector.select_active_server().await;
            for failure in connector.errors().await {
                println!("{failure}");
            }
            let server = result?;
            println!("active server: {} ({})", server.url, server.base_dn);
            Ok(ExitCode::SUCCESS)
        },
        Commands::User { username } => {
            print_entry(Some(connector.find_by_username(&username).await?))
        },
        Commands::Email { email } => {
            print_entry(connector.find_by_email(&email).await?)
        },
        Commands::Id { id } => print_entry(connector.find_by_id(id).await?),
        Commands::Auth { username, password } => {
            match connector.authenticate(&username, &password).await? {
                AuthOutcome::Authenticated => {
                    println!("{username} authenticated");
                    Ok(ExitCode::SUCCESS)
                },
                AuthOutcome::Rejected(reasons) => {
                    for reason in reasons {
                        println!("{reason}");
                    }
                    Ok(ExitCode::FAILURE)
                },
            }
        },
    }
}

fn print_entry(
    entry: Option<DirectoryEntry>,
) -> Result<ExitCode, ConnectorError> {
    match entry {
        Some(entry) => {
            match serde_json::to_string_pretty(&entry) {
                Ok(json) => println!("{json}"),
                Err(_) => println!("{entry:#?}"),
            }
            Ok(ExitCode::SUCCESS)
        },
        None => {
            println!("not found");
            Ok(ExitCode::FAILURE)
        },
    }
}
