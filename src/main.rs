use placementdb_init::{
    bootstrap,
    conf::{load_dotenv, AppConfig},
    provision::{MongoProvisioner, Provisioner},
    utils::o11y::logging::{build_subscriber, log_error},
    verify::verify_catalog,
};

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Parser)]
#[command(version, about = "Provision the placement database: account, collections, indexes")]
struct Cli {
    /// Path to the configuration file
    #[arg(
        long,
        value_name = "FILE",
        env = "PLACEMENTDB_INIT_CONFIG",
        default_value = "config.yaml"
    )]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply the bootstrap plan (the default)
    Run {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare the database catalog against the plan without changing it
    Verify {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the validated plan and exit
    Plan,
}

fn print<T: Serialize + std::fmt::Display>(value: &T, json: bool) {
    if json {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => error!(error = %e, "failed to serialize output"),
        }
    } else {
        println!("{}", value);
    }
}

async fn connect(config: &AppConfig) -> Option<MongoProvisioner> {
    match config.build_db().await {
        Ok(db) => Some(MongoProvisioner::new(db)),
        Err(error) => {
            log_error!(error, "error building db");
            None
        }
    }
}

async fn run(config: AppConfig, json: bool) -> ExitCode {
    let Some(provisioner) = connect(&config).await else {
        return ExitCode::FAILURE;
    };
    match bootstrap::run_after_ping(&config.plan, &provisioner).await {
        Ok(report) => {
            print(&report, json);
            ExitCode::SUCCESS
        }
        Err(error) => {
            print(error.report(), json);
            log_error!(error, "bootstrap failed");
            ExitCode::FAILURE
        }
    }
}

async fn verify(config: AppConfig, json: bool) -> ExitCode {
    let Some(provisioner) = connect(&config).await else {
        return ExitCode::FAILURE;
    };
    // ping logs its own failure
    if provisioner.ping().await.is_err() {
        return ExitCode::FAILURE;
    }
    match verify_catalog(&config.plan, &provisioner).await {
        Ok(status) => {
            print(&status, json);
            let missing = status.missing();
            if missing.is_empty() {
                ExitCode::SUCCESS
            } else {
                warn!(missing = %missing.join(", "), "catalog is incomplete");
                ExitCode::FAILURE
            }
        }
        Err(error) => {
            log_error!(error, "verification failed");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file before anything else
    load_dotenv();

    let subscriber = build_subscriber().expect("failed to build subscriber");
    tracing::subscriber::set_global_default(subscriber).expect("failed to install subscriber");

    let args = Cli::parse();

    let config = match AppConfig::from_path_or_default(&args.config) {
        Ok(config) => config,
        Err(error) => {
            log_error!(error, "error loading config");
            return ExitCode::FAILURE;
        }
    };

    match args.command.unwrap_or(Command::Run { json: false }) {
        Command::Run { json } => run(config, json).await,
        Command::Verify { json } => verify(config, json).await,
        Command::Plan => {
            print!("{}", config.plan);
            ExitCode::SUCCESS
        }
    }
}
