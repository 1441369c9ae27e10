//! cocaine-tool: resolve services and call them from the shell.

mod commands;

use captains_log::recipe;
use log::Level;
use clap::{Parser, Subcommand};
use cocaine::{ClientConfig, parse_locators};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cocaine-tool")]
#[command(about = "Talk to the services of a cocaine cloud")]
#[command(version)]
struct Cli {
    /// Locator endpoints, comma separated host:port list
    #[arg(long, global = true, default_value = "127.0.0.1:10053")]
    locator: String,

    /// Seconds to wait for each answer, 0 waits forever
    #[arg(long, global = true, default_value_t = 5.0)]
    timeout: f64,

    /// Print values as JSON instead of msgpack text
    #[arg(long, global = true)]
    json: bool,

    /// Write the client log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the endpoints, version and API of a service
    Resolve {
        name: String,
    },

    /// Invoke a method and print every answer until the session completes
    Call {
        service: String,
        method: String,
        /// Arguments, each one parsed as JSON (bare words are taken as strings)
        args: Vec<String>,
    },

    /// Operate the storage service
    Storage {
        #[command(subcommand)]
        op: StorageOp,
    },
}

#[derive(Subcommand)]
pub enum StorageOp {
    Read {
        collection: String,
        key: String,
    },
    Write {
        collection: String,
        key: String,
        value: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    Find {
        collection: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    Remove {
        collection: String,
        key: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(path) = cli.log_file.as_ref() {
        if let Err(e) = recipe::raw_file_logger(path.clone(), Level::Debug).build() {
            eprintln!("Error: cannot set up log file {}: {:?}", path.display(), e);
            std::process::exit(1);
        }
    }

    let result = match client_config(&cli) {
        Ok(config) => {
            let tool = commands::Tool::new(config, cli.json);
            let res = match cli.command {
                Commands::Resolve { name } => tool.resolve(&name).await,
                Commands::Call { service, method, args } => {
                    tool.call(&service, &method, &args).await
                }
                Commands::Storage { op } => tool.storage(op).await,
            };
            tool.shutdown();
            res
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn client_config(cli: &Cli) -> Result<ClientConfig, commands::ToolError> {
    let locators = parse_locators(&cli.locator, 1).map_err(commands::ToolError::Args)?;
    if locators.is_empty() {
        return Err(commands::ToolError::Args("no locator endpoint given".to_string()));
    }
    if !cli.timeout.is_finite() || cli.timeout < 0.0 {
        return Err(commands::ToolError::Args(format!("invalid timeout {}", cli.timeout)));
    }
    let mut config = ClientConfig::default();
    config.locators = locators;
    config.timeout.resolve_timeout = Duration::from_secs_f64(cli.timeout);
    Ok(config)
}
