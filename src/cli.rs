use crate::config::Connector;
use crate::errors::EngineError;
use crate::managers::connector::ConnectorManager;
use crate::managers::engine::Engine;
use crate::services::auth::Credentials;
use crate::services::logger::Logger;
use crate::utils::suggest::choice_hint;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "connector-engine", version, about = "Run declarative connector operations")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute one operation and print its envelope.
    Run(RunArgs),
    /// List the operations a connector declares.
    Operations {
        #[arg(long, value_name = "PATH")]
        connector: PathBuf,
    },
    /// Show one operation's parameters and policies.
    Describe {
        #[arg(long, value_name = "PATH")]
        connector: PathBuf,
        #[arg(long, value_name = "NAME")]
        operation: String,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long, value_name = "PATH")]
    pub connector: PathBuf,
    #[arg(long, value_name = "NAME")]
    pub operation: String,
    #[arg(long, value_name = "JSON", default_value = "{}")]
    pub params: String,
    /// JSON object of credential values.
    #[arg(long, value_name = "PATH")]
    pub credentials: Option<PathBuf>,
    /// Read a credential from the environment, e.g. `api_key=PEOPLE_API_KEY`.
    #[arg(long = "credential-env", value_name = "NAME=ENV", value_parser = parse_credential_env)]
    pub credential_env: Vec<(String, String)>,
}

fn parse_credential_env(raw: &str) -> Result<(String, String), String> {
    let (name, var) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=ENV_VAR, got '{}'", raw))?;
    let (name, var) = (name.trim(), var.trim());
    if name.is_empty() || var.is_empty() {
        return Err(format!("expected NAME=ENV_VAR, got '{}'", raw));
    }
    Ok((name.to_string(), var.to_string()))
}

/// File values first, then environment mappings on top.
pub fn build_credentials<F>(
    file: Option<&Path>,
    env_pairs: &[(String, String)],
    lookup: F,
) -> Result<Credentials, EngineError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut credentials = match file {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|err| {
                EngineError::config(format!("failed to read {}: {}", path.display(), err))
            })?;
            let value: Value = serde_json::from_str(&raw).map_err(|err| {
                EngineError::config(format!("failed to parse {}: {}", path.display(), err))
            })?;
            Credentials::from_value(&value)?
        }
        None => Credentials::new(),
    };
    for (name, var) in env_pairs {
        let value = lookup(var).ok_or_else(|| {
            EngineError::config(format!("environment variable {} is not set", var))
        })?;
        credentials.insert(name.clone(), value);
    }
    Ok(credentials)
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}

/// Returns the process exit code.
pub async fn run() -> Result<i32, EngineError> {
    let cli = Cli::parse();
    let logger = Logger::new("connector-engine");
    match cli.command {
        Command::Run(args) => {
            let connector = Connector::load(&args.connector)?;
            let params: Value = serde_json::from_str(&args.params)
                .map_err(|err| EngineError::config(format!("--params is not valid JSON: {}", err)))?;
            let credentials = build_credentials(
                args.credentials.as_deref(),
                &args.credential_env,
                |var| std::env::var(var).ok(),
            )?;
            if connector.catalog.get(&args.operation).is_err() {
                let names: Vec<&str> = connector.catalog.names().collect();
                return Err(EngineError::config(format!(
                    "unknown operation '{}'{}",
                    args.operation,
                    choice_hint(&args.operation, &names)
                )));
            }
            let manager = ConnectorManager::new(Engine::with_reqwest(logger), connector, credentials);
            let envelope = manager.execute(&args.operation, params).await;
            print_json(&envelope.to_value());
            Ok(if envelope.is_success() { 0 } else { 1 })
        }
        Command::Operations { connector } => {
            let manager = ConnectorManager::new(
                Engine::with_reqwest(logger),
                Connector::load(&connector)?,
                Credentials::new(),
            );
            print_json(&manager.list_operations());
            Ok(0)
        }
        Command::Describe {
            connector,
            operation,
        } => {
            let connector = Connector::load(&connector)?;
            print_json(&connector.catalog.get(&operation)?.describe());
            Ok(0)
        }
    }
}
