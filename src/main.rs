//! Binary entry point for the `clc` CLI.
//!
//! The binary runs one module per invocation: it reads a JSON object of
//! module arguments, authenticates against the CLC v2 API and prints the
//! module result as a single JSON object on standard output.

use std::io::{self, Read, Write};
use std::process;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use clc_modules::{
    ClcApiError, ClcClient, ClcConfig, ConfigError, HttpTransport, ModuleContext, ModuleError,
    ModuleKind, run_module,
};

mod cli;

use cli::{Cli, ModuleName};

/// Argument key Ansible uses to request check mode.
const CHECK_MODE_KEY: &str = "_ansible_check_mode";
/// Prefix of the bookkeeping keys Ansible adds to module arguments.
const INTERNAL_KEY_PREFIX: &str = "_ansible_";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to read module arguments from {origin}: {message}")]
    ReadArgs { origin: String, message: String },
    #[error("module arguments must be a JSON object: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Api(#[from] ClcApiError),
    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// Module arguments with the Ansible bookkeeping keys removed.
#[derive(Debug, PartialEq)]
struct ModuleArgs {
    check_mode: bool,
    params: Value,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let (result, exit_code) = match dispatch(&cli).await {
        Ok(result) => (result, 0),
        Err(err) => (failure(&err), 1),
    };

    write_json(io::stdout(), &result);
    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: &Cli) -> Result<Value, CliError> {
    let raw = match cli.args.as_deref() {
        Some(path) => read_args_file(path)?,
        None => read_stdin()?,
    };
    let args = parse_args(&raw)?;

    let config = ClcConfig::load_without_cli_args()?;
    config.validate()?;
    let client = ClcClient::connect(HttpTransport::new()?, &config).await?;
    let ctx = ModuleContext::new(client)
        .with_check_mode(cli.check || args.check_mode)
        .with_poll_settings(config.poll_settings());

    let outcome = run_module(&ctx, module_kind(cli.module), args.params).await?;
    Ok(outcome.to_json())
}

const fn module_kind(name: ModuleName) -> ModuleKind {
    match name {
        ModuleName::AaPolicy => ModuleKind::AaPolicy,
        ModuleName::AlertPolicy => ModuleKind::AlertPolicy,
        ModuleName::BlueprintPackage => ModuleKind::BlueprintPackage,
        ModuleName::FirewallPolicy => ModuleKind::FirewallPolicy,
        ModuleName::Group => ModuleKind::Group,
        ModuleName::GroupFacts => ModuleKind::GroupFacts,
        ModuleName::LoadBalancer => ModuleKind::LoadBalancer,
        ModuleName::Metadata => ModuleKind::Metadata,
        ModuleName::ModifyServer => ModuleKind::ModifyServer,
        ModuleName::Network => ModuleKind::Network,
        ModuleName::PublicIp => ModuleKind::PublicIp,
        ModuleName::Server => ModuleKind::Server,
        ModuleName::ServerFacts => ModuleKind::ServerFacts,
        ModuleName::ServerSnapshot => ModuleKind::ServerSnapshot,
    }
}

fn read_args_file(path: &Utf8Path) -> Result<String, CliError> {
    let read_error = |message: String| CliError::ReadArgs {
        origin: path.to_string(),
        message,
    };
    let (dir_path, file_name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        (_, Some(name)) => (Utf8Path::new("."), name),
        (_, None) => return Err(read_error(String::from("path has no file name"))),
    };

    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
        .map_err(|err| read_error(err.to_string()))?;
    debug!(%path, "reading module arguments");
    dir.read_to_string(file_name)
        .map_err(|err| read_error(err.to_string()))
}

fn read_stdin() -> Result<String, CliError> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|err| CliError::ReadArgs {
            origin: String::from("standard input"),
            message: err.to_string(),
        })?;
    Ok(raw)
}

/// Parses module arguments. Empty input means no arguments.
fn parse_args(raw: &str) -> Result<ModuleArgs, CliError> {
    if raw.trim().is_empty() {
        return Ok(ModuleArgs {
            check_mode: false,
            params: Value::Object(Map::new()),
        });
    }

    let value: Value =
        serde_json::from_str(raw).map_err(|err| CliError::InvalidArgs(err.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(CliError::InvalidArgs(String::from(
            "expected an object at the top level",
        )));
    };

    let check_mode = object
        .get(CHECK_MODE_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    object.retain(|key, _| !key.starts_with(INTERNAL_KEY_PREFIX));

    Ok(ModuleArgs {
        check_mode,
        params: Value::Object(object),
    })
}

fn failure(err: &CliError) -> Value {
    json!({
        "failed": true,
        "changed": false,
        "msg": err.to_string(),
    })
}

fn write_json(mut target: impl Write, value: &Value) {
    writeln!(target, "{value}").ok();
}
