//! Command-line interface definitions for the `clc` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};

/// Top-level CLI for the `clc` binary.
///
/// Module arguments are a JSON object read from `--args` or standard input.
/// The result is printed to standard output as a JSON object carrying at
/// least `changed`, or `failed` and `msg` when the run fails.
#[derive(Debug, Parser)]
#[command(
    name = "clc",
    version,
    about = "Declaratively manage CenturyLink Cloud resources through the v2 API"
)]
pub(crate) struct Cli {
    /// Report what would change without sending mutating requests.
    #[arg(long)]
    pub(crate) check: bool,
    /// Read module arguments from a JSON file instead of standard input.
    #[arg(long, value_name = "FILE")]
    pub(crate) args: Option<Utf8PathBuf>,
    /// Module to run.
    #[arg(value_enum)]
    pub(crate) module: ModuleName,
}

/// Module names accepted on the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub(crate) enum ModuleName {
    /// Anti-affinity policies.
    AaPolicy,
    /// Alert policies.
    AlertPolicy,
    /// Run a blueprint package on servers.
    BlueprintPackage,
    /// Cross-account firewall policies.
    FirewallPolicy,
    /// Server groups.
    Group,
    /// Read-only group details.
    GroupFacts,
    /// Shared load balancers, pools and nodes.
    #[value(name = "loadbalancer")]
    LoadBalancer,
    /// Metadata records attached to a resource.
    Metadata,
    /// Change CPU, memory and policies of existing servers.
    ModifyServer,
    /// Claim, update and release networks.
    Network,
    /// Public IP addresses on servers.
    #[value(name = "publicip")]
    PublicIp,
    /// Create, delete, start and stop servers.
    Server,
    /// Read-only server details.
    ServerFacts,
    /// Server snapshots.
    ServerSnapshot,
}
