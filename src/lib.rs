//! Declarative management of CenturyLink Cloud resources.
//!
//! The crate talks to the CLC v2 REST API and exposes one idempotent module
//! per resource kind: servers, groups, public IPs, snapshots, load balancers,
//! networks, firewall and alert policies, anti-affinity policies, metadata
//! and blueprint packages. Modules compare the requested state with what the
//! API reports, send only the requests needed to converge and optionally
//! wait for the asynchronous operations they queue.

pub mod api;
pub mod config;
pub mod group_tree;
pub mod modules;
pub mod operation;
pub mod test_support;

pub use api::{ClcApiError, ClcClient, DEFAULT_API_URL, HttpTransport, Session, Transport};
pub use config::{ClcConfig, ConfigError, Credentials};
pub use group_tree::{DEFAULT_GROUP, GroupLookupError, GroupNode, GroupTree};
pub use modules::{ModuleContext, ModuleError, ModuleKind, ModuleOutcome, run_module};
pub use operation::{
    OperationError, PollReport, PollSettings, wait_for_success, wait_on_completed_operations,
};
