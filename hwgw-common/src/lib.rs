//! Shared foundation for the HWGW workspace.
//!
//! Three concerns live here:
//! - core domain types, errors, and configuration loading
//! - the port-based RPC transport (bus, router, server, client)
//! - the world seams ([`Oracle`]/[`Exec`]) and the deterministic fleet
//!   simulator that implements them
//!
//! The batching engine (`hwgw`) and the reservation directory (`hwgwd`)
//! both build on this crate and never talk to the world except through the
//! seams defined here.

pub mod config;
pub mod errors;
pub mod rpc;
pub mod sim;
pub mod types;
pub mod world;

pub use config::HwgwConfig;
pub use errors::{DispatchError, RpcError};
pub use types::{BatchOutcome, HostId, OpKind, Origin, RoleHosts, TargetScore, ThreadCounts, ThreadPlan};
pub use world::{Exec, LaunchSpec, Oracle, TaskOutput};
