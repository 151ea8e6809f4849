//! Collaborator seams: the deterministic oracle and the remote executor.
//!
//! The core never mutates fleet state directly. It reads projections
//! through [`Oracle`] and schedules work through [`Exec`]; everything else
//! (the real game kernel, or the simulator in this workspace) lives behind
//! these traits.

use crate::errors::DispatchError;
use crate::types::{HostId, OpKind, Origin};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Read-only queries over fleet, target, and player state.
///
/// All answers are deterministic functions of the current world state; the
/// oracle carries no scheduling authority.
pub trait Oracle: Send + Sync {
    /// Every known host (worker candidates).
    fn hosts(&self) -> Vec<HostId>;
    /// Every money-bearing host (target candidates).
    fn targets(&self) -> Vec<HostId>;
    fn has_root(&self, host: &HostId) -> bool;
    /// Total RAM capacity in GB.
    fn host_ram(&self, host: &HostId) -> f64;
    /// Capacity not currently leased to running work.
    fn host_free_ram(&self, host: &HostId) -> f64;
    fn host_cores(&self, host: &HostId) -> u32;
    fn player_level(&self) -> f64;

    fn security(&self, target: &HostId) -> f64;
    fn min_security(&self, target: &HostId) -> f64;
    fn money(&self, target: &HostId) -> f64;
    fn max_money(&self, target: &HostId) -> f64;

    /// Durations at the target's current security level.
    fn hack_time(&self, target: &HostId) -> Duration;
    fn grow_time(&self, target: &HostId) -> Duration;
    fn weaken_time(&self, target: &HostId) -> Duration;

    /// Fraction of max money stolen per hack thread, at baseline security.
    fn hack_fraction(&self, target: &HostId) -> f64;
    /// Hack success chance at baseline security.
    fn hack_chance(&self, target: &HostId) -> f64;
    /// Minimum grow threads restoring money to max from `from_fraction` of
    /// max, on a host with `cores` cores.
    fn grow_threads_to_max(&self, target: &HostId, from_fraction: f64, cores: u32) -> u32;

    fn hack_security_delta(&self, threads: u32) -> f64;
    fn grow_security_delta(&self, threads: u32) -> f64;
    fn weaken_effect(&self, threads: u32, cores: u32) -> f64;

    /// Static RAM cost table: GB per thread for one operation kind.
    fn ram_cost(&self, op: OpKind) -> f64;
}

/// One remote operation to schedule on a worker host.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub host: HostId,
    pub op: OpKind,
    /// Required for hack/grow/weaken; ignored for share.
    pub target: Option<HostId>,
    pub threads: u32,
    /// Additional delay before the operation starts working, used to line
    /// up landing times within a batch.
    pub extra_delay: Duration,
    /// The dispatching process, for host-level accounting.
    pub origin: Origin,
}

impl LaunchSpec {
    pub fn new(host: HostId, op: OpKind, target: HostId, threads: u32, origin: Origin) -> Self {
        Self {
            host,
            op,
            target: Some(target),
            threads,
            extra_delay: Duration::ZERO,
            origin,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.extra_delay = delay;
        self
    }
}

/// Result reported by a settled remote operation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaskOutput {
    /// Money extracted; zero for everything but a successful hack.
    pub money_gained: f64,
}

/// Schedules remote operations and answers process-level questions.
pub trait Exec: Send + Sync {
    /// Dispatch an operation. Fails immediately when the host cannot take
    /// it (unknown, no root, RAM shortfall); otherwise returns a handle
    /// resolving when the operation lands. Aborting the handle kills the
    /// remote task and releases its RAM.
    fn launch(&self, spec: LaunchSpec) -> Result<JoinHandle<TaskOutput>, DispatchError>;

    /// Kill every running operation on `host`. Returns the number killed.
    fn kill_all(&self, host: &HostId) -> usize;

    /// Whether `host` currently runs no operations.
    fn host_idle(&self, host: &HostId) -> bool;

    /// Whether the process identified by `origin` is still alive.
    fn process_alive(&self, origin: Origin) -> bool;
}
