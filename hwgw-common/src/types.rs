//! Common types used across HWGW components.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unique identifier for a host in the fleet.
///
/// A host is both a potential worker (RAM capacity for operations) and a
/// potential target (money to extract); which role it plays is decided by
/// the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId(pub String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of a client process on the bus. Doubles as its reply-port number.
pub type Origin = u64;

/// The three remote operation kinds, plus the idle filler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Extract money from a target; raises its security.
    Hack,
    /// Restore a target's money; raises its security.
    Grow,
    /// Lower a target's security.
    Weaken,
    /// Idle filler that burns RAM for passive benefit.
    Share,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hack => write!(f, "hack"),
            Self::Grow => write!(f, "grow"),
            Self::Weaken => write!(f, "weaken"),
            Self::Share => write!(f, "share"),
        }
    }
}

/// Worker-host assignment for one batch: which host runs which phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleHosts {
    pub hack: HostId,
    pub grow: HostId,
    pub weaken: HostId,
}

impl RoleHosts {
    /// The hosts in reservation order (weaken, grow, hack).
    pub fn in_reserve_order(&self) -> [&HostId; 3] {
        [&self.weaken, &self.grow, &self.hack]
    }
}

/// Thread counts for one hack/grow/weaken triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadCounts {
    pub hack: u32,
    pub grow: u32,
    pub weaken: u32,
}

/// A computed batch plan. Immutable once computed; recompute when the player
/// level or the chosen target changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreadPlan {
    pub threads: ThreadCounts,
    /// Combined RAM cost of the triple, in GB.
    pub total_ram: f64,
    /// How many non-overlapping copies of this batch fit the host triple
    /// (min across the three roles).
    pub num_possible: u32,
}

/// Result of one successfully landed batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOutcome {
    /// Money extracted by the hack phase.
    pub money_gained: f64,
    /// Wall-clock time from dispatch to last landing.
    pub elapsed: Duration,
}

/// Scoring metadata for one candidate target, for a fixed host triple.
#[derive(Debug, Clone, Serialize)]
pub struct TargetScore {
    pub target: HostId,
    pub plan: ThreadPlan,
    /// Projected money per batch at baseline (stolen fraction x max money).
    pub money_per_batch: f64,
    /// Hack success chance at baseline.
    pub chance: f64,
    #[serde(with = "humantime_serde")]
    pub weaken_time: Duration,
    /// money * chance / (ram * weaken seconds) - yield per RAM-second.
    pub score: f64,
}
