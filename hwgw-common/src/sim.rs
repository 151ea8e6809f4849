//! Deterministic fleet simulator.
//!
//! Implements [`Oracle`] and [`Exec`] over an in-memory world: hosts with
//! RAM and core capacity, targets with money/security dynamics, and a
//! player whose level rises as work completes. Operation effects are
//! game-shaped — weaken removes 0.05 security per thread, hack adds 0.002
//! and grow 0.004 per thread, cores grant a `1 + (cores-1)/16` bonus, and
//! grow/weaken run 3.2x/4x the hack duration — so timing and planning
//! behave like the real kernel while staying fully reproducible.
//!
//! Launched operations are tokio tasks. RAM is held through a drop guard,
//! so killed (aborted) work always releases its lease.

use crate::errors::DispatchError;
use crate::types::{HostId, OpKind, Origin};
use crate::world::{Exec, LaunchSpec, Oracle, TaskOutput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

const HACK_SEC_PER_THREAD: f64 = 0.002;
const GROW_SEC_PER_THREAD: f64 = 0.004;
const WEAKEN_SEC_PER_THREAD: f64 = 0.05;
const GROW_TIME_RATIO: f64 = 3.2;
const WEAKEN_TIME_RATIO: f64 = 4.0;
/// One share call occupies its threads for this long (unscaled).
const SHARE_SLICE: Duration = Duration::from_secs(1);

fn core_bonus(cores: u32) -> f64 {
    1.0 + f64::from(cores.saturating_sub(1)) / 16.0
}

/// Static RAM cost table, GB per thread (script base + operation cost).
fn ram_cost_table(op: OpKind) -> f64 {
    match op {
        OpKind::Hack => 1.7,
        OpKind::Grow => 1.75,
        OpKind::Weaken => 1.75,
        OpKind::Share => 4.0,
    }
}

/// Construction parameters for one simulated target.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub name: HostId,
    pub max_money: f64,
    pub min_security: f64,
    /// Starting security; baseline prep is needed when above the minimum.
    pub security: f64,
    /// Starting money.
    pub money: f64,
    /// Hack duration at baseline security (unscaled).
    pub base_hack: Duration,
    /// Fraction of max money stolen per hack thread at baseline.
    pub steal_per_thread: f64,
    /// Per-thread money growth rate (multiplicative).
    pub growth: f64,
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            name: HostId::new("target"),
            max_money: 1_000_000.0,
            min_security: 5.0,
            security: 5.0,
            money: 1_000_000.0,
            base_hack: Duration::from_secs(10),
            steal_per_thread: 0.002,
            growth: 0.04,
        }
    }
}

struct SimHost {
    ram: f64,
    cores: u32,
    used: f64,
    rooted: bool,
    procs: HashMap<u64, Option<AbortHandle>>,
}

struct SimTarget {
    money: f64,
    max_money: f64,
    security: f64,
    min_security: f64,
    base_hack: Duration,
    steal_per_thread: f64,
    growth: f64,
}

impl SimTarget {
    fn time_factor(&self) -> f64 {
        (self.security / self.min_security).max(1.0)
    }

    fn chance_at(security: f64) -> f64 {
        (1.2 * (100.0 - security) / 100.0).clamp(0.0, 1.0)
    }
}

struct SimState {
    hosts: HashMap<HostId, SimHost>,
    targets: HashMap<HostId, SimTarget>,
    player_level: f64,
    level_per_op: f64,
    alive: HashSet<Origin>,
    rng: StdRng,
    next_proc: u64,
    next_origin: Origin,
}

struct SimInner {
    state: Mutex<SimState>,
}

/// Handle to the simulated world. Clones share the same state.
#[derive(Clone)]
pub struct SimWorld {
    inner: Arc<SimInner>,
}

impl SimWorld {
    pub fn builder() -> SimWorldBuilder {
        SimWorldBuilder::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.inner.state.lock().expect("sim state poisoned")
    }

    /// Register a new simulated process and return its liveness handle.
    /// The process counts as alive until the handle is dropped or exited.
    pub fn spawn_origin(&self) -> OriginHandle {
        let mut state = self.state();
        let origin = state.next_origin;
        state.next_origin += 1;
        state.alive.insert(origin);
        OriginHandle {
            inner: self.inner.clone(),
            origin,
        }
    }

    /// Number of operations currently running on `host`.
    pub fn proc_count(&self, host: &HostId) -> usize {
        self.state()
            .hosts
            .get(host)
            .map(|h| h.procs.len())
            .unwrap_or(0)
    }

    fn apply_effect(
        state: &mut SimState,
        op: OpKind,
        target: Option<&HostId>,
        threads: u32,
        cores: u32,
    ) -> f64 {
        state.player_level += state.level_per_op;

        let Some(target) = target.and_then(|t| state.targets.get_mut(t)) else {
            return 0.0;
        };
        match op {
            OpKind::Hack => {
                let chance = SimTarget::chance_at(target.security);
                let roll: f64 = state.rng.r#gen();
                target.security = (target.security
                    + HACK_SEC_PER_THREAD * f64::from(threads))
                .min(100.0);
                if roll < chance {
                    let steal = target.steal_per_thread
                        * (target.min_security / target.security.max(target.min_security));
                    let stolen =
                        (target.max_money * steal * f64::from(threads)).min(target.money);
                    target.money -= stolen;
                    stolen
                } else {
                    0.0
                }
            }
            OpKind::Grow => {
                let rate = 1.0 + target.growth * core_bonus(cores);
                target.money =
                    (target.money.max(1.0) * rate.powi(threads as i32)).min(target.max_money);
                target.security = (target.security
                    + GROW_SEC_PER_THREAD * f64::from(threads))
                .min(100.0);
                0.0
            }
            OpKind::Weaken => {
                target.security = (target.security
                    - WEAKEN_SEC_PER_THREAD * f64::from(threads) * core_bonus(cores))
                .max(target.min_security);
                0.0
            }
            OpKind::Share => 0.0,
        }
    }
}

/// Liveness token for one simulated process.
pub struct OriginHandle {
    inner: Arc<SimInner>,
    origin: Origin,
}

impl OriginHandle {
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Mark the process as exited.
    pub fn exit(self) {}
}

impl Drop for OriginHandle {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().expect("sim state poisoned");
        state.alive.remove(&self.origin);
    }
}

/// Releases a host's RAM lease and process slot when the owning task
/// settles or is aborted (aborting drops the task's future).
struct RamLease {
    inner: Arc<SimInner>,
    host: HostId,
    amount: f64,
    proc_id: u64,
}

impl Drop for RamLease {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().expect("sim state poisoned");
        if let Some(host) = state.hosts.get_mut(&self.host) {
            host.procs.remove(&self.proc_id);
            host.used = (host.used - self.amount).max(0.0);
        }
    }
}

impl Oracle for SimWorld {
    fn hosts(&self) -> Vec<HostId> {
        let mut out: Vec<HostId> = self.state().hosts.keys().cloned().collect();
        out.sort();
        out
    }

    fn targets(&self) -> Vec<HostId> {
        let mut out: Vec<HostId> = self.state().targets.keys().cloned().collect();
        out.sort();
        out
    }

    fn has_root(&self, host: &HostId) -> bool {
        self.state().hosts.get(host).is_some_and(|h| h.rooted)
    }

    fn host_ram(&self, host: &HostId) -> f64 {
        self.state().hosts.get(host).map(|h| h.ram).unwrap_or(0.0)
    }

    fn host_free_ram(&self, host: &HostId) -> f64 {
        self.state()
            .hosts
            .get(host)
            .map(|h| (h.ram - h.used).max(0.0))
            .unwrap_or(0.0)
    }

    fn host_cores(&self, host: &HostId) -> u32 {
        self.state().hosts.get(host).map(|h| h.cores).unwrap_or(1)
    }

    fn player_level(&self) -> f64 {
        self.state().player_level
    }

    fn security(&self, target: &HostId) -> f64 {
        self.state()
            .targets
            .get(target)
            .map(|t| t.security)
            .unwrap_or(0.0)
    }

    fn min_security(&self, target: &HostId) -> f64 {
        self.state()
            .targets
            .get(target)
            .map(|t| t.min_security)
            .unwrap_or(0.0)
    }

    fn money(&self, target: &HostId) -> f64 {
        self.state()
            .targets
            .get(target)
            .map(|t| t.money)
            .unwrap_or(0.0)
    }

    fn max_money(&self, target: &HostId) -> f64 {
        self.state()
            .targets
            .get(target)
            .map(|t| t.max_money)
            .unwrap_or(0.0)
    }

    fn hack_time(&self, target: &HostId) -> Duration {
        self.state()
            .targets
            .get(target)
            .map(|t| t.base_hack.mul_f64(t.time_factor()))
            .unwrap_or(Duration::ZERO)
    }

    fn grow_time(&self, target: &HostId) -> Duration {
        self.hack_time(target).mul_f64(GROW_TIME_RATIO)
    }

    fn weaken_time(&self, target: &HostId) -> Duration {
        self.hack_time(target).mul_f64(WEAKEN_TIME_RATIO)
    }

    fn hack_fraction(&self, target: &HostId) -> f64 {
        self.state()
            .targets
            .get(target)
            .map(|t| t.steal_per_thread)
            .unwrap_or(0.0)
    }

    fn hack_chance(&self, target: &HostId) -> f64 {
        self.state()
            .targets
            .get(target)
            .map(|t| SimTarget::chance_at(t.min_security))
            .unwrap_or(0.0)
    }

    fn grow_threads_to_max(&self, target: &HostId, from_fraction: f64, cores: u32) -> u32 {
        let Some(growth) = self.state().targets.get(target).map(|t| t.growth) else {
            return 0;
        };
        let from = from_fraction.clamp(0.01, 1.0);
        if from >= 1.0 {
            return 0;
        }
        let rate = 1.0 + growth * core_bonus(cores);
        ((1.0 / from).ln() / rate.ln()).ceil() as u32
    }

    fn hack_security_delta(&self, threads: u32) -> f64 {
        HACK_SEC_PER_THREAD * f64::from(threads)
    }

    fn grow_security_delta(&self, threads: u32) -> f64 {
        GROW_SEC_PER_THREAD * f64::from(threads)
    }

    fn weaken_effect(&self, threads: u32, cores: u32) -> f64 {
        WEAKEN_SEC_PER_THREAD * f64::from(threads) * core_bonus(cores)
    }

    fn ram_cost(&self, op: OpKind) -> f64 {
        ram_cost_table(op)
    }
}

impl Exec for SimWorld {
    fn launch(&self, spec: LaunchSpec) -> Result<JoinHandle<TaskOutput>, DispatchError> {
        if spec.threads == 0 {
            return Err(DispatchError::ZeroThreads {
                host: spec.host,
                op: spec.op,
            });
        }

        let (duration, cores, needed, proc_id) = {
            let mut state = self.state();

            let duration = match spec.op {
                OpKind::Share => SHARE_SLICE,
                _ => {
                    let target = spec
                        .target
                        .as_ref()
                        .ok_or_else(|| DispatchError::UnknownTarget(HostId::new("")))?;
                    let t = state
                        .targets
                        .get(target)
                        .ok_or_else(|| DispatchError::UnknownTarget(target.clone()))?;
                    let base = t.base_hack.mul_f64(t.time_factor());
                    match spec.op {
                        OpKind::Hack => base,
                        OpKind::Grow => base.mul_f64(GROW_TIME_RATIO),
                        OpKind::Weaken => base.mul_f64(WEAKEN_TIME_RATIO),
                        OpKind::Share => unreachable!(),
                    }
                }
            };

            let proc_id = state.next_proc;
            state.next_proc += 1;
            let host = state
                .hosts
                .get_mut(&spec.host)
                .ok_or_else(|| DispatchError::UnknownHost(spec.host.clone()))?;
            if !host.rooted {
                return Err(DispatchError::UnknownHost(spec.host.clone()));
            }

            let needed = ram_cost_table(spec.op) * f64::from(spec.threads);
            let free = host.ram - host.used;
            if needed > free {
                return Err(DispatchError::InsufficientRam {
                    host: spec.host.clone(),
                    needed,
                    free,
                });
            }

            host.used += needed;
            host.procs.insert(proc_id, None);
            (duration, host.cores, needed, proc_id)
        };

        debug!(
            host = %spec.host,
            op = %spec.op,
            threads = spec.threads,
            ram = needed,
            delay_ms = spec.extra_delay.as_millis() as u64,
            "launching operation"
        );

        let inner = self.inner.clone();
        let lease = RamLease {
            inner: inner.clone(),
            host: spec.host.clone(),
            amount: needed,
            proc_id,
        };
        let total = spec.extra_delay + duration;
        let handle = tokio::spawn(async move {
            let _lease = lease;
            tokio::time::sleep(total).await;
            let mut state = inner.state.lock().expect("sim state poisoned");
            let gained = SimWorld::apply_effect(
                &mut state,
                spec.op,
                spec.target.as_ref(),
                spec.threads,
                cores,
            );
            TaskOutput {
                money_gained: gained,
            }
        });

        // The task may already have settled; only record the abort handle
        // while its slot is still registered.
        let abort = handle.abort_handle();
        {
            let mut state = self.state();
            if let Some(host) = state.hosts.get_mut(&spec.host) {
                if let Some(slot) = host.procs.get_mut(&proc_id) {
                    *slot = Some(abort);
                }
            }
        }

        Ok(handle)
    }

    fn kill_all(&self, host: &HostId) -> usize {
        let handles: Vec<AbortHandle> = {
            let mut state = self.state();
            match state.hosts.get_mut(host) {
                Some(h) => h.procs.values_mut().filter_map(Option::take).collect(),
                None => Vec::new(),
            }
        };
        let count = handles.len();
        for handle in handles {
            handle.abort();
        }
        count
    }

    fn host_idle(&self, host: &HostId) -> bool {
        self.state()
            .hosts
            .get(host)
            .map(|h| h.procs.is_empty())
            .unwrap_or(true)
    }

    fn process_alive(&self, origin: Origin) -> bool {
        self.state().alive.contains(&origin)
    }
}

/// Builder for [`SimWorld`].
#[derive(Default)]
pub struct SimWorldBuilder {
    hosts: Vec<(HostId, f64, u32, bool)>,
    targets: Vec<TargetSpec>,
    seed: u64,
    time_scale: f64,
    player_level: f64,
    level_per_op: f64,
}

impl SimWorldBuilder {
    /// RNG seed for hack-chance rolls.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Divide all operation durations by this factor.
    #[must_use]
    pub fn time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale;
        self
    }

    #[must_use]
    pub fn player_level(mut self, level: f64) -> Self {
        self.player_level = level;
        self
    }

    /// Level gained per completed operation (drives level-drift exits).
    #[must_use]
    pub fn level_per_op(mut self, gain: f64) -> Self {
        self.level_per_op = gain;
        self
    }

    #[must_use]
    pub fn host(mut self, name: impl Into<HostId>, ram: f64, cores: u32) -> Self {
        self.hosts.push((name.into(), ram, cores, true));
        self
    }

    /// A host visible in the fleet but without root access.
    #[must_use]
    pub fn unrooted_host(mut self, name: impl Into<HostId>, ram: f64, cores: u32) -> Self {
        self.hosts.push((name.into(), ram, cores, false));
        self
    }

    #[must_use]
    pub fn target(mut self, spec: TargetSpec) -> Self {
        self.targets.push(spec);
        self
    }

    pub fn build(self) -> SimWorld {
        let scale = if self.time_scale > 0.0 {
            self.time_scale
        } else {
            1.0
        };
        let hosts = self
            .hosts
            .into_iter()
            .map(|(name, ram, cores, rooted)| {
                (
                    name,
                    SimHost {
                        ram,
                        cores,
                        used: 0.0,
                        rooted,
                        procs: HashMap::new(),
                    },
                )
            })
            .collect();
        let targets = self
            .targets
            .into_iter()
            .map(|spec| {
                (
                    spec.name,
                    SimTarget {
                        money: spec.money,
                        max_money: spec.max_money,
                        security: spec.security.max(spec.min_security),
                        min_security: spec.min_security,
                        base_hack: spec.base_hack.div_f64(scale),
                        steal_per_thread: spec.steal_per_thread,
                        growth: spec.growth,
                    },
                )
            })
            .collect();
        SimWorld {
            inner: Arc::new(SimInner {
                state: Mutex::new(SimState {
                    hosts,
                    targets,
                    player_level: if self.player_level > 0.0 {
                        self.player_level
                    } else {
                        100.0
                    },
                    level_per_op: self.level_per_op,
                    alive: HashSet::new(),
                    rng: StdRng::seed_from_u64(self.seed),
                    next_proc: 1,
                    next_origin: 10_000,
                }),
            }),
        }
    }
}
