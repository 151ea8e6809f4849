//! Work-cycle orchestration.
//!
//! One cycle: reserve a host triple through the directory, pick the best
//! target, prep it, then admit timed batches through a sliding window
//! until drift or desync winds the cycle down. Reservations are always
//! released before the cycle returns.

use crate::batch::run_batch;
use crate::planner::{calculate_plan, fits_free};
use crate::prepper::{is_prepped, prep};
use crate::targets::best_target;
use hwgw_common::config::{HwgwConfig, PipelineConfig};
use hwgw_common::errors::{DispatchError, RpcError};
use hwgw_common::types::{BatchOutcome, HostId, RoleHosts, ThreadPlan};
use hwgw_common::world::{Exec, Oracle};
use hwgwd::DirectoryClient;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Why a cycle ended where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Batches ran; see the report counters.
    Completed,
    /// Fewer than three hosts could be reserved.
    NoHosts,
    /// No target had a feasible plan.
    NoTarget,
    /// The chosen target's plan vanished after prep.
    NoPlan,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub target: Option<HostId>,
    pub batches_landed: usize,
    pub money_gained: f64,
    pub desynced: bool,
}

impl CycleReport {
    fn aborted(outcome: CycleOutcome) -> Self {
        Self {
            outcome,
            target: None,
            batches_landed: 0,
            money_gained: 0.0,
            desynced: false,
        }
    }
}

#[derive(Default)]
struct CycleStats {
    landed: usize,
    money: f64,
    desync: bool,
}

impl CycleStats {
    fn settle(&mut self, result: Result<Result<Option<BatchOutcome>, DispatchError>, JoinError>) {
        match result {
            Ok(Ok(Some(outcome))) => {
                self.landed += 1;
                self.money += outcome.money_gained;
            }
            Ok(Ok(None)) => {
                warn!("batch failed to land in order");
                self.desync = true;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "batch dispatch failed");
                self.desync = true;
            }
            Err(e) => {
                warn!(error = %e, "batch task died");
                self.desync = true;
            }
        }
    }
}

pub struct CyclePipeline<W> {
    world: Arc<W>,
    directory: DirectoryClient,
    cfg: PipelineConfig,
    excluded: BTreeSet<HostId>,
}

impl<W: Oracle + Exec + 'static> CyclePipeline<W> {
    pub fn new(world: Arc<W>, directory: DirectoryClient, cfg: &HwgwConfig) -> Self {
        Self {
            world,
            directory,
            cfg: cfg.pipeline.clone(),
            excluded: cfg.directory.excluded_hosts.iter().cloned().collect(),
        }
    }

    /// The three highest-RAM lendable hosts, largest first as hack, grow,
    /// weaken. `None` when fewer than three are available.
    async fn select_hosts(&self) -> Result<Option<RoleHosts>, PipelineError> {
        let blocked: BTreeSet<HostId> = self.directory.blocked().await?.into_iter().collect();
        let mut candidates: Vec<HostId> = self
            .world
            .hosts()
            .into_iter()
            .filter(|h| {
                !self.excluded.contains(h)
                    && !blocked.contains(h)
                    && self.world.has_root(h)
                    && self.world.host_ram(h) > 0.0
            })
            .collect();
        candidates.sort_by(|a, b| {
            self.world
                .host_ram(b)
                .total_cmp(&self.world.host_ram(a))
                .then_with(|| a.cmp(b))
        });

        let mut top = candidates.into_iter();
        match (top.next(), top.next(), top.next()) {
            (Some(hack), Some(grow), Some(weaken)) => Ok(Some(RoleHosts { weaken, grow, hack })),
            _ => Ok(None),
        }
    }

    /// Run one full work cycle. Reservations taken here are released on
    /// every path out.
    pub async fn run_cycle(&self) -> Result<CycleReport, PipelineError> {
        let Some(hosts) = self.select_hosts().await? else {
            info!("fewer than three hosts available");
            return Ok(CycleReport::aborted(CycleOutcome::NoHosts));
        };
        if !self.directory.reserve_all(&hosts.in_reserve_order()).await? {
            info!("reservation contention, retrying next cycle");
            return Ok(CycleReport::aborted(CycleOutcome::NoHosts));
        }

        let result = self.batch_cycle(&hosts).await;
        let released = self.directory.drop_all(&hosts.in_reserve_order()).await;
        let report = result?;
        released?;
        Ok(report)
    }

    async fn batch_cycle(&self, hosts: &RoleHosts) -> Result<CycleReport, PipelineError> {
        let origin = self.directory.origin();
        let Some(score) = best_target(self.world.as_ref(), hosts, self.cfg.hack_thread_cap)
        else {
            warn!("no plannable target");
            return Ok(CycleReport::aborted(CycleOutcome::NoTarget));
        };
        let target = score.target.clone();
        info!(
            %target,
            score = score.score,
            chance = score.chance,
            "target selected"
        );

        prep(
            self.world.as_ref(),
            &target,
            hosts,
            origin,
            self.cfg.cycle_pause,
        )
        .await?;

        // Prep takes time; the plan is recomputed against post-prep state.
        let Some(plan) =
            calculate_plan(self.world.as_ref(), &target, hosts, self.cfg.hack_thread_cap)
        else {
            warn!(%target, "plan became infeasible after prep");
            return Ok(CycleReport::aborted(CycleOutcome::NoPlan));
        };

        let stats = self.admission_loop(&target, hosts, &plan, origin).await;
        info!(
            %target,
            landed = stats.landed,
            money = stats.money,
            desynced = stats.desync,
            "cycle wound down"
        );
        Ok(CycleReport {
            outcome: CycleOutcome::Completed,
            target: Some(target),
            batches_landed: stats.landed,
            money_gained: stats.money,
            desynced: stats.desync,
        })
    }

    async fn admission_loop(
        &self,
        target: &HostId,
        hosts: &RoleHosts,
        plan: &ThreadPlan,
        origin: u64,
    ) -> CycleStats {
        let baseline_level = self.world.player_level();
        let num_possible = plan.num_possible.max(1);
        let offset = std::cmp::max(
            self.world.weaken_time(target) / num_possible,
            self.cfg.min_offset,
        );
        let window = self.cfg.max_in_flight.min(num_possible as usize);
        info!(
            threads = ?plan.threads,
            num_possible,
            window,
            offset_ms = offset.as_millis() as u64,
            "admitting batches"
        );

        let mut in_flight: VecDeque<JoinHandle<Result<Option<BatchOutcome>, DispatchError>>> =
            VecDeque::new();
        let mut stats = CycleStats::default();

        loop {
            // Harvest whatever already settled at the front of the window.
            while in_flight.front().is_some_and(JoinHandle::is_finished) {
                let Some(handle) = in_flight.pop_front() else {
                    break;
                };
                stats.settle(handle.await);
            }
            if stats.desync {
                break;
            }

            let drift = self.world.player_level() - baseline_level;
            if drift > self.cfg.level_tolerance {
                info!(drift, "player level drifted, winding down");
                break;
            }
            if !self.cfg.continuous && !is_prepped(self.world.as_ref(), target) {
                warn!(%target, "target off baseline mid-cycle");
                stats.desync = true;
                break;
            }

            if in_flight.len() < window && fits_free(self.world.as_ref(), &plan.threads, hosts) {
                let world = self.world.clone();
                let target = target.clone();
                let hosts = hosts.clone();
                let plan = *plan;
                in_flight.push_back(tokio::spawn(async move {
                    run_batch(world.as_ref(), &target, &hosts, &plan, origin).await
                }));
                tokio::time::sleep(offset).await;
            } else if let Some(oldest) = in_flight.pop_front() {
                stats.settle(oldest.await);
            } else {
                // Window empty but RAM still leased out; re-poll shortly.
                tokio::time::sleep(offset).await;
            }
        }

        while let Some(handle) = in_flight.pop_front() {
            stats.settle(handle.await);
        }
        stats
    }

    /// Run cycles back to back, `cycles` many or forever on `None`.
    pub async fn run(&self, cycles: Option<u32>) -> Result<(), PipelineError> {
        let mut completed = 0u32;
        loop {
            self.run_cycle().await?;
            completed += 1;
            if cycles.is_some_and(|c| completed >= c) {
                return Ok(());
            }
            tokio::time::sleep(self.cfg.cycle_pause).await;
        }
    }
}
