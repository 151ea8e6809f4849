//! Target selection: score every candidate for a fixed host triple.

use crate::planner::calculate_plan;
use hwgw_common::types::{RoleHosts, TargetScore};
use hwgw_common::world::Oracle;
use tracing::debug;

/// Score every plannable target for the given host triple.
///
/// The score is projected money per batch, weighted by hack chance, per
/// RAM-second: `money * chance / (ram * weaken_secs)`. Targets with no
/// feasible plan are skipped. Output keeps the oracle's target order.
pub fn score_targets<W: Oracle>(world: &W, hosts: &RoleHosts, cap: u32) -> Vec<TargetScore> {
    let mut scores = Vec::new();
    for target in world.targets() {
        if world.max_money(&target) <= 0.0 {
            continue;
        }
        let Some(plan) = calculate_plan(world, &target, hosts, cap) else {
            debug!(%target, "no feasible plan, skipping");
            continue;
        };
        let stolen = world.hack_fraction(&target) * f64::from(plan.threads.hack);
        let money_per_batch = stolen * world.max_money(&target);
        let chance = world.hack_chance(&target);
        let weaken_time = world.weaken_time(&target);
        let score = money_per_batch * chance / (plan.total_ram * weaken_time.as_secs_f64());
        scores.push(TargetScore {
            target,
            plan,
            money_per_batch,
            chance,
            weaken_time,
            score,
        });
    }
    scores
}

/// The best-scoring target, ties keeping the earliest candidate.
pub fn best_target<W: Oracle>(world: &W, hosts: &RoleHosts, cap: u32) -> Option<TargetScore> {
    let mut best: Option<TargetScore> = None;
    for candidate in score_targets(world, hosts, cap) {
        if best.as_ref().is_none_or(|top| candidate.score > top.score) {
            best = Some(candidate);
        }
    }
    best
}
