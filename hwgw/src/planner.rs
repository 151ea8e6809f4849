//! Thread planning for one hack/grow/weaken triple.
//!
//! Pure computation against the oracle: for each candidate hack-thread
//! count the minimal grow and weaken companions are derived, infeasible
//! candidates are rejected, and the survivor with the best yield per
//! RAM-second wins.

use hwgw_common::types::{HostId, OpKind, RoleHosts, ThreadCounts, ThreadPlan};
use hwgw_common::world::Oracle;
use std::collections::BTreeMap;

/// Reject a candidate when countering its security cost would take more
/// weaken threads than this.
const WEAKEN_THREAD_BOUND: u32 = 1000;

/// Minimal thread count whose weaken effect strictly exceeds `delta`.
/// `None` when the bound is blown.
fn weaken_threads_for<W: Oracle>(world: &W, delta: f64, cores: u32) -> Option<u32> {
    let per_thread = world.weaken_effect(1, cores);
    if per_thread <= 0.0 {
        return None;
    }
    let mut threads = (delta / per_thread).floor() as u32 + 1;
    // Floor arithmetic can land exactly on the delta; strictly exceed it.
    if world.weaken_effect(threads, cores) <= delta {
        threads += 1;
    }
    (threads <= WEAKEN_THREAD_BOUND).then_some(threads)
}

/// Per-host RAM cost of a triple, summing the roles each host carries.
fn role_costs<'a, W: Oracle>(
    world: &W,
    threads: &ThreadCounts,
    hosts: &'a RoleHosts,
) -> BTreeMap<&'a HostId, f64> {
    let mut costs: BTreeMap<&HostId, f64> = BTreeMap::new();
    for (host, op, count) in [
        (&hosts.hack, OpKind::Hack, threads.hack),
        (&hosts.grow, OpKind::Grow, threads.grow),
        (&hosts.weaken, OpKind::Weaken, threads.weaken),
    ] {
        *costs.entry(host).or_insert(0.0) += world.ram_cost(op) * f64::from(count);
    }
    costs
}

/// Whether the triple fits each host's total capacity, strictly.
pub fn fits_capacity<W: Oracle>(world: &W, threads: &ThreadCounts, hosts: &RoleHosts) -> bool {
    role_costs(world, threads, hosts)
        .iter()
        .all(|(host, cost)| *cost < world.host_ram(host))
}

/// Whether the triple fits each host's currently free RAM, strictly.
/// Used at admission time, after other batches have taken their share.
pub fn fits_free<W: Oracle>(world: &W, threads: &ThreadCounts, hosts: &RoleHosts) -> bool {
    role_costs(world, threads, hosts)
        .iter()
        .all(|(host, cost)| *cost < world.host_free_ram(host))
}

/// Compute the best thread plan for `target` on the given host triple, with
/// hack threads capped at `cap`. `None` when no candidate fits.
///
/// Candidates are scored as stolen fraction per RAM-second; on a tie the
/// lower hack-thread count is kept.
pub fn calculate_plan<W: Oracle>(
    world: &W,
    target: &HostId,
    hosts: &RoleHosts,
    cap: u32,
) -> Option<ThreadPlan> {
    let fraction = world.hack_fraction(target);
    if fraction <= 0.0 {
        return None;
    }
    let hack_budget = (world.host_ram(&hosts.hack) / world.ram_cost(OpKind::Hack)).floor() as u32;
    let weaken_secs = world.weaken_time(target).as_secs_f64();
    let grow_cores = world.host_cores(&hosts.grow);
    let weaken_cores = world.host_cores(&hosts.weaken);

    let mut best: Option<(f64, ThreadPlan)> = None;
    for hack in 1..=cap.min(hack_budget) {
        let stolen = fraction * f64::from(hack);
        if stolen >= 1.0 {
            break;
        }

        // One extra grow thread covers rounding in the restore estimate.
        let grow = world.grow_threads_to_max(target, 1.0 - stolen, grow_cores) + 1;
        let security_delta =
            world.hack_security_delta(hack) + world.grow_security_delta(grow);
        let Some(weaken) = weaken_threads_for(world, security_delta, weaken_cores) else {
            continue;
        };

        let threads = ThreadCounts { hack, grow, weaken };
        let costs = role_costs(world, &threads, hosts);
        if !costs
            .iter()
            .all(|(host, cost)| *cost < world.host_ram(host))
        {
            continue;
        }

        let total_ram: f64 = costs.values().sum();
        let num_possible = costs
            .iter()
            .map(|(host, cost)| (world.host_ram(host) / cost).floor() as u32)
            .min()
            .unwrap_or(0);
        let score = stolen / (total_ram * weaken_secs);

        if best.as_ref().is_none_or(|(top, _)| score > *top) {
            best = Some((
                score,
                ThreadPlan {
                    threads,
                    total_ram,
                    num_possible,
                },
            ));
        }
    }
    best.map(|(_, plan)| plan)
}
