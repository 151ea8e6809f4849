//! Prep phase: drive a target to minimum security and maximum money.

use hwgw_common::errors::DispatchError;
use hwgw_common::types::{HostId, OpKind, Origin, RoleHosts};
use hwgw_common::world::{Exec, LaunchSpec, Oracle};
use std::time::Duration;
use tracing::{debug, info};

const SECURITY_EPSILON: f64 = 1e-9;
const MONEY_EPSILON: f64 = 1e-6;

/// Whether `target` sits at baseline: minimum security, maximum money.
pub fn is_prepped<W: Oracle>(world: &W, target: &HostId) -> bool {
    world.security(target) <= world.min_security(target) + SECURITY_EPSILON
        && world.money(target) >= world.max_money(target) - MONEY_EPSILON
}

/// One prep round. Security first: while above the minimum, a single
/// maximal weaken and nothing else. Once security is down, the largest
/// grow whose countering weaken still fits runs alongside that weaken.
///
/// Returns whether any work was dispatched; `false` means no feasible
/// thread count existed this round and the caller should re-poll later.
pub async fn prep_round<W: Oracle + Exec>(
    world: &W,
    target: &HostId,
    hosts: &RoleHosts,
    origin: Origin,
) -> Result<bool, DispatchError> {
    let weaken_cost = world.ram_cost(OpKind::Weaken);
    let weaken_cores = world.host_cores(&hosts.weaken);

    if world.security(target) > world.min_security(target) + SECURITY_EPSILON {
        let threads = (world.host_free_ram(&hosts.weaken) / weaken_cost).floor() as u32;
        if threads == 0 {
            return Ok(false);
        }
        debug!(%target, threads, "prep: weakening");
        let handle = world.launch(LaunchSpec::new(
            hosts.weaken.clone(),
            OpKind::Weaken,
            target.clone(),
            threads,
            origin,
        ))?;
        let _ = handle.await;
        return Ok(true);
    }

    if world.money(target) >= world.max_money(target) - MONEY_EPSILON {
        return Ok(false);
    }

    let grow_budget =
        (world.host_free_ram(&hosts.grow) / world.ram_cost(OpKind::Grow)).floor() as u32;
    let weaken_budget = (world.host_free_ram(&hosts.weaken) / weaken_cost).floor() as u32;
    let per_thread_effect = world.weaken_effect(1, weaken_cores);

    // Largest grow whose security cost can still be cancelled in-budget.
    for grow in (1..=grow_budget).rev() {
        let delta = world.grow_security_delta(grow);
        let weaken = (delta / per_thread_effect).floor() as u32 + 1;
        if weaken > weaken_budget {
            continue;
        }
        debug!(%target, grow, weaken, "prep: growing");
        let grow_handle = world.launch(LaunchSpec::new(
            hosts.grow.clone(),
            OpKind::Grow,
            target.clone(),
            grow,
            origin,
        ))?;
        let weaken_handle = world.launch(LaunchSpec::new(
            hosts.weaken.clone(),
            OpKind::Weaken,
            target.clone(),
            weaken,
            origin,
        ))?;
        let _ = tokio::join!(grow_handle, weaken_handle);
        return Ok(true);
    }
    Ok(false)
}

/// Loop [`prep_round`] until the target reaches baseline, pausing when a
/// round could not dispatch anything.
pub async fn prep<W: Oracle + Exec>(
    world: &W,
    target: &HostId,
    hosts: &RoleHosts,
    origin: Origin,
    pause: Duration,
) -> Result<(), DispatchError> {
    while !is_prepped(world, target) {
        if !prep_round(world, target, hosts, origin).await? {
            tokio::time::sleep(pause).await;
        }
    }
    info!(%target, "prepped");
    Ok(())
}
