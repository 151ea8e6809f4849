//! One timed hack/grow/weaken batch.
//!
//! All three operations are dispatched together with delays chosen so they
//! land back to back: hack first, grow next, weaken last. Each landing
//! appends its phase tag to a shared log; the batch counts only if the log
//! reads exactly hack, grow, weaken. Anything else is a failure reported
//! as `None`, the pipeline's desync signal.

use hwgw_common::errors::DispatchError;
use hwgw_common::types::{BatchOutcome, HostId, OpKind, Origin, RoleHosts, ThreadPlan};
use hwgw_common::world::{Exec, LaunchSpec, Oracle, TaskOutput};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const HACK_TAG: u8 = 0;
const GROW_TAG: u8 = 1;
const WEAKEN_TAG: u8 = 2;

/// Gap between consecutive landings within one batch. Keeps the three
/// phases strictly ordered while staying well under the admission offset.
const PHASE_GAP: Duration = Duration::from_millis(20);

/// Dispatch delays for one batch against `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTiming {
    pub weaken_time: Duration,
    pub hack_delay: Duration,
    pub grow_delay: Duration,
}

/// Delays lining all three landings up at the weaken horizon: each phase's
/// delay plus its duration equals the weaken duration (plus its slot in
/// the phase gap).
pub fn batch_timing<W: Oracle>(world: &W, target: &HostId) -> BatchTiming {
    let weaken_time = world.weaken_time(target);
    BatchTiming {
        weaken_time,
        hack_delay: weaken_time.saturating_sub(world.hack_time(target)),
        grow_delay: weaken_time.saturating_sub(world.grow_time(target)) + PHASE_GAP,
    }
}

type PhaseLog = Arc<Mutex<Vec<u8>>>;

fn tag_on_landing(
    handle: JoinHandle<TaskOutput>,
    log: PhaseLog,
    tag: u8,
) -> JoinHandle<Option<TaskOutput>> {
    tokio::spawn(async move {
        match handle.await {
            Ok(out) => {
                log.lock().expect("phase log poisoned").push(tag);
                Some(out)
            }
            // Killed mid-flight: the phase never reports.
            Err(_) => None,
        }
    })
}

/// Run one batch to completion.
///
/// `Ok(Some(..))` when all three phases land in order; `Ok(None)` when the
/// landing log is wrong (missing or out-of-order phases). Dispatch
/// failures surface as errors before anything launches fully.
pub async fn run_batch<W: Oracle + Exec>(
    world: &W,
    target: &HostId,
    hosts: &RoleHosts,
    plan: &ThreadPlan,
    origin: Origin,
) -> Result<Option<BatchOutcome>, DispatchError> {
    let timing = batch_timing(world, target);
    let start = tokio::time::Instant::now();
    let log: PhaseLog = Arc::new(Mutex::new(Vec::with_capacity(3)));

    let weaken = world.launch(
        LaunchSpec::new(
            hosts.weaken.clone(),
            OpKind::Weaken,
            target.clone(),
            plan.threads.weaken,
            origin,
        )
        .with_delay(2 * PHASE_GAP),
    )?;
    let grow = world.launch(
        LaunchSpec::new(
            hosts.grow.clone(),
            OpKind::Grow,
            target.clone(),
            plan.threads.grow,
            origin,
        )
        .with_delay(timing.grow_delay),
    )?;
    let hack = world.launch(
        LaunchSpec::new(
            hosts.hack.clone(),
            OpKind::Hack,
            target.clone(),
            plan.threads.hack,
            origin,
        )
        .with_delay(timing.hack_delay),
    )?;

    let (hack_out, _grow_out, _weaken_out) = tokio::join!(
        tag_on_landing(hack, log.clone(), HACK_TAG),
        tag_on_landing(grow, log.clone(), GROW_TAG),
        tag_on_landing(weaken, log.clone(), WEAKEN_TAG),
    );
    let hack_out = hack_out.ok().flatten();

    let order = log.lock().expect("phase log poisoned").clone();
    if order != [HACK_TAG, GROW_TAG, WEAKEN_TAG] {
        warn!(%target, ?order, "batch landed out of order");
        return Ok(None);
    }
    let money_gained = hack_out.map(|out| out.money_gained).unwrap_or(0.0);
    let elapsed = start.elapsed();
    debug!(%target, money_gained, ?elapsed, "batch landed");
    Ok(Some(BatchOutcome {
        money_gained,
        elapsed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwgw_common::sim::{SimWorld, TargetSpec};
    use hwgw_common::types::ThreadCounts;

    fn triple() -> RoleHosts {
        RoleHosts {
            hack: "alpha".into(),
            grow: "beta".into(),
            weaken: "gamma".into(),
        }
    }

    fn world() -> SimWorld {
        SimWorld::builder()
            .host("alpha", 128.0, 1)
            .host("beta", 128.0, 1)
            .host("gamma", 128.0, 1)
            .target(TargetSpec {
                name: "n00dles".into(),
                max_money: 1_000_000.0,
                min_security: 5.0,
                security: 5.0,
                money: 1_000_000.0,
                base_hack: Duration::from_secs(2),
                steal_per_thread: 0.002,
                growth: 0.05,
            })
            .build()
    }

    fn plan() -> ThreadPlan {
        ThreadPlan {
            threads: ThreadCounts {
                hack: 10,
                grow: 2,
                weaken: 1,
            },
            total_ram: 10.0 * 1.7 + 3.0 * 1.75,
            num_possible: 4,
        }
    }

    #[test]
    fn test_landings_synchronize_at_the_weaken_horizon() {
        let w = world();
        let target = HostId::new("n00dles");
        let t = batch_timing(&w, &target);

        assert_eq!(t.hack_delay + w.hack_time(&target), t.weaken_time);
        assert_eq!(
            t.grow_delay + w.grow_time(&target),
            t.weaken_time + PHASE_GAP
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_lands_in_order_and_reports_money() {
        let w = world();
        let target = HostId::new("n00dles");
        let outcome = run_batch(&w, &target, &triple(), &plan(), 1)
            .await
            .unwrap()
            .expect("batch should land");

        assert!(outcome.money_gained > 0.0);
        // Everything lands at the weaken horizon.
        assert!(outcome.elapsed >= w.weaken_time(&target));
        // The weaken strictly out-cancels the batch; baseline is restored.
        assert!(w.security(&target) <= 5.0 + 1e-9);
        assert_eq!(w.money(&target), 1_000_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_killed_grow_phase_fails_the_batch() {
        let w = world();
        let target = HostId::new("n00dles");
        let hosts = triple();
        let plan = plan();

        let batch = run_batch(&w, &target, &hosts, &plan, 1);
        let saboteur = async {
            // Let all three dispatch, then kill the grow host's work.
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(w.kill_all(&"beta".into()), 1);
            std::future::pending::<()>().await
        };
        let outcome = tokio::select! {
            out = batch => out.unwrap(),
            () = saboteur => unreachable!(),
        };
        assert!(outcome.is_none(), "missing grow report fails the batch");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_failure_surfaces_as_error() {
        let w = world();
        let target = HostId::new("n00dles");
        let mut big = plan();
        big.threads.hack = 200;

        let err = run_batch(&w, &target, &triple(), &big, 1).await.unwrap_err();
        assert!(matches!(err, DispatchError::InsufficientRam { .. }));
    }
}
