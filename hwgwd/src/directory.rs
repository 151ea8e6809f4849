//! Reservation directory: exclusive host ownership between pipelines.
//!
//! Each client process (origin) owns a set of hosts. A host belongs to at
//! most one live owner at a time; everything unowned is handed to the
//! share fillers. Owners that die without dropping their hosts are purged
//! in two phases, so in-flight operations they dispatched can settle
//! before the hosts are recycled.

use crate::filler::FillerPool;
use hwgw_common::config::DirectoryConfig;
use hwgw_common::rpc::{ProcedureDef, Router};
use hwgw_common::types::{HostId, Origin};
use hwgw_common::world::{Exec, Oracle};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

struct State {
    owners: HashMap<Origin, BTreeSet<HostId>>,
    /// Dead owners spotted by the last maintenance pass. Their hosts stay
    /// blocked until every one of them is idle.
    orphaned: HashSet<Origin>,
}

/// Shared directory context served over RPC.
pub struct Directory<W> {
    world: Arc<W>,
    excluded: BTreeSet<HostId>,
    state: Mutex<State>,
    fillers: FillerPool<W>,
}

impl<W: Oracle + Exec + 'static> Directory<W> {
    pub fn new(world: Arc<W>, cfg: &DirectoryConfig, filler_origin: Origin) -> Self {
        Self {
            excluded: cfg.excluded_hosts.iter().cloned().collect(),
            fillers: FillerPool::new(world.clone(), filler_origin, cfg.filler_pause),
            world,
            state: Mutex::new(State {
                owners: HashMap::new(),
                orphaned: HashSet::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("directory state poisoned")
    }

    /// Grant `origin` exclusive use of `host`.
    ///
    /// Refused when the host is excluded, unknown, unrooted, or owned by a
    /// different origin. Re-reserving an already-owned host succeeds.
    /// Every grant clears the host: the share filler is evicted and
    /// whatever else is running there is killed, so the new owner starts
    /// from a free host.
    pub fn reserve(&self, origin: Origin, host: &HostId) -> bool {
        if self.excluded.contains(host) || !self.world.has_root(host) {
            debug!(origin, %host, "reserve refused: not a lendable host");
            return false;
        }

        {
            let mut state = self.state();
            let conflict = state
                .owners
                .iter()
                .any(|(owner, hosts)| *owner != origin && hosts.contains(host));
            if conflict {
                debug!(origin, %host, "reserve refused: already owned");
                return false;
            }
            state.owners.entry(origin).or_default().insert(host.clone());
        }

        self.fillers.stop(host);
        let killed = self.world.kill_all(host);
        info!(origin, %host, killed, "reserved");
        true
    }

    /// Release `host` from `origin`'s set. Idempotent: dropping a host the
    /// origin does not own is a no-op. A real release also kills whatever
    /// the owner left running on the host.
    pub fn drop_host(&self, origin: Origin, host: &HostId) {
        let owned = {
            let mut state = self.state();
            let Some(hosts) = state.owners.get_mut(&origin) else {
                return;
            };
            let owned = hosts.remove(host);
            if hosts.is_empty() {
                state.owners.remove(&origin);
                state.orphaned.remove(&origin);
            }
            owned
        };
        if owned {
            let killed = self.world.kill_all(host);
            info!(origin, %host, killed, "dropped");
        }
    }

    /// Union of every owner's host set.
    pub fn blocked(&self) -> Vec<HostId> {
        let state = self.state();
        let mut out: BTreeSet<HostId> = BTreeSet::new();
        for hosts in state.owners.values() {
            out.extend(hosts.iter().cloned());
        }
        out.into_iter().collect()
    }

    /// Dead-owner purge, two phases per owner.
    ///
    /// An owner found dead is first marked orphaned; later passes shed each
    /// of its hosts as the host goes idle and purge the owner once its set
    /// is empty. The gap lets operations the dead owner dispatched finish
    /// on their hosts, without holding its idle hosts hostage meanwhile.
    pub fn maintain(&self) {
        let mut state = self.state();

        let dead: Vec<Origin> = state
            .owners
            .keys()
            .copied()
            .filter(|origin| !self.world.process_alive(*origin))
            .collect();

        for origin in dead {
            if !state.orphaned.contains(&origin) {
                info!(origin, "owner terminated, reservations orphaned");
                state.orphaned.insert(origin);
                continue;
            }
            if let Some(hosts) = state.owners.get_mut(&origin) {
                let before = hosts.len();
                hosts.retain(|host| !self.world.host_idle(host));
                let shed = before - hosts.len();
                if shed > 0 {
                    debug!(origin, shed, "idle hosts shed from orphan");
                }
                if hosts.is_empty() {
                    state.owners.remove(&origin);
                    state.orphaned.remove(&origin);
                    info!(origin, "purged dead owner");
                }
            }
        }
    }

    /// Keep a share filler running on every lendable host nobody owns.
    pub fn refresh_fillers(&self) {
        let reserved: BTreeSet<HostId> = self.blocked().into_iter().collect();
        for host in self.world.hosts() {
            if self.excluded.contains(&host) || !self.world.has_root(&host) {
                continue;
            }
            if reserved.contains(&host) {
                // Reservation already evicted the filler; nothing to start.
                continue;
            }
            self.fillers.ensure(&host);
        }
    }

    /// Stop every filler and kill its remaining share slices.
    pub fn shutdown(&self) {
        for host in self.fillers.stop_all() {
            self.world.kill_all(&host);
        }
    }

    /// The RPC surface: `reserve` and `drop` take a host id, `blocked`
    /// takes nothing.
    pub fn router() -> Router<Self> {
        Router::new()
            .procedure(
                "reserve",
                ProcedureDef::new(|dir: &Self, meta, host: HostId| {
                    Ok::<_, String>(dir.reserve(meta.origin, &host))
                }),
            )
            .procedure(
                "drop",
                ProcedureDef::new(|dir: &Self, meta, host: HostId| {
                    dir.drop_host(meta.origin, &host);
                    Ok::<_, String>(())
                }),
            )
            .procedure(
                "blocked",
                ProcedureDef::new(|dir: &Self, _meta, ()| Ok::<_, String>(dir.blocked())),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwgw_common::sim::{SimWorld, TargetSpec};
    use hwgw_common::types::OpKind;
    use hwgw_common::world::LaunchSpec;
    use std::time::Duration;

    fn sim() -> SimWorld {
        SimWorld::builder()
            .host("home", 32.0, 1)
            .host("alpha", 64.0, 1)
            .host("beta", 64.0, 1)
            .unrooted_host("locked", 64.0, 1)
            .target(TargetSpec {
                name: "n00dles".into(),
                base_hack: Duration::from_secs(1),
                ..TargetSpec::default()
            })
            .build()
    }

    fn directory(world: &SimWorld) -> Directory<SimWorld> {
        Directory::new(
            Arc::new(world.clone()),
            &DirectoryConfig::default(),
            1,
        )
    }

    #[test]
    fn test_reserve_grants_and_conflicts() {
        let world = sim();
        let dir = directory(&world);

        assert!(dir.reserve(10, &"alpha".into()));
        assert!(!dir.reserve(20, &"alpha".into()), "second owner refused");
        assert!(dir.reserve(10, &"alpha".into()), "re-reserve by owner ok");
        assert!(dir.reserve(20, &"beta".into()));
    }

    #[test]
    fn test_reserve_refuses_excluded_unknown_unrooted() {
        let world = sim();
        let dir = directory(&world);

        assert!(!dir.reserve(10, &"home".into()), "excluded by default");
        assert!(!dir.reserve(10, &"ghost".into()));
        assert!(!dir.reserve(10, &"locked".into()));
    }

    #[test]
    fn test_drop_is_idempotent_and_frees_the_host() {
        let world = sim();
        let dir = directory(&world);

        assert!(dir.reserve(10, &"alpha".into()));
        dir.drop_host(10, &"alpha".into());
        dir.drop_host(10, &"alpha".into());
        dir.drop_host(99, &"alpha".into());
        assert!(dir.blocked().is_empty());
        assert!(dir.reserve(20, &"alpha".into()), "freed for the next owner");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_clears_running_work_on_the_host() {
        let world = sim();
        let dir = directory(&world);

        // Work launched outside the directory's knowledge entirely.
        let handle = world
            .launch(LaunchSpec::new(
                "alpha".into(),
                OpKind::Weaken,
                "n00dles".into(),
                4,
                9999,
            ))
            .unwrap();

        assert!(dir.reserve(10, &"alpha".into()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(world.host_idle(&"alpha".into()), "takeover clears the host");
        assert!(handle.await.is_err(), "the squatter's task was aborted");
    }

    #[test]
    fn test_blocked_is_the_union_of_owner_sets() {
        let world = sim();
        let dir = directory(&world);
        assert!(dir.blocked().is_empty());

        dir.reserve(10, &"alpha".into());
        dir.reserve(20, &"beta".into());
        assert_eq!(
            dir.blocked(),
            vec![HostId::new("alpha"), HostId::new("beta")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_kills_work_the_owner_left_behind() {
        let world = sim();
        let dir = directory(&world);

        let owner = world.spawn_origin();
        let origin = owner.origin();
        assert!(dir.reserve(origin, &"alpha".into()));
        let handle = world
            .launch(LaunchSpec::new(
                "alpha".into(),
                OpKind::Weaken,
                "n00dles".into(),
                4,
                origin,
            ))
            .unwrap();

        dir.drop_host(origin, &"alpha".into());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(world.host_idle(&"alpha".into()), "leftover work killed");
        assert!(handle.await.is_err(), "the leftover task was aborted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_owner_purged_in_two_phases() {
        let world = sim();
        let dir = directory(&world);

        let owner = world.spawn_origin();
        let origin = owner.origin();
        assert!(dir.reserve(origin, &"alpha".into()));
        owner.exit();

        // First pass only marks; the reservation holds.
        dir.maintain();
        assert_eq!(dir.blocked(), vec![HostId::new("alpha")]);

        // Second pass purges once the host is idle.
        dir.maintain();
        assert!(dir.blocked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_kept_while_its_work_is_in_flight() {
        let world = sim();
        let dir = directory(&world);

        let owner = world.spawn_origin();
        let origin = owner.origin();
        assert!(dir.reserve(origin, &"alpha".into()));
        let handle = world
            .launch(LaunchSpec::new(
                "alpha".into(),
                OpKind::Weaken,
                "n00dles".into(),
                4,
                origin,
            ))
            .unwrap();
        owner.exit();

        dir.maintain();
        dir.maintain();
        assert_eq!(
            dir.blocked(),
            vec![HostId::new("alpha")],
            "busy host keeps the orphan alive"
        );

        handle.await.unwrap();
        dir.maintain();
        assert!(dir.blocked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_sheds_idle_hosts_one_by_one() {
        let world = sim();
        let dir = directory(&world);

        let owner = world.spawn_origin();
        let origin = owner.origin();
        assert!(dir.reserve(origin, &"alpha".into()));
        assert!(dir.reserve(origin, &"beta".into()));
        let handle = world
            .launch(LaunchSpec::new(
                "alpha".into(),
                OpKind::Weaken,
                "n00dles".into(),
                4,
                origin,
            ))
            .unwrap();
        owner.exit();

        // First pass marks; second sheds the idle beta but keeps the busy
        // alpha blocked.
        dir.maintain();
        dir.maintain();
        assert_eq!(dir.blocked(), vec![HostId::new("alpha")]);
        assert!(dir.reserve(30, &"beta".into()), "shed host is lendable");

        handle.await.unwrap();
        dir.maintain();
        assert!(!dir.blocked().contains(&HostId::new("alpha")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_evicts_the_filler() {
        let world = sim();
        let dir = directory(&world);

        dir.refresh_fillers();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(world.proc_count(&"alpha".into()) > 0, "filler running");

        assert!(dir.reserve(10, &"alpha".into()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(world.host_idle(&"alpha".into()));
        assert_eq!(world.host_free_ram(&"alpha".into()), 64.0);

        dir.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fillers_skip_reserved_and_excluded_hosts() {
        let world = sim();
        let dir = directory(&world);

        dir.reserve(10, &"alpha".into());
        dir.refresh_fillers();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(world.host_idle(&"alpha".into()));
        assert!(world.host_idle(&"home".into()));
        assert!(world.host_idle(&"locked".into()));
        assert!(world.proc_count(&"beta".into()) > 0);

        dir.shutdown();
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Reserve(u8, u8),
            Drop(u8, u8),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..4, 0u8..3).prop_map(|(o, h)| Op::Reserve(o, h)),
                (0u8..4, 0u8..3).prop_map(|(o, h)| Op::Drop(o, h)),
            ]
        }

        fn host_name(h: u8) -> HostId {
            HostId::new(format!("worker-{h}"))
        }

        proptest! {
            /// No interleaving of reserves and drops ever leaves one host
            /// in two owners' sets.
            #[test]
            fn test_ownership_is_always_exclusive(ops in proptest::collection::vec(op(), 1..64)) {
                let world = SimWorld::builder()
                    .host("worker-0", 8.0, 1)
                    .host("worker-1", 8.0, 1)
                    .host("worker-2", 8.0, 1)
                    .build();
                let dir = Directory::new(
                    Arc::new(world),
                    &DirectoryConfig::default(),
                    1,
                );

                for op in ops {
                    match op {
                        Op::Reserve(o, h) => {
                            dir.reserve(1000 + u64::from(o), &host_name(h));
                        }
                        Op::Drop(o, h) => {
                            dir.drop_host(1000 + u64::from(o), &host_name(h));
                        }
                    }

                    let state = dir.state();
                    for host in [host_name(0), host_name(1), host_name(2)] {
                        let owners = state
                            .owners
                            .values()
                            .filter(|hosts| hosts.contains(&host))
                            .count();
                        prop_assert!(owners <= 1, "{host} owned {owners} times");
                    }
                }
            }
        }
    }
}
