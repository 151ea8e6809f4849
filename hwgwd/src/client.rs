//! Typed client for the directory's RPC surface.

use hwgw_common::config::RpcConfig;
use hwgw_common::errors::RpcError;
use hwgw_common::rpc::{PortBus, Router, RpcClient};
use hwgw_common::types::{HostId, Origin};
use tracing::debug;

/// Wraps the raw transport client with the directory's procedures.
pub struct DirectoryClient {
    rpc: RpcClient,
}

impl DirectoryClient {
    /// `router` supplies the set of callable paths; pass the same router
    /// shape the directory serves.
    pub fn new<C>(bus: PortBus, origin: Origin, cfg: &RpcConfig, router: &Router<C>) -> Self {
        Self {
            rpc: RpcClient::new(bus, origin, cfg.directory_port, cfg.timeout, router),
        }
    }

    pub fn origin(&self) -> Origin {
        self.rpc.origin()
    }

    /// Ask for exclusive use of `host`. `Ok(false)` means another owner
    /// holds it.
    pub async fn reserve(&self, host: &HostId) -> Result<bool, RpcError> {
        self.rpc.call("reserve", host).await
    }

    /// Give `host` back. Always succeeds on the directory side, even when
    /// the host was never ours.
    pub async fn drop_host(&self, host: &HostId) -> Result<(), RpcError> {
        self.rpc.call("drop", host).await
    }

    /// Every host currently reserved by anyone.
    pub async fn blocked(&self) -> Result<Vec<HostId>, RpcError> {
        self.rpc.call("blocked", &()).await
    }

    /// Whether the directory is up and answering.
    pub async fn ping(&self) -> bool {
        self.rpc.ping().await
    }

    /// Reserve all of `hosts`, in order. On the first refusal the hosts
    /// already acquired are dropped again and `Ok(false)` is returned.
    pub async fn reserve_all(&self, hosts: &[&HostId]) -> Result<bool, RpcError> {
        for (i, host) in hosts.iter().enumerate() {
            if !self.reserve(host).await? {
                debug!(%host, "reservation refused, rolling back");
                for acquired in &hosts[..i] {
                    self.drop_host(acquired).await?;
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drop all of `hosts`, ignoring duplicates.
    pub async fn drop_all(&self, hosts: &[&HostId]) -> Result<(), RpcError> {
        for host in hosts {
            self.drop_host(host).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Directory;
    use crate::service::DirectoryService;
    use hwgw_common::config::HwgwConfig;
    use hwgw_common::sim::SimWorld;
    use std::sync::Arc;

    fn sim() -> SimWorld {
        SimWorld::builder()
            .host("alpha", 64.0, 1)
            .host("beta", 64.0, 1)
            .host("gamma", 64.0, 1)
            .build()
    }

    fn setup(world: &SimWorld) -> (PortBus, HwgwConfig, tokio::sync::watch::Sender<bool>) {
        let cfg = HwgwConfig::default();
        let bus = PortBus::new();
        let service = DirectoryService::new(Arc::new(world.clone()), bus.clone(), &cfg);
        let (stop, _) = service.spawn();
        (bus, cfg, stop)
    }

    /// A client for a registered process; the handle keeps the origin
    /// alive past the directory's dead-owner sweep.
    fn client(
        world: &SimWorld,
        bus: &PortBus,
        cfg: &HwgwConfig,
    ) -> (DirectoryClient, hwgw_common::sim::OriginHandle) {
        let process = world.spawn_origin();
        let client = DirectoryClient::new(
            bus.clone(),
            process.origin(),
            &cfg.rpc,
            &Directory::<SimWorld>::router(),
        );
        (client, process)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_drop_over_the_wire() {
        let world = sim();
        let (bus, cfg, _stop) = setup(&world);
        let (a, _a) = client(&world, &bus, &cfg);
        let (b, _b) = client(&world, &bus, &cfg);

        assert!(a.reserve(&"alpha".into()).await.unwrap());
        assert!(!b.reserve(&"alpha".into()).await.unwrap());
        assert_eq!(b.blocked().await.unwrap(), vec![HostId::new("alpha")]);

        a.drop_host(&"alpha".into()).await.unwrap();
        assert!(b.reserve(&"alpha".into()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_all_rolls_back_on_refusal() {
        let world = sim();
        let (bus, cfg, _stop) = setup(&world);
        let (a, _a) = client(&world, &bus, &cfg);
        let (b, _b) = client(&world, &bus, &cfg);

        assert!(b.reserve(&"gamma".into()).await.unwrap());

        let wanted = [
            &HostId::new("alpha"),
            &HostId::new("beta"),
            &HostId::new("gamma"),
        ];
        assert!(!a.reserve_all(&wanted).await.unwrap());

        // Alpha and beta were given back; only b's gamma stays blocked.
        assert_eq!(a.blocked().await.unwrap(), vec![HostId::new("gamma")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_reflects_service_liveness() {
        let world = sim();
        let (bus, cfg, _stop) = setup(&world);
        let (a, _a) = client(&world, &bus, &cfg);
        assert!(a.ping().await);

        // No service on this bus at all.
        let (lonely, _lonely) = client(&world, &PortBus::new(), &cfg);
        assert!(!lonely.ping().await);
    }
}
