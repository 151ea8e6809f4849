//! RPC client bound to one server port.

use super::bus::PortBus;
use super::envelope::{Request, Response};
use super::router::Router;
use crate::errors::RpcError;
use crate::types::Origin;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Client half of the transport.
///
/// Built from the same router the server holds: the constructor enumerates
/// the router's procedure paths (identity-memoized traversal, safe for
/// shared or self-referential subtrees) and refuses calls to anything the
/// router does not declare, mirroring server-side validation.
pub struct RpcClient {
    bus: PortBus,
    origin: Origin,
    server_port: u64,
    timeout: Duration,
    paths: BTreeSet<String>,
}

impl RpcClient {
    pub fn new<C>(
        bus: PortBus,
        origin: Origin,
        server_port: u64,
        timeout: Duration,
        router: &Router<C>,
    ) -> Self {
        Self {
            bus,
            origin,
            server_port,
            timeout,
            paths: router.paths(),
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Call `path` with `input`, waiting up to the configured timeout for
    /// the correlated response.
    pub async fn call<I, O>(&self, path: &str, input: &I) -> Result<O, RpcError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        if path != "ping" && !self.paths.contains(path) {
            return Err(RpcError::InvalidProcedure(path.to_string()));
        }

        let req = Request {
            origin: self.origin,
            procedure: path.to_string(),
            payload: serde_json::to_value(input).map_err(|e| RpcError::BadPayload(e.to_string()))?,
        };
        let frame = serde_json::to_value(&req).map_err(|e| RpcError::BadPayload(e.to_string()))?;

        // A reply to an earlier timed-out call may still sit on our port;
        // it must not be correlated with this request.
        while self.bus.try_next(self.origin).is_some() {}

        debug!(origin = self.origin, procedure = %path, "sending request");
        self.bus.post(self.server_port, frame);

        let Some(frame) = self.bus.next_frame(self.origin, self.timeout).await else {
            return Err(RpcError::Timeout(self.timeout));
        };
        let res: Response =
            serde_json::from_value(frame).map_err(|e| RpcError::BadPayload(e.to_string()))?;

        if res.procedure != path {
            return Err(RpcError::ProcedureMismatch {
                expected: path.to_string(),
                got: res.procedure,
            });
        }
        if !res.success {
            return Err(RpcError::Remote(res.error.unwrap_or_default()));
        }
        serde_json::from_value(res.payload).map_err(|e| RpcError::BadPayload(e.to_string()))
    }

    /// Liveness probe: `true` when the server answers, `false` on any
    /// failure including timeout. Never raises.
    pub async fn ping(&self) -> bool {
        self.call::<(), bool>("ping", &()).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::router::ProcedureDef;
    use crate::rpc::server::RpcServer;
    use serde_json::json;
    use std::future::Future;
    use std::sync::Arc;

    struct Ctx;

    fn router() -> Router<Ctx> {
        Router::new().procedure(
            "double",
            ProcedureDef::new(|_ctx: &Ctx, _meta, n: i64| Ok::<_, String>(n * 2)),
        )
    }

    /// Drive the server at a fixed tick until the client future resolves.
    async fn with_server<F: Future>(server: RpcServer<Ctx>, fut: F) -> F::Output {
        let ticker = async {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                server.tick();
            }
        };
        tokio::select! {
            out = fut => out,
            _ = ticker => unreachable!(),
        }
    }

    fn setup(timeout: Duration) -> (RpcServer<Ctx>, RpcClient) {
        let bus = PortBus::new();
        let router = Arc::new(router());
        let server = RpcServer::new(Arc::new(Ctx), router.clone(), bus.clone(), 1000);
        let client = RpcClient::new(bus, 42, 1000, timeout, router.as_ref());
        (server, client)
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip() {
        let (server, client) = setup(Duration::from_secs(1));
        let out: i64 = with_server(server, client.call("double", &21)).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_call_times_out() {
        let (_server, client) = setup(Duration::from_millis(500));
        // Server never ticks.
        let start = tokio::time::Instant::now();
        let err = client.call::<i64, i64>("double", &1).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_path_refused_locally() {
        let (_server, client) = setup(Duration::from_secs(1));
        let err = client.call::<i64, i64>("triple", &1).await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidProcedure(p) if p == "triple"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_true_when_served() {
        let (server, client) = setup(Duration::from_secs(1));
        assert!(with_server(server, client.ping()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_false_on_timeout_instead_of_error() {
        let (_server, client) = setup(Duration::from_millis(200));
        assert!(!client.ping().await);
    }

    /// Consume the next request off the server port, then answer with a
    /// canned frame. Replies after the request so the client's stale-reply
    /// drain cannot swallow it.
    async fn misbehave(bus: &PortBus, reply: Response) {
        while bus.try_next(1000).is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        bus.post(42, serde_json::to_value(reply).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_procedure_mismatch_detected() {
        let bus = PortBus::new();
        let router = router();
        let client = RpcClient::new(bus.clone(), 42, 1000, Duration::from_secs(1), &router);

        // The server answers for a different procedure.
        let (res, ()) = tokio::join!(
            client.call::<i64, i64>("double", &1),
            misbehave(&bus, Response::ok("other", json!(2))),
        );
        assert!(matches!(res.unwrap_err(), RpcError::ProcedureMismatch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_shape_mismatch_detected() {
        let bus = PortBus::new();
        let router = router();
        let client = RpcClient::new(bus.clone(), 42, 1000, Duration::from_secs(1), &router);

        let (res, ()) = tokio::join!(
            client.call::<i64, i64>("double", &1),
            misbehave(&bus, Response::ok("double", json!("not a number"))),
        );
        assert!(matches!(res.unwrap_err(), RpcError::BadPayload(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reply_discarded_before_new_request() {
        let (server, client) = setup(Duration::from_secs(1));
        // Leftover from a hypothetical earlier call that timed out.
        client.bus.post(
            42,
            serde_json::to_value(Response::ok("double", json!(-1))).unwrap(),
        );
        let out: i64 = with_server(server, client.call("double", &5)).await.unwrap();
        assert_eq!(out, 10);
    }
}
