//! Tick-driven RPC server.

use super::envelope::{Request, Response};
use super::router::{CallMeta, Router};
use super::bus::PortBus;
use crate::errors::RpcError;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Serves one router over one inbound port.
///
/// The caller drives [`tick`](Self::tick) on its own schedule; each tick
/// drains every pending request and writes exactly one response per valid
/// request to the port keyed by the request's origin.
pub struct RpcServer<C> {
    ctx: Arc<C>,
    router: Arc<Router<C>>,
    bus: PortBus,
    port: u64,
}

impl<C> RpcServer<C> {
    pub fn new(ctx: Arc<C>, router: Arc<Router<C>>, bus: PortBus, port: u64) -> Self {
        Self {
            ctx,
            router,
            bus,
            port,
        }
    }

    /// The shared context injected at construction.
    pub fn context(&self) -> &Arc<C> {
        &self.ctx
    }

    pub fn router(&self) -> &Arc<Router<C>> {
        &self.router
    }

    /// Drain and serve every pending request.
    pub fn tick(&self) {
        for frame in self.bus.drain(self.port) {
            let req: Request = match serde_json::from_value(frame) {
                Ok(req) => req,
                Err(e) => {
                    // Dropped without a reply; the caller times out.
                    warn!(port = self.port, error = %e, "dropping malformed request frame");
                    continue;
                }
            };
            if let Some(response) = self.serve(&req) {
                match serde_json::to_value(&response) {
                    Ok(frame) => self.bus.post(req.origin, frame),
                    Err(e) => warn!(origin = req.origin, error = %e, "failed to encode response"),
                }
            }
        }
    }

    fn serve(&self, req: &Request) -> Option<Response> {
        // Reserved liveness path: always resolves, bypassing the router.
        if req.procedure == "ping" {
            return Some(Response::ok("ping", json!(true)));
        }

        let Some(proc) = self.router.find(&req.procedure) else {
            warn!(origin = req.origin, procedure = %req.procedure, "invalid procedure");
            return Some(Response::err(
                &req.procedure,
                format!("invalid procedure '{}'", req.procedure),
            ));
        };

        let meta = CallMeta { origin: req.origin };
        match proc.invoke(&self.ctx, meta, req.payload.clone()) {
            Ok(payload) => {
                debug!(origin = req.origin, procedure = %req.procedure, "served");
                Some(Response::ok(&req.procedure, payload))
            }
            Err(RpcError::BadPayload(e)) => {
                // Input shape mismatch: drop, the caller times out.
                warn!(origin = req.origin, procedure = %req.procedure, error = %e, "invalid input payload");
                None
            }
            Err(e) => {
                warn!(origin = req.origin, procedure = %req.procedure, error = %e, "resolver failed");
                Some(Response::err(&req.procedure, e.to_string()))
            }
        }
    }
}
