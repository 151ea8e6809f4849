//! Generic bidirectional RPC over the port bus.
//!
//! A [`Router`] is a tree whose leaves are procedures; a procedure declares
//! typed input/output (serde) and a resolver bound to a shared context plus
//! caller metadata. The [`RpcServer`] drains its inbound port once per tick
//! and writes exactly one response per request to the caller's private port.
//! The [`RpcClient`] correlates the single outstanding request with its
//! response under a bounded timeout.
//!
//! The transport itself performs no locking beyond bus channel I/O; each
//! server processes its inbox strictly within one tick, on the schedule of
//! whoever drives it.

mod bus;
mod client;
mod envelope;
mod router;
mod server;

pub use bus::PortBus;
pub use client::RpcClient;
pub use envelope::{Request, Response};
pub use router::{CallMeta, ProcedureDef, RouteNode, Router};
pub use server::RpcServer;
