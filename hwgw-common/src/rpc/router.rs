//! Router tree: tagged-variant nodes mapping dot paths to procedures.
//!
//! Nodes live behind `Arc`s so subtrees can be shared between routers (or a
//! router can reference itself through a shared handle). Path enumeration
//! memoizes on node identity, so every distinct node object is visited once
//! and repeat references reuse the cached result instead of recursing.

use crate::errors::RpcError;
use crate::types::Origin;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Caller metadata handed to every resolver.
#[derive(Debug, Clone, Copy)]
pub struct CallMeta {
    pub origin: Origin,
}

type Handler<C> = Box<dyn Fn(&C, CallMeta, Value) -> Result<Value, RpcError> + Send + Sync>;

/// A procedure: typed input/output plus a resolver bound to a shared context.
///
/// Input decoding is the schema check on both ends of the wire; the server
/// treats a decode failure as a payload mismatch, and output re-encoding
/// guarantees the declared response shape.
pub struct ProcedureDef<C> {
    handler: Handler<C>,
}

impl<C> ProcedureDef<C> {
    /// Build a procedure from a typed resolver.
    ///
    /// `()` stands in for "no input" / "no output" and maps to a null
    /// payload on the wire.
    pub fn new<I, O, F>(resolve: F) -> Arc<Self>
    where
        I: DeserializeOwned,
        O: Serialize,
        F: Fn(&C, CallMeta, I) -> Result<O, String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(move |ctx, meta, payload| {
                let input: I = serde_json::from_value(payload)
                    .map_err(|e| RpcError::BadPayload(e.to_string()))?;
                let output = resolve(ctx, meta, input).map_err(RpcError::Remote)?;
                serde_json::to_value(output).map_err(|e| RpcError::BadPayload(e.to_string()))
            }),
        })
    }

    pub fn invoke(&self, ctx: &C, meta: CallMeta, payload: Value) -> Result<Value, RpcError> {
        (self.handler)(ctx, meta, payload)
    }
}

/// One node of the router tree.
pub enum RouteNode<C> {
    Router(Router<C>),
    Procedure(Arc<ProcedureDef<C>>),
}

/// Mapping of names to child nodes.
pub struct Router<C> {
    routes: BTreeMap<String, Arc<RouteNode<C>>>,
}

impl<C> Default for Router<C> {
    fn default() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }
}

impl<C> Router<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a procedure leaf under `name`.
    #[must_use]
    pub fn procedure(mut self, name: impl Into<String>, proc: Arc<ProcedureDef<C>>) -> Self {
        self.routes
            .insert(name.into(), Arc::new(RouteNode::Procedure(proc)));
        self
    }

    /// Attach an already-built node (nested router or shared subtree).
    #[must_use]
    pub fn node(mut self, name: impl Into<String>, node: Arc<RouteNode<C>>) -> Self {
        self.routes.insert(name.into(), node);
        self
    }

    /// Resolve a dot path to a procedure by typed recursive descent.
    pub fn find(&self, path: &str) -> Option<Arc<ProcedureDef<C>>> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        match (self.routes.get(head)?.as_ref(), rest) {
            (RouteNode::Procedure(proc), None) => Some(proc.clone()),
            (RouteNode::Router(router), Some(rest)) => router.find(rest),
            _ => None,
        }
    }

    /// Enumerate every procedure path reachable from this router.
    ///
    /// Identity-keyed memoization: each distinct node object contributes its
    /// relative paths once, so shared subtrees are not re-walked and
    /// self-referential structures terminate (a node reached again while
    /// still being expanded contributes nothing at that point).
    pub fn paths(&self) -> BTreeSet<String> {
        let mut memo: HashMap<usize, BTreeSet<String>> = HashMap::new();
        let mut out = BTreeSet::new();
        for (name, child) in &self.routes {
            for rel in Self::visit(child, &mut memo) {
                out.insert(join_path(name, &rel));
            }
        }
        out
    }

    fn visit(node: &Arc<RouteNode<C>>, memo: &mut HashMap<usize, BTreeSet<String>>) -> BTreeSet<String> {
        let key = Arc::as_ptr(node) as usize;
        if let Some(cached) = memo.get(&key) {
            return cached.clone();
        }
        // Placeholder breaks cycles: a back-reference sees an empty set.
        memo.insert(key, BTreeSet::new());

        let result = match node.as_ref() {
            RouteNode::Procedure(_) => BTreeSet::from([String::new()]),
            RouteNode::Router(router) => {
                let mut out = BTreeSet::new();
                for (name, child) in &router.routes {
                    for rel in Self::visit(child, memo) {
                        out.insert(join_path(name, &rel));
                    }
                }
                out
            }
        };
        memo.insert(key, result.clone());
        result
    }
}

fn join_path(head: &str, rel: &str) -> String {
    if rel.is_empty() {
        head.to_string()
    } else {
        format!("{head}.{rel}")
    }
}
