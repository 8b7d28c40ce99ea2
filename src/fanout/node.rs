use super::join::{join, JoinOptions, Outcome};
use super::request::{Request, RequestTarget};
use crate::core::errors::Result;
use crate::lineage::Lineage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// A network endpoint an operation can be pointed at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub ip: String,
    pub port: u16,
    /// Name, location, id or any other descriptive attributes
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Node {
    pub fn new<S: Into<String>>(ip: S, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Connection details of a remote service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMeta {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// A remote service an operation belongs to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub meta: ServiceMeta,
}

impl ServiceDescriptor {
    pub fn new<S: Into<String>, I: Into<String>>(name: S, ip: I, port: u16) -> Self {
        Self {
            name: name.into(),
            meta: ServiceMeta {
                ip: ip.into(),
                port,
                extra: BTreeMap::new(),
            },
        }
    }

    /// Copy of this descriptor pointed at another endpoint
    pub fn with_endpoint<S: Into<String>>(&self, ip: S, port: u16) -> Self {
        let mut service = self.clone();
        service.meta.ip = ip.into();
        service.meta.port = port;
        service
    }

    pub fn target(&self, operation: &str) -> RequestTarget {
        RequestTarget::new()
            .with_endpoint(self.meta.ip.clone(), self.meta.port)
            .with_service(self.name.clone())
            .with_operation(operation)
    }
}

/// A remote operation template that can be pointed at different nodes.
///
/// The template itself is never modified: fanning out clones it and installs
/// a retargeted copy of its service descriptor on the clone.
pub trait Operation: Clone + Send + Sync + 'static {
    type Args: Clone + Send + 'static;
    type Request: Request;

    /// The service this operation calls
    fn service(&self) -> &ServiceDescriptor;

    fn set_service(&mut self, service: ServiceDescriptor);

    /// Build the pending call for `args`
    fn invoke(&self, args: Self::Args) -> Self::Request;
}

/// Independent copy of `op` whose service points at `node`
pub fn retarget<O: Operation>(op: &O, node: &Node) -> O {
    let mut copy = op.clone();
    copy.set_service(op.service().with_endpoint(node.ip.clone(), node.port));
    copy
}

/// Output entries of a [`Fanout`] call
pub type FanoutOutcomes<O> = Vec<Outcome<<<O as Operation>::Request as Request>::Output>>;

/// Dispatches one operation to a fixed list of nodes at once
#[derive(Debug, Clone)]
pub struct Fanout<O> {
    lineage: Lineage,
    op: O,
    nodes: Vec<Node>,
    options: JoinOptions,
}

impl<O: Operation> Fanout<O> {
    pub fn new(lineage: Lineage, op: O, nodes: Vec<Node>, options: JoinOptions) -> Self {
        Self {
            lineage,
            op,
            nodes,
            options,
        }
    }

    pub fn operation(&self) -> &O {
        &self.op
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn options(&self) -> &JoinOptions {
        &self.options
    }

    /// Call the operation on every node with `args`. Entries follow the node
    /// order.
    pub async fn call(&self, args: O::Args) -> Result<FanoutOutcomes<O>> {
        debug!(nodes = self.nodes.len(), "Fanning out operation");
        let requests: Vec<_> = self
            .nodes
            .iter()
            .map(|node| retarget(&self.op, node).invoke(args.clone()))
            .collect();
        join(&self.lineage, requests, &self.options).await
    }
}
