// Concurrent dispatch of request batches with per-request outcomes

pub mod join;
pub mod node;
pub mod request;

pub use join::{join, JoinOptions, Outcome};
pub use node::{retarget, Fanout, FanoutOutcomes, Node, Operation, ServiceDescriptor, ServiceMeta};
pub use request::{request_fn, FnRequest, Request, RequestTarget};
