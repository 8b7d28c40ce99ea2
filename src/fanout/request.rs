use crate::core::errors::BoxError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// Where a request is headed, as far as the request knows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTarget {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub service: Option<String>,
    pub operation: Option<String>,
}

impl RequestTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint<S: Into<String>>(mut self, ip: S, port: u16) -> Self {
        self.ip = Some(ip.into());
        self.port = Some(port);
        self
    }

    pub fn with_service<S: Into<String>>(mut self, service: S) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_operation<S: Into<String>>(mut self, operation: S) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// `ip:port`, only when both are known
    pub fn endpoint(&self) -> Option<String> {
        match (&self.ip, self.port) {
            (Some(ip), Some(port)) => Some(format!("{}:{}", ip, port)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ip.is_none() && self.port.is_none() && self.service.is_none() && self.operation.is_none()
    }
}

// Renders as a parenthesized suffix, or nothing at all for an empty target.
impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let mut parts = Vec::new();
        if let Some(operation) = &self.operation {
            parts.push(operation.clone());
        }
        if let Some(service) = &self.service {
            parts.push(format!("on {}", service));
        }
        if let Some(endpoint) = self.endpoint() {
            parts.push(format!("at {}", endpoint));
        }
        write!(f, " ({})", parts.join(" "))
    }
}

/// One outbound call, as handed to [`join`](super::join)
#[async_trait]
pub trait Request: Send + 'static {
    type Output: Send + 'static;

    /// Perform the call
    async fn execute(self) -> Result<Self::Output, BoxError>;

    /// Best-effort description of the destination, used when reporting timeouts
    fn target(&self) -> RequestTarget {
        RequestTarget::default()
    }
}

/// Adapts an async closure into a [`Request`]
pub struct FnRequest<F> {
    f: F,
    target: RequestTarget,
}

impl<F> FnRequest<F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            target: RequestTarget::default(),
        }
    }

    pub fn with_target(mut self, target: RequestTarget) -> Self {
        self.target = target;
        self
    }
}

/// Shorthand for [`FnRequest::new`]
pub fn request_fn<F>(f: F) -> FnRequest<F> {
    FnRequest::new(f)
}

#[async_trait]
impl<F, Fut, T, E> Request for FnRequest<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    type Output = T;

    async fn execute(self) -> Result<T, BoxError> {
        (self.f)().await.map_err(Into::into)
    }

    fn target(&self) -> RequestTarget {
        self.target.clone()
    }
}
