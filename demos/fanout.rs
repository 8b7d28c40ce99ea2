//! Fans a simulated lookup out to three nodes, one of which is too slow,
//! and prints how each call ended.
//!
//! Run with `cargo run --example fanout`.

use async_trait::async_trait;
use skein::{
    BoxError, Context, JoinOptions, Node, Operation, Outcome, Request, RequestTarget,
    ServiceDescriptor, SkeinConfig,
};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone)]
struct Lookup {
    service: ServiceDescriptor,
}

struct LookupCall {
    service: ServiceDescriptor,
    key: String,
    correlation_id: String,
}

#[async_trait]
impl Request for LookupCall {
    type Output = String;

    async fn execute(self) -> Result<String, BoxError> {
        let latency = match self.service.meta.port {
            7002 => Duration::from_secs(2),
            port => Duration::from_millis(u64::from(port % 100) * 10),
        };
        tokio::time::sleep(latency).await;
        if self.service.meta.port == 7003 {
            return Err(format!("{} not found", self.key).into());
        }
        Ok(format!(
            "{} from {}:{} [{}]",
            self.key, self.service.meta.ip, self.service.meta.port, self.correlation_id
        ))
    }

    fn target(&self) -> RequestTarget {
        self.service.target("lookup")
    }
}

impl Operation for Lookup {
    type Args = (String, String);
    type Request = LookupCall;

    fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    fn set_service(&mut self, service: ServiceDescriptor) {
        self.service = service;
    }

    fn invoke(&self, (key, correlation_id): Self::Args) -> LookupCall {
        LookupCall {
            service: self.service.clone(),
            key,
            correlation_id,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ctx = Context::new(SkeinConfig::strict())?;
    let nodes = vec![
        Node::new("10.0.0.1", 7001).with_meta("zone", "east"),
        Node::new("10.0.0.2", 7002).with_meta("zone", "west"),
        Node::new("10.0.0.3", 7003).with_meta("zone", "east"),
    ];
    let fanout = ctx.make_fanout(
        Lookup {
            service: ServiceDescriptor::new("directory", "127.0.0.1", 7000),
        },
        nodes,
        ctx.join_options().timeout(Duration::from_millis(500)),
    );

    let inner = ctx.clone();
    let outcomes = ctx
        .spawn(async move {
            let correlation_id = inner.current_correlation_id();
            fanout.call(("user:42".to_string(), correlation_id)).await
        })
        .await??;

    let checksum = ctx
        .cpu_bound(|len: usize| Ok::<_, skein::SkeinError>((0..len * 100_000).sum::<usize>()))
        .call(outcomes.len())
        .await?;
    info!(checksum, "Computed checksum on the CPU worker");

    for outcome in &outcomes {
        match outcome {
            Outcome::Value(value) => println!("ok       {}", value),
            Outcome::Failure(err) => println!("failed   {}", err),
            Outcome::Timeout(timeout) => println!("timeout  {}", timeout),
        }
    }

    ctx.close_threadpool().await?;
    Ok(())
}
