//! svcbinderd — a small demo host process for the `svcbinder` runtime.
//!
//! Usage: `svcbinderd [bind-addr]`
//! Example: `svcbinderd 127.0.0.1:8585`
//!
//! Builds a [`Runtime`](svcbinder::Runtime), registers a couple of demo
//! APIs, and serves them over the WebSocket-framed RPC protocol. This is a
//! thin illustration of the library, not a product.

use async_trait::async_trait;
use std::env;
use std::sync::Arc;
use svcbinder::registry::{ApiDescriptor, ApiImpl};
use svcbinder::request::Request;
use svcbinder::rpc::transport;
use svcbinder::{Config, Runtime};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8585";

fn bind_addr() -> String {
    env::args().nth(1).unwrap_or_else(|| env::var("SVCBINDERD_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()))
}

/// Echoes its single argument back as the reply payload, or replies `pong`
/// to a bare `ping` with no arguments.
struct EchoApi;

#[async_trait]
impl ApiImpl for EchoApi {
    async fn process(&self, req: Arc<Request>) {
        let reply = match req.verbname.as_str() {
            "ping" => serde_json::json!("pong"),
            "echo" => req.parameters.first().cloned().unwrap_or(serde_json::Value::Null),
            _ => {
                req.reply(Err(svcbinder::Kind::UnknownVerb.into()), vec![]).await;
                return;
            }
        };
        req.reply(Ok(()), vec![reply]).await;
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({ "verbs": ["ping", "echo"] })
    }
}

/// Replies with the number of seconds since the Unix epoch, demonstrating
/// an API with no input parameters.
struct ClockApi;

#[async_trait]
impl ApiImpl for ClockApi {
    async fn process(&self, req: Arc<Request>) {
        match req.verbname.as_str() {
            "now" => {
                let secs = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                req.reply(Ok(()), vec![serde_json::json!({ "unix_seconds": secs })]).await;
            }
            _ => req.reply(Err(svcbinder::Kind::UnknownVerb.into()), vec![]).await,
        }
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({ "verbs": ["now"] })
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to install tracing subscriber");

    let config = Config::default();
    let runtime = Runtime::new(&config);
    runtime.apiset.add("echo", ApiDescriptor::new("echo", Arc::new(EchoApi), None)).expect("register echo api");
    runtime.apiset.add("clock", ApiDescriptor::new("clock", Arc::new(ClockApi), None)).expect("register clock api");
    if let Err(e) = runtime.apiset.start_all_services().await {
        error!(error = %e, "failed to start demo apis");
        return;
    }

    let addr = bind_addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind listener");
            return;
        }
    };
    info!(%addr, "svcbinderd listening");

    loop {
        let (tcp, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        let apiset = runtime.apiset.clone();
        let sessions = runtime.sessions.clone();
        tokio::spawn(async move {
            info!(%peer, "connection accepted");
            if let Err(e) = transport::accept_and_serve(tcp, apiset, sessions, "echo".to_string()).await {
                error!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}
