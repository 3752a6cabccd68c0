use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tower::ServiceBuilder;

use anyhow::{Context, Result};
use tracing::{info, warn};

use server::directory::{MemoryDirectory, UserDirectory};
use server::handlers::http::routes;
use server::security::{AuditSink, TracingAuditSink};
use server::store::{MemoryStore, SecurityStore, SqliteStore};
use server::tower_middle::AuthPipelineLayer;
use server::AppState;
use shared::config::load_config;

#[derive(Parser, Debug)]
#[command(name = "savory-server", about = "Request security pipeline server")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Sqlite file backing the security store; in-memory when omitted
    #[arg(long)]
    store: Option<String>,

    /// Seed a demo login (demo@example.com / demo-password-123) for local
    /// development
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();
    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    let store: Arc<dyn SecurityStore> = match &args.store {
        Some(path) => Arc::new(
            SqliteStore::open(path)
                .await
                .with_context(|| format!("Failed to open security store at {}", path))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let directory = Arc::new(MemoryDirectory::new());
    if args.demo {
        directory
            .add_user("demo@example.com", "demo-password-123", &["user"])
            .await
            .context("Failed to seed demo user")?;
        info!("Seeded demo user demo@example.com");
    }

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let state = AppState::new(
        config,
        store,
        Arc::clone(&directory) as Arc<dyn UserDirectory>,
        audit,
    )?;
    let guards = routes::guard_table();

    let addr: SocketAddr = state
        .config
        .server
        .addr()
        .parse()
        .context("Invalid bind address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let state = state.clone();
        let guards = Arc::clone(&guards);

        tokio::task::spawn(async move {
            let pipeline = Arc::clone(&state.pipeline);
            let svc = ServiceBuilder::new()
                .map_request(move |mut req: hyper::Request<hyper::body::Incoming>| {
                    // Peer address for IP-keyed rate limiting when no proxy
                    // header is present.
                    req.extensions_mut().insert(peer);
                    req
                })
                .layer(AuthPipelineLayer::new(pipeline, guards))
                .service(tower::service_fn(move |req| {
                    let state = state.clone();
                    async move { routes::route(req, state).await }
                }));

            if let Err(err) = http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(io, TowerToHyperService::new(svc))
                .await
            {
                warn!("Error serving connection: {:?}", err);
            }
        });
    }
}
