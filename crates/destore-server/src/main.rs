//! DEStore retrieval server entry point.
//!
//! ```bash
//! # Local development against a directory of shards
//! DESTORE_BACKEND=local DESTORE_BASE_DIR=./data/destore cargo run -p destore-server
//!
//! # S3-compatible storage
//! DESTORE_BACKEND=s3 DESTORE_BUCKET=my-archive AWS_REGION=eu-west-1 \
//!     cargo run -p destore-server --release
//!
//! # Multi-zone
//! DESTORE_BACKEND=multi DESTORE_ZONES_CONFIG=./zones.json \
//!     cargo run -p destore-server --release
//! ```
//!
//! Logging is controlled by `RUST_LOG` (default `info`).

use destore_server::config::app_state_from_env;
use destore_server::router;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let addr: std::net::SocketAddr = std::env::var("DESTORE_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;

    let state = app_state_from_env()?;
    let app = router(state);

    tracing::info!(%addr, "destore retrieval server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
