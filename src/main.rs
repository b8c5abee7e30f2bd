//!
//! donation ledger server binary
//! ------------------------------
//! Starts the HTTP server. Configuration comes from environment variables with
//! CLI flag overrides (`--http-port`, `--bind`, `--data-file`).

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use donation_ledger::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cfg = ServerConfig::from_env_and_args(&args);

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "donation ledger starting: RUST_LOG='{}', bind={}, http_port={}, data_file={:?}, verifier_configured={}, bootstrap_admin={}",
        rust_log,
        cfg.bind,
        cfg.http_port,
        cfg.data_file,
        cfg.admin_password.is_some(),
        cfg.bootstrap_admin.as_ref().map(|(id, _)| id.as_str()).unwrap_or("<none>")
    );

    donation_ledger::server::run(cfg).await
}
