use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` filter, `info` by default; JSON lines when `ORCH_LOG_JSON=1`.
pub fn init_tracing() -> anyhow::Result<()> {
    let json_logs = std::env::var("ORCH_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid log filter")?;
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
