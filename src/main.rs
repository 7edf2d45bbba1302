use backoffice_ledger::{bootstrap, config::Config};

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,backoffice_ledger=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting back-office ledger core");

    let config = Config::from_env()?;
    let _service = bootstrap::initialize_ledger(&config).await?;

    info!("✓ Ledger core ready, schema is up to date");

    Ok(())
}
