//! Voice Concierge launch planner
//!
//! Resolves launch parameters (a query string such as
//! `provider=gemini&rtmode=b`) against the configuration file named by
//! `CONCIERGE_CONFIG` and prints the resulting plan as JSON.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_concierge::{ConciergeConfig, LaunchConfig, LaunchParams};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_concierge=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match std::env::var("CONCIERGE_CONFIG") {
        Ok(path) => ConciergeConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        Err(_) => ConciergeConfig::default(),
    };

    let query = std::env::args().nth(1).unwrap_or_default();
    let params = LaunchParams::parse(&query);
    let plan = LaunchConfig::resolve(&params, &config);

    info!(
        "Launch plan: provider={} vad={} function_calling={}",
        plan.provider,
        plan.vad.vad_mode(),
        plan.function_calling
    );
    println!("{}", serde_json::to_string_pretty(&plan)?);

    Ok(())
}
