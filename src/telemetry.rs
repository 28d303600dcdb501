//! Tracing setup
//!
//! `RUST_LOG` takes priority over the level passed in. Logs go to stderr so
//! answers printed on stdout stay clean.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_tracing(level: &str) {
    let default_filter = format!("{},financial_rag_agent={}", level, level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}
