//! Diagnostic logging for the `hellorag` binary.
//!
//! Logs go to stderr so that stdout stays clean for answers and `--json`
//! output. `RUST_LOG` takes precedence over `[logging] level`:
//!
//! ```bash
//! RUST_LOG=hellorag_pack=debug hellorag --config pack.toml build
//! ```

use std::sync::Once;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Install the global subscriber. Only the first call takes effect.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = filter_for(config, std::env::var("RUST_LOG").ok().as_deref());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter);

        // A host application may already own the global subscriber.
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

fn filter_for(config: &LoggingConfig, rust_log: Option<&str>) -> EnvFilter {
    EnvFilter::try_new(directives(config, rust_log)).unwrap_or_else(|_| EnvFilter::new("warn"))
}

fn directives<'a>(config: &'a LoggingConfig, rust_log: Option<&'a str>) -> &'a str {
    match rust_log {
        Some(env) if !env.trim().is_empty() => env,
        _ => config.level.as_str(),
    }
}
