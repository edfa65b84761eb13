//! Tracing/logging bootstrap.
//!
//! Logging to stdout is always enabled, at least at the "ERROR" level; the
//! level for this crate's targets comes from config. Exporting spans to an
//! external collector is an operational concern wired up outside this
//! repository.

use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, Layer, Registry};

use crate::errors::{Error, Result};

pub fn parse_log_level(level: &str) -> Result<LevelFilter> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        level => Err(Error::Config(format!("unknown log level: {level}"))),
    }
}

/// Install the global subscriber: compact stdout logs with source
/// file/line and thread ids, filtered to this crate at `log_level`.
pub fn init_tracing(log_level: LevelFilter) {
    let logs = tracing_subscriber::fmt::Layer::default()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_filter(Targets::new().with_target("kaldb", log_level));

    set_global_subscriber(Registry::default().with(logs));
}

// Try to set a global default subscriber, logging the error without
// panicking if it was already set. This can fail if tracing was already
// initialized, which happens in tests and when running more than one node
// in the same process.
fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        tracing::warn!("{err}");
    }
}
