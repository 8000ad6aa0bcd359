//! Tracing bootstrap
//!
//! The subscriber is installed before the config file is read, filtered from
//! the environment only. Once the config is loaded, [`apply`] swaps in the
//! configured filter.

use secrecon_common::config::LoggingConfig;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, reload, EnvFilter, Registry};

pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Layered fmt subscriber with a reloadable filter
pub fn subscriber<W>(make_writer: W) -> (impl Subscriber + Send + Sync + 'static, FilterHandle)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::new(EnvFilter::new(LoggingConfig::default().effective_filter()));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer));
    (subscriber, handle)
}

/// Switch to the filter resolved from `[logging]`
pub fn apply(handle: &FilterHandle, logging: &LoggingConfig) -> Result<(), reload::Error> {
    handle.reload(EnvFilter::new(logging.effective_filter()))
}
