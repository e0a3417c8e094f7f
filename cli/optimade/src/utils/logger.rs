use std::sync::OnceLock;

use tracing::error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::reload::Handle;
use tracing_subscriber::{EnvFilter, Registry};

use crate::commands::Verbosity;

static LOGGER_HANDLE: OnceLock<Handle<EnvFilter, Registry>> = OnceLock::new();

/// The log filter for `verbosity`.
///
/// Debug mode raises the default to debug logs of both crates.
pub(crate) fn log_filter(verbosity: Verbosity, debug: bool) -> &'static str {
    let level = match verbosity.to_i32() {
        level if debug && level >= 0 => level.max(2),
        level => level,
    };

    match level {
        // Show only errors
        -1 => "off,optimade=error,optimade_client=error",
        // Only show warnings
        0 => "off,optimade=warn,optimade_client=warn",
        // Show our own info logs
        1 => "off,optimade=info,optimade_client=info",
        2 => "off,optimade=debug,optimade_client=debug",
        3 => "off,optimade=trace,optimade_client=trace",
        // Also show debug logs of the HTTP stack
        4 => "debug,optimade=trace,optimade_client=trace",
        _ => "trace",
    }
}

/// Install the logger, or update its filter if it is installed already.
///
/// `RUST_LOG` takes precedence over the filter derived from `verbosity`.
pub(crate) fn init_logger(verbosity: Option<Verbosity>, debug: bool) {
    let log_filter = log_filter(verbosity.unwrap_or_default(), debug);

    let filter_handle = LOGGER_HANDLE.get_or_init(|| {
        let (subscriber, reload_handle) = create_registry_and_filter_reload_handle();
        subscriber.init();
        reload_handle
    });

    update_filters(filter_handle, log_filter);
}

pub fn update_filters(filter_handle: &Handle<EnvFilter, Registry>, log_filter: &str) {
    let result = filter_handle.modify(|layer| {
        match EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_filter)) {
            Ok(new_filter) => *layer = new_filter,
            Err(err) => {
                error!("Updating logger filter failed: {}", err);
            },
        };
    });
    if let Err(err) = result {
        error!("Updating logger filter failed: {}", err);
    }
}

fn create_registry_and_filter_reload_handle() -> (
    impl tracing_subscriber::util::SubscriberInitExt,
    Handle<EnvFilter, Registry>,
) {
    // Start permissive, the actual filter is set by `update_filters`.
    let filter = EnvFilter::new("trace");
    let (filter, filter_reload_handle) = tracing_subscriber::reload::Layer::new(filter);
    let log_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);
    let registry = tracing_subscriber::registry().with(log_layer);

    (registry, filter_reload_handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_mode_raises_default_level() {
        assert_eq!(
            log_filter(Verbosity::Verbose(0), false),
            "off,optimade=warn,optimade_client=warn"
        );
        assert_eq!(
            log_filter(Verbosity::Verbose(0), true),
            "off,optimade=debug,optimade_client=debug"
        );
        assert_eq!(
            log_filter(Verbosity::Verbose(3), true),
            "off,optimade=trace,optimade_client=trace"
        );
        assert_eq!(
            log_filter(Verbosity::Quiet, true),
            "off,optimade=error,optimade_client=error"
        );
    }
}
