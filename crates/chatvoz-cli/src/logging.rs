use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use chatvoz_core::config::LoggingConfig;

/// Filter directives from config: the base level followed by per-crate overrides.
fn directives(config: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("info")
    };
    std::iter::once(level)
        .chain(config.filters.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` wins over the config.
pub fn init(config: &LoggingConfig, verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(config, verbose)));

    let json = config.format == "json";
    let stdout = config.output == "stdout";
    let fmt_layer = match (json, stdout) {
        (true, true) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .boxed(),
        (true, false) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        (false, true) => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .boxed(),
        (false, false) => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
