use tracing_subscriber::EnvFilter;

use crate::commands::Verbosity;

/// Installs a process-global `tracing` subscriber that writes plain
/// single-line events to stderr, with verbosity controlled by `-v`/`-q`
/// (or `RUST_LOG`, which always wins when set).
pub fn init_logger(verbosity: Verbosity) {
    let default_filter = match verbosity {
        Verbosity::Quiet => "off,cubicle=error",
        Verbosity::Verbose(0) => "off,cubicle=warn",
        Verbosity::Verbose(1) => "off,cubicle=info",
        Verbosity::Verbose(2) => "off,cubicle=debug,cubicle_sdk=debug",
        Verbosity::Verbose(_) => "off,cubicle=trace,cubicle_sdk=trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .try_init();
}
