use tracing_subscriber::EnvFilter;

/// Selects the JSON layout when set to `json`
pub const LOG_FORMAT_ENV: &str = "OSCAL_RUNNER_LOG_FORMAT";

/// Install the global subscriber: `RUST_LOG` filtering (default `info`), output on stderr
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.with_line_number(true).try_init()
    };
}
