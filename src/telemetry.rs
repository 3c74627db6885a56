use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "tagwatch=info,warn";

/// `TAGWATCH_LOG_JSON=1` (or `true`) asks for one JSON object per line.
pub fn json_output_requested() -> bool {
    std::env::var("TAGWATCH_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
/// Call after `.env` is loaded so both variables can come from there.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    if json_output_requested() {
        registry.with(fmt::layer().json().with_current_span(true)).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}
