use std::fmt;
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{
        self as fmt_subscriber, format::Writer, time::FormatTime, FmtContext, FormatEvent,
        FormatFields,
    },
    registry::LookupSpan,
    EnvFilter,
};

/// Default filter when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,olivia=debug";

const CRATE_PREFIX: &str = "olivia::";

/// Event formatter printing `time LEVEL [module] fields`.
///
/// Events from this crate are tagged with their module path below the crate
/// root (`network::heartbeat`), events from dependencies with their crate name.
#[derive(Debug, Default)]
pub struct ComponentFormatter {
    timer: fmt_subscriber::time::SystemTime,
}

impl ComponentFormatter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn level_colour(level: Level) -> &'static str {
    match level {
        Level::ERROR => "31",
        Level::WARN => "33",
        Level::INFO => "32",
        Level::DEBUG => "34",
        Level::TRACE => "90",
    }
}

/// Component tag for an event target
pub fn component_of(target: &str) -> &str {
    match target.strip_prefix(CRATE_PREFIX) {
        Some(module) => module,
        None => target.split("::").next().unwrap_or(target),
    }
}

impl<S, N> FormatEvent<S, N> for ComponentFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        self.timer.format_time(&mut writer)?;
        write!(
            writer,
            " \x1b[{}m{:>5}\x1b[0m \x1b[36m[{}]\x1b[0m ",
            level_colour(*metadata.level()),
            metadata.level().as_str(),
            component_of(metadata.target())
        )?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Filter directives tracing one crate module, e.g. `network` gives `info,olivia=debug,olivia::network=trace`
pub fn filter_directives(component_name: Option<&str>) -> String {
    match component_name {
        Some(name) => format!("{},olivia::{}=trace", DEFAULT_FILTER, name),
        None => DEFAULT_FILTER.to_string(),
    }
}

/// Initializes logging, preferring `RUST_LOG` over the built-in filter
pub fn init_logging(component_name: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(component_name)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = fmt_subscriber::Subscriber::builder()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(env_filter)
        .event_format(ComponentFormatter::new())
        .try_init();

    if subscriber.is_err() {
        eprintln!("Warning: Failed to initialize logging, it might already be initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        assert_eq!(filter_directives(None), "info,olivia=debug");
        assert_eq!(
            filter_directives(Some("network")),
            "info,olivia=debug,olivia::network=trace"
        );
        assert!(EnvFilter::try_new(filter_directives(Some("network"))).is_ok());
    }

    #[test]
    fn test_component_tags() {
        assert_eq!(component_of("olivia::network::heartbeat"), "network::heartbeat");
        assert_eq!(component_of("olivia::scheduler"), "scheduler");
        assert_eq!(component_of("olivia"), "olivia");
        assert_eq!(component_of("tokio_util::sync"), "tokio_util");
        assert_eq!(level_colour(Level::WARN), "33");
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logging(None);
        init_logging(Some("dht"));
    }
}
