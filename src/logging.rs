//! Log formatting for scatterfs hosts
//!
//! Every line carries the machine hostname and the name of the emitting
//! thread. Worker threads are named `<host>-<pool>-<n>`, so lines from
//! different in-process hosts stay distinguishable. Output has no ANSI colors
//! and shows the span hierarchy with tab indentation.

use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Event formatter with hostname and thread prefix
pub struct HostnameFormatter {
    hostname: String,
}

impl HostnameFormatter {
    pub fn new() -> Self {
        Self {
            hostname: local_hostname(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

impl Default for HostnameFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn local_hostname() -> String {
    gethostname::gethostname()
        .to_str()
        .unwrap_or("unknown")
        .to_string()
}

impl<S, N> FormatEvent<S, N> for HostnameFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let now: chrono::DateTime<chrono::Utc> = chrono::Utc::now();

        let thread = std::thread::current();
        write!(
            writer,
            "[{}/{}] ",
            self.hostname,
            thread.name().unwrap_or("main")
        )?;
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        write!(writer, "{:5} ", meta.level())?;

        if let Some(scope) = ctx.event_scope() {
            let spans: Vec<_> = scope.from_root().collect();

            for (depth, span) in spans.iter().enumerate() {
                writeln!(writer)?;
                for _ in 0..=depth {
                    write!(writer, "\t")?;
                }
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<tracing_subscriber::fmt::FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{}}}", fields)?;
                    }
                }
            }

            // message goes one level below the deepest span
            writeln!(writer)?;
            for _ in 0..=spans.len() {
                write!(writer, "\t")?;
            }
        }

        write!(writer, "{}", meta.target())?;
        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            write!(writer, ":{}:{}", file, line)?;
        }

        write!(writer, ": ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Install the global subscriber with the hostname formatter
///
/// `RUST_LOG` overrides `level`. Returns `false` when a global subscriber
/// was already installed (the existing one stays in effect).
pub fn init_with_hostname(level: &str) -> bool {
    use tracing_subscriber::fmt;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = fmt::layer()
        .event_format(HostnameFormatter::new())
        .with_writer(std::io::stdout);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Logging initialized on host: {}", local_hostname());
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_is_resolved() {
        let formatter = HostnameFormatter::new();
        assert!(!formatter.hostname().is_empty());
    }

    #[test]
    fn test_init_twice() {
        // second call keeps the existing subscriber
        let _ = init_with_hostname("debug");
        assert!(!init_with_hostname("debug"));
    }
}
