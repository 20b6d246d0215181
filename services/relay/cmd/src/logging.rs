//! Console formatter: `[timestamp] [relay-<component>] [LEVEL] message key=value`

use std::fmt::{self, Write as _};
use std::io::IsTerminal;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const LABEL_WIDTH: usize = 16;

#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

/// ANSI escapes, or empty strings when output is not a terminal
#[derive(Clone, Copy)]
struct Palette {
    dim: &'static str,
    reset: &'static str,
    colored: bool,
}

impl Palette {
    const ANSI: Palette = Palette { dim: "\x1b[36m", reset: "\x1b[0m", colored: true };
    const PLAIN: Palette = Palette { dim: "", reset: "", colored: false };

    fn level(&self, level: &Level) -> (&'static str, &'static str) {
        let (tag, color) = match *level {
            Level::ERROR => ("ERROR", "\x1b[91m"),
            Level::WARN => ("WARN", "\x1b[93m"),
            Level::INFO => ("INFO", "\x1b[32m"),
            Level::DEBUG => ("DEBUG", "\x1b[90m"),
            Level::TRACE => ("TRACE", "\x1b[90m"),
        };
        (tag, if self.colored { color } else { "" })
    }
}

pub struct RelayLogFormatter {
    service_name: String,
    palette: Palette,
}

impl RelayLogFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        let colored = std::env::var("TERM").map_or(true, |t| t != "dumb")
            && std::io::stdout().is_terminal();
        Self {
            service_name: service_name.into(),
            palette: if colored { Palette::ANSI } else { Palette::PLAIN },
        }
    }

    /// `relay_server::stats` logs as `relay-server` unless the event names
    /// its own component
    fn label(&self, explicit: Option<&str>, target: &str) -> String {
        let component = explicit.or_else(|| {
            target
                .split("::")
                .next()
                .and_then(|krate| krate.strip_prefix("relay_"))
        });
        let name = match component {
            Some(c) => format!("relay-{}", c),
            None => self.service_name.clone(),
        };
        fit(&name, LABEL_WIDTH)
    }
}

/// Pad to `width` characters, or cut and end with an ellipsis
fn fit(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return format!("{:<width$}", s, width = width);
    }
    let mut out: String = s.chars().take(width - 1).collect();
    out.push('…');
    out
}

impl<S, N> FormatEvent<S, N> for RelayLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let (tag, color) = self.palette.level(metadata.level());
        write!(
            writer,
            "{}[{}]{} [{}] [{}{:<5}{}] {}",
            self.palette.dim,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            self.palette.reset,
            self.label(fields.component.as_deref(), metadata.target()),
            color,
            tag,
            self.palette.reset,
            fields.message,
        )?;
        writeln!(writer, "{}", fields.extra)
    }
}

/// Message, component and the remaining fields rendered as ` key=value`
#[derive(Default)]
struct EventFields {
    message: String,
    component: Option<String>,
    extra: String,
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => {
                let _ = write!(self.extra, " {}={}", name, value);
            }
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "component" => self.component = Some(format!("{:?}", value)),
            name => {
                let _ = write!(self.extra, " {}={:?}", name, value);
            }
        }
    }
}
