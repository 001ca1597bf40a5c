//! Console log format for the sio client.
//!
//! Lines look like `[2024-05-01 12:00:00.123] [sio-session ] [INFO ] message key=value`.
//! The `component` field, when present, replaces the default component name.

use std::fmt::{self, Write as _};
use std::io::IsTerminal;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_DIM: &str = "\x1b[2m";
const COLOR_RED: &str = "\x1b[31m";
const COLOR_YELLOW: &str = "\x1b[33m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BLUE: &str = "\x1b[34m";

const COMPONENT_WIDTH: usize = 12;

/// Log with a `component` field
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Warn with a `component` field
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Debug with a `component` field
#[macro_export]
macro_rules! component_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(component = $component, $($arg)*)
    };
}

/// Error with a `component` field
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

/// `FormatEvent` implementation for the client binary
pub struct SioLogFormatter {
    default_component: String,
    color: bool,
}

impl SioLogFormatter {
    pub fn new(default_component: impl Into<String>) -> Self {
        Self {
            default_component: default_component.into(),
            color: std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
        }
    }

    fn component(&self, event: &Event<'_>, visitor: &FieldVisitor) -> String {
        let name = match &visitor.component {
            Some(component) => component.clone(),
            None => component_from_target(event.metadata().target())
                .unwrap_or_else(|| self.default_component.clone()),
        };
        pad(&name, COMPONENT_WIDTH)
    }

    fn level_color(&self, level: &Level) -> &'static str {
        if !self.color {
            return "";
        }
        match *level {
            Level::ERROR => COLOR_RED,
            Level::WARN => COLOR_YELLOW,
            Level::INFO => COLOR_GREEN,
            Level::DEBUG => COLOR_BLUE,
            Level::TRACE => COLOR_DIM,
        }
    }
}

/// `sio_session::inbound` becomes `sio-session`
fn component_from_target(target: &str) -> Option<String> {
    let krate = target.split("::").next()?;
    krate.starts_with("sio").then(|| krate.replace('_', "-"))
}

fn pad(name: &str, width: usize) -> String {
    if name.chars().count() > width {
        name.chars().take(width).collect()
    } else {
        format!("{:<width$}", name, width = width)
    }
}

impl<S, N> FormatEvent<S, N> for SioLogFormatter
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
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let level = event.metadata().level();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let (dim, reset) = if self.color { (COLOR_DIM, COLOR_RESET) } else { ("", "") };
        write!(
            writer,
            "{}[{}]{} [{}] [{}{:<5}{}] {}",
            dim,
            timestamp,
            reset,
            self.component(event, &visitor),
            self.level_color(level),
            level.as_str(),
            reset,
            visitor.message
        )?;
        if !visitor.fields.is_empty() {
            write!(writer, " {}{}{}", dim, visitor.fields, reset)?;
        }
        writeln!(writer)
    }
}

/// Collects the message, the component and any remaining fields
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
    fields: String,
}

impl FieldVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => self.push_field(name, format_args!("{}", value)),
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "component" => self.component = Some(format!("{:?}", value).trim_matches('"').to_string()),
            name => self.push_field(name, format_args!("{:?}", value)),
        }
    }
}
