use std::fmt::Write;

use jiff::{Zoned, tz::TimeZone};
use log::{
    Level, Record,
    kv::{self, VisitSource},
};
use logforth::{
    append::Stdout,
    diagnostic::Diagnostic,
    layout::{JsonLayout, Layout},
};

use crate::args::{Args, LogStyle};

/// One line per record: UTC timestamp, level, crate, message and the
/// structured fields as `key=value`.
#[derive(Debug, Clone, Copy)]
struct TextLayout {
    color: bool,
}

fn ansi(level: Level) -> u8 {
    match level {
        Level::Error => 31,
        Level::Warn => 33,
        Level::Info => 32,
        Level::Debug => 34,
        Level::Trace => 35,
    }
}

struct Fields<'a>(&'a mut String);

impl<'kvs> VisitSource<'kvs> for Fields<'_> {
    fn visit_pair(&mut self, key: kv::Key<'kvs>, value: kv::Value<'kvs>) -> Result<(), kv::Error> {
        write!(self.0, " {key}={value}").map_err(|_| kv::Error::msg("cannot format log field"))
    }
}

impl TextLayout {
    fn line(&self, record: &Record<'_>) -> anyhow::Result<String> {
        let mut line = String::new();
        let level = record.level();

        if self.color {
            write!(line, "\x1b[{}m{level:>5}\x1b[0m  ", ansi(level))?;
        } else {
            write!(line, "{level:>5}  ")?;
        }

        let krate = record.target().split("::").next().unwrap_or_default();
        write!(line, "{krate:<9} {}", record.args())?;

        record
            .key_values()
            .visit(&mut Fields(&mut line))
            .map_err(|error| anyhow::anyhow!("{error}"))?;

        Ok(line)
    }
}

impl Layout for TextLayout {
    fn format(&self, record: &Record<'_>, _diagnostics: &[Box<dyn Diagnostic>]) -> anyhow::Result<Vec<u8>> {
        let now = Zoned::now().with_time_zone(TimeZone::UTC);
        let line = self.line(record)?;

        Ok(format!("{} {line}", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ")).into_bytes())
    }
}

pub(super) fn init(args: &Args) -> anyhow::Result<()> {
    let filter = args.log_level.env_filter()?;

    logforth::builder()
        .dispatch(|d| {
            let d = d.filter(filter);

            match args.log_style {
                LogStyle::Color => d.append(Stdout::default().with_layout(TextLayout { color: true })),
                LogStyle::Text => d.append(Stdout::default().with_layout(TextLayout { color: false })),
                LogStyle::Json => d.append(Stdout::default().with_layout(JsonLayout::default())),
            }
        })
        .apply();

    Ok(())
}
