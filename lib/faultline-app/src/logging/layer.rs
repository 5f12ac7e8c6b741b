use std::fmt::{self, Write as _};

use chrono::{SecondsFormat, Utc};
use tracing::{field, Event, Subscriber};
use tracing_subscriber::{
    field::VisitOutput,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, Layer, MakeWriter},
    layer,
    registry::LookupSpan,
    Layer as _,
};

use super::LoggingConfiguration;

pub fn build_formatting_layer<S, W>(config: &LoggingConfiguration, writer: W) -> Box<dyn layer::Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    if config.log_format_json {
        Layer::new()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(writer)
            .boxed()
    } else {
        Layer::new()
            .event_format(TimestampedFormatter)
            .with_writer(writer)
            .boxed()
    }
}

/// Formats events as `<timestamp> [<LEVEL>]: <message>`, with structured fields trailing the message.
pub(super) struct TimestampedFormatter;

impl<S, N> FormatEvent<S, N> for TimestampedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        write!(
            writer,
            "{} [{}]: ",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event.metadata().level()
        )?;

        let mut v = TrailingFieldVisitor::new(writer.by_ref());
        event.record(&mut v);
        v.finish()?;

        writeln!(writer)
    }
}

/// Field visitor that writes the message first and every other field after it.
///
/// Non-message fields are written as `key:"value"` pairs separated by commas, and split from the message with a pipe:
///
/// ```text
/// Order placed: 0b3c... | order_id:"0b3c..."
/// ```
struct TrailingFieldVisitor<'writer> {
    writer: Writer<'writer>,
    message: String,
    fields: String,
    fields_written: usize,
    last_result: fmt::Result,
}

impl<'writer> TrailingFieldVisitor<'writer> {
    fn new(writer: Writer<'writer>) -> Self {
        Self {
            writer,
            message: String::new(),
            fields: String::new(),
            fields_written: 0,
            last_result: Ok(()),
        }
    }

    fn try_write(&mut self, field: &field::Field, f: impl FnOnce(&mut dyn fmt::Write) -> fmt::Result) {
        if self.last_result.is_err() {
            return;
        }

        if field.name() == "message" {
            self.last_result = f(&mut self.message);
            return;
        }

        if self.fields_written > 0 {
            self.fields.push(',');
        }
        self.last_result = write!(self.fields, "{}:", field.name());
        if self.last_result.is_ok() {
            self.last_result = f(&mut self.fields);
            self.fields_written += 1;
        }
    }
}

impl field::Visit for TrailingFieldVisitor<'_> {
    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        self.try_write(field, |w| {
            if field.name() == "message" {
                write!(w, "{:?}", value)
            } else {
                write!(w, "\"{:?}\"", value)
            }
        });
    }

    fn record_str(&mut self, field: &field::Field, value: &str) {
        self.try_write(field, |w| {
            if field.name() == "message" {
                w.write_str(value)
            } else {
                write!(w, "\"{}\"", value)
            }
        });
    }

    fn record_i64(&mut self, field: &field::Field, value: i64) {
        self.try_write(field, |w| write!(w, "{}", value));
    }

    fn record_u64(&mut self, field: &field::Field, value: u64) {
        self.try_write(field, |w| write!(w, "{}", value));
    }

    fn record_bool(&mut self, field: &field::Field, value: bool) {
        self.try_write(field, |w| write!(w, "{}", value));
    }
}

impl VisitOutput<fmt::Result> for TrailingFieldVisitor<'_> {
    fn finish(mut self) -> fmt::Result {
        self.last_result?;

        self.writer.write_str(&self.message)?;
        if !self.fields.is_empty() {
            write!(self.writer, " | {}", self.fields)?;
        }

        Ok(())
    }
}
