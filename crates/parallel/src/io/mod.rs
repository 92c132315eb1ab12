//! Coordinator-side handlers for operations workers cannot perform.
//!
//! Workers only describe what they want (print this, store that row, plot
//! this, give me that value); the [`IoProxy`] carries it out against its
//! sinks. Every handler runs on the coordinator loop.

mod sinks;
mod values;

pub use sinks::{
    ConsoleLine, ConsoleSink, ConsoleStream, CsvFileSink, CsvSink, MemoryCsvSink, PlotNotice,
    PlotSink, RecordingConsole, RecordingPlotSink, StdConsole,
};
pub use values::{SharedValues, ValueSource};

use crate::context::RunContext;
use elea_core::{CorrelationId, Message, ProtocolError, WorkerId};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// One row of the CSV buffer.
pub type CsvRow = Vec<Value>;

/// Errors from flushing collaborator sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Render console arguments the way `console.log(a, b, c)` prints them.
///
/// An array is an argument list; strings print without quotes; everything
/// else prints as JSON.
pub fn render_args(args: &Value) -> String {
    fn render_one(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    match args {
        Value::Array(items) => items.iter().map(render_one).collect::<Vec<_>>().join(" "),
        single => render_one(single),
    }
}

/// Coordinator-side I/O handlers and their sinks.
pub struct IoProxy {
    console: Arc<dyn ConsoleSink>,
    csv: Box<dyn CsvSink>,
    plot: Arc<dyn PlotSink>,
    values: Arc<dyn ValueSource>,
    tag_console: bool,
}

impl IoProxy {
    /// Proxy with stdio console, in-memory CSV, plot notices and an empty
    /// value store.
    pub fn new(tag_console: bool) -> Self {
        Self {
            console: Arc::new(StdConsole),
            csv: Box::new(MemoryCsvSink::new()),
            plot: Arc::new(PlotNotice),
            values: Arc::new(SharedValues::new()),
            tag_console,
        }
    }

    pub fn set_console(&mut self, console: Arc<dyn ConsoleSink>) {
        self.console = console;
    }

    pub fn set_csv_sink(&mut self, csv: Box<dyn CsvSink>) {
        self.csv = csv;
    }

    pub fn set_plot_sink(&mut self, plot: Arc<dyn PlotSink>) {
        self.plot = plot;
    }

    pub fn set_value_source(&mut self, values: Arc<dyn ValueSource>) {
        self.values = values;
    }

    pub fn on_console_log(&self, source: WorkerId, args: &Value) {
        self.console
            .write(ConsoleStream::Out, source, &self.format_line(source, args));
    }

    pub fn on_console_error(&self, source: WorkerId, args: &Value) {
        self.console
            .write(ConsoleStream::Err, source, &self.format_line(source, args));
    }

    /// Append a row to the run's CSV buffer.
    ///
    /// A scalar payload becomes a one-field row.
    pub fn on_csv_row(&self, ctx: &mut RunContext, source: WorkerId, row: Value) {
        let row = match row {
            Value::Array(fields) => fields,
            scalar => vec![scalar],
        };
        tracing::trace!(worker = source.0, fields = row.len(), "CSV row buffered");
        ctx.push_csv_row(row);
    }

    pub fn on_plot_request(&self, source: WorkerId, spec: &Value) {
        self.plot.plot(source, spec);
    }

    /// Answer a value request with a reply carrying the same correlation id.
    pub fn on_value_request(
        &self,
        ctx: &RunContext,
        source: WorkerId,
        correlation_id: CorrelationId,
        payload: &Value,
    ) -> Result<(), ProtocolError> {
        let value = self.values.value_for(source, payload);
        ctx.send_to(source, Message::value_reply(correlation_id, value))
    }

    /// Hand the run's rows to the CSV sink.
    pub fn flush_csv(&mut self, rows: &[CsvRow]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        self.csv.write_rows(rows)
    }

    fn format_line(&self, source: WorkerId, args: &Value) -> String {
        let text = render_args(args);
        if self.tag_console {
            format!("[thread {}] {}", source, text)
        } else {
            text
        }
    }
}

impl Default for IoProxy {
    fn default() -> Self {
        Self::new(true)
    }
}
