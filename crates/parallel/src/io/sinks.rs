//! Console, CSV and plot collaborators.

use super::{CsvRow, SinkError};
use elea_core::WorkerId;
use serde_json::Value;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════════════════
// Console
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    Out,
    Err,
}

/// Receives console lines forwarded from workers.
pub trait ConsoleSink: Send + Sync {
    fn write(&self, stream: ConsoleStream, source: WorkerId, line: &str);
}

/// Writes to the process's stdout and stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdConsole;

impl ConsoleSink for StdConsole {
    fn write(&self, stream: ConsoleStream, _source: WorkerId, line: &str) {
        match stream {
            ConsoleStream::Out => println!("{}", line),
            ConsoleStream::Err => eprintln!("{}", line),
        }
    }
}

/// A console line captured by [`RecordingConsole`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub stream: ConsoleStream,
    pub source: WorkerId,
    pub text: String,
}

/// Keeps every console line in memory.
#[derive(Debug, Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<ConsoleLine>>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<ConsoleLine> {
        lock(&self.lines).clone()
    }

    /// Lines from one worker, in the order that worker sent them.
    pub fn lines_from(&self, source: WorkerId) -> Vec<String> {
        lock(&self.lines)
            .iter()
            .filter(|line| line.source == source)
            .map(|line| line.text.clone())
            .collect()
    }
}

impl ConsoleSink for RecordingConsole {
    fn write(&self, stream: ConsoleStream, source: WorkerId, line: &str) {
        lock(&self.lines).push(ConsoleLine {
            stream,
            source,
            text: line.to_string(),
        });
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CSV
// ═══════════════════════════════════════════════════════════════════════════

/// Receives the CSV buffer once a run completes.
pub trait CsvSink: Send {
    fn write_rows(&mut self, rows: &[CsvRow]) -> Result<(), SinkError>;
}

/// Collects rows in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryCsvSink {
    rows: Arc<Mutex<Vec<CsvRow>>>,
}

impl MemoryCsvSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<CsvRow> {
        lock(&self.rows).clone()
    }
}

impl CsvSink for MemoryCsvSink {
    fn write_rows(&mut self, rows: &[CsvRow]) -> Result<(), SinkError> {
        lock(&self.rows).extend_from_slice(rows);
        Ok(())
    }
}

/// Appends rows to a CSV file.
///
/// The optional header is written only when the file is empty, so several
/// runs can share one file.
#[derive(Debug, Clone)]
pub struct CsvFileSink {
    path: PathBuf,
    header: Option<Vec<String>>,
}

impl CsvFileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            header: None,
        }
    }

    pub fn with_header<I, S>(mut self, header: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header = Some(header.into_iter().map(Into::into).collect());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn field(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl CsvSink for CsvFileSink {
    fn write_rows(&mut self, rows: &[CsvRow]) -> Result<(), SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let is_empty = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);

        if let (true, Some(header)) = (is_empty, &self.header) {
            writer.write_record(header)?;
        }
        for row in rows {
            writer.write_record(row.iter().map(Self::field))?;
        }
        writer.flush()?;

        tracing::debug!(path = %self.path.display(), rows = rows.len(), "CSV rows written");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Plotting
// ═══════════════════════════════════════════════════════════════════════════

/// Receives plot requests.
pub trait PlotSink: Send + Sync {
    fn plot(&self, source: WorkerId, spec: &Value);
}

/// Stand-in for contexts without a renderer: logs a notice and moves on.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlotNotice;

impl PlotSink for PlotNotice {
    fn plot(&self, source: WorkerId, _spec: &Value) {
        tracing::info!(
            worker = source.0,
            "Plotting is only supported in the visual editor; use CSV output instead"
        );
    }
}

/// Keeps every plot request in memory.
#[derive(Debug, Default)]
pub struct RecordingPlotSink {
    requests: Mutex<Vec<(WorkerId, Value)>>,
}

impl RecordingPlotSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<(WorkerId, Value)> {
        lock(&self.requests).clone()
    }
}

impl PlotSink for RecordingPlotSink {
    fn plot(&self, source: WorkerId, spec: &Value) {
        lock(&self.requests).push((source, spec.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_csv_file_sink_appends_across_flushes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.csv");
        let mut sink = CsvFileSink::new(&path).with_header(["thread", "value", "note"]);

        sink.write_rows(&[vec![json!(0), json!(1.5), json!("a, b")]])
            .unwrap();
        sink.write_rows(&[vec![json!(1), json!(null)]]).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "thread,value,note\n0,1.5,\"a, b\"\n1,\n");
    }

    #[test]
    fn test_memory_csv_sink_clones_share_rows() {
        let sink = MemoryCsvSink::new();
        let mut writer = sink.clone();
        writer.write_rows(&[vec![json!("x")]]).unwrap();
        assert_eq!(sink.rows(), vec![vec![json!("x")]]);
    }

    #[test]
    fn test_recording_console_filters_by_source() {
        let console = RecordingConsole::new();
        console.write(ConsoleStream::Out, WorkerId(0), "a");
        console.write(ConsoleStream::Out, WorkerId(1), "b");
        console.write(ConsoleStream::Err, WorkerId(0), "c");

        assert_eq!(console.lines_from(WorkerId(0)), vec!["a", "c"]);
    }

    #[test]
    fn test_recording_plot_sink() {
        let plots = RecordingPlotSink::new();
        plots.plot(WorkerId(4), &json!({"x": [1, 2]}));
        assert_eq!(plots.requests(), vec![(WorkerId(4), json!({"x": [1, 2]}))]);

        // The notice sink never fails.
        PlotNotice.plot(WorkerId(4), &json!(null));
    }
}
