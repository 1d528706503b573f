//! Destinations for measurement rows.
//!
//! Every row is `elapsed_seconds;gate_voltage;measurement` with no header, and
//! is flushed before the next setpoint is actuated so that a reader tailing
//! the file sees each sample as soon as it is taken.

use crate::acquisition::Sample;
use crate::config::LogConfig;
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const FIELD_DELIMITER: u8 = b';';

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Append-only row writer.
pub trait RowSink {
    fn append(&mut self, sample: &Sample) -> Result<(), SinkError>;

    /// Push everything appended so far to the underlying medium.
    fn flush(&mut self) -> Result<(), SinkError>;
}

/// Delimited text rows on any [`Write`] destination.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> std::fmt::Debug for CsvSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvSink").finish_non_exhaustive()
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(inner: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .delimiter(FIELD_DELIMITER)
            .has_headers(false)
            .from_writer(inner);
        Self { writer }
    }

    /// Flush and hand back the destination.
    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl CsvSink<File> {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        Ok(Self::from_writer(File::create(path)?))
    }
}

impl<W: Write> RowSink for CsvSink<W> {
    fn append(&mut self, sample: &Sample) -> Result<(), SinkError> {
        self.writer.write_record([
            sample.elapsed_seconds.to_string(),
            sample.gate_voltage.to_string(),
            sample.measurement.to_string(),
        ])?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes every row to all of its sinks.
///
/// The acquisition loop only ever sees one sink; duplicating rows into the
/// rolling and the historical log happens here. Every sink is attempted even
/// when an earlier one fails, and the first error is returned, so a healthy
/// log never misses a row because of a broken one.
#[derive(Default)]
pub struct SinkFanout<'a> {
    sinks: Vec<&'a mut dyn RowSink>,
}

impl<'a> SinkFanout<'a> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: &'a mut dyn RowSink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl SinkFanout<'_> {
    fn for_each_sink<F>(&mut self, mut op: F) -> Result<(), SinkError>
    where
        F: FnMut(&mut dyn RowSink) -> Result<(), SinkError>,
    {
        let mut first_error = None;
        for (index, sink) in self.sinks.iter_mut().enumerate() {
            if let Err(e) = op(&mut **sink) {
                log::error!("Sink {} failed: {}", index, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl RowSink for SinkFanout<'_> {
    fn append(&mut self, sample: &Sample) -> Result<(), SinkError> {
        self.for_each_sink(|sink| sink.append(sample))
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.for_each_sink(|sink| sink.flush())
    }
}

/// The two log files of one run: a rolling "latest run" log that is truncated
/// every run, and a historical log named after the run's start time.
#[derive(Debug)]
pub struct RunLogs {
    latest: CsvSink<File>,
    history: CsvSink<File>,
    latest_path: PathBuf,
    history_path: PathBuf,
}

impl RunLogs {
    pub fn open(config: &LogConfig, started_at: DateTime<Local>) -> Result<Self, SinkError> {
        std::fs::create_dir_all(&config.directory)?;

        let latest_path = config.directory.join(&config.latest_file);
        let history_path = config.directory.join(format!(
            "{}{}.csv",
            config.history_prefix,
            started_at.format("%Y-%m-%d_%H-%M-%S")
        ));
        log::info!(
            "Logging run to '{}' and '{}'",
            latest_path.display(),
            history_path.display()
        );

        Ok(Self {
            latest: CsvSink::create(&latest_path)?,
            history: CsvSink::create(&history_path)?,
            latest_path,
            history_path,
        })
    }

    pub fn latest_path(&self) -> &Path {
        &self.latest_path
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn fanout(&mut self) -> SinkFanout<'_> {
        SinkFanout::new().with(&mut self.latest).with(&mut self.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(elapsed_seconds: f64, gate_voltage: f64, measurement: f64) -> Sample {
        Sample {
            elapsed_seconds,
            gate_voltage,
            measurement,
        }
    }

    #[test]
    fn test_row_format() {
        let mut sink = CsvSink::from_writer(Vec::new());
        sink.append(&sample(0.0625, -0.5, 1.5e-6)).unwrap();
        sink.append(&sample(1.0, 0.0, -2.0)).unwrap();
        let bytes = sink.into_inner().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "0.0625;-0.5;0.0000015\n1;0;-2\n"
        );
    }

    #[test]
    fn test_fanout_duplicates_rows() {
        let mut first = CsvSink::from_writer(Vec::new());
        let mut second = CsvSink::from_writer(Vec::new());
        {
            let mut fanout = SinkFanout::new().with(&mut first).with(&mut second);
            assert_eq!(fanout.len(), 2);
            fanout.append(&sample(0.1, 0.2, 0.3)).unwrap();
            fanout.flush().unwrap();
        }
        let first = first.into_inner().unwrap();
        assert_eq!(first, second.into_inner().unwrap());
        assert_eq!(first, b"0.1;0.2;0.3\n");
    }

    struct BrokenSink;

    impl RowSink for BrokenSink {
        fn append(&mut self, _sample: &Sample) -> Result<(), SinkError> {
            Err(SinkError::Io(std::io::Error::other("disk full")))
        }

        fn flush(&mut self) -> Result<(), SinkError> {
            Err(SinkError::Io(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_fanout_reaches_every_sink_when_one_fails() {
        let mut broken = BrokenSink;
        let mut healthy = CsvSink::from_writer(Vec::new());
        {
            let mut fanout = SinkFanout::new().with(&mut broken).with(&mut healthy);
            assert!(matches!(
                fanout.append(&sample(0.1, 0.2, 0.3)),
                Err(SinkError::Io(_))
            ));
            assert!(fanout.flush().is_err());
        }
        assert_eq!(healthy.into_inner().unwrap(), b"0.1;0.2;0.3\n");
    }

    #[test]
    fn test_append_is_visible_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        let mut sink = CsvSink::create(&path).unwrap();
        sink.append(&sample(0.5, 0.01, 42.0)).unwrap();
        sink.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0.5;0.01;42\n");
    }

    #[test]
    fn test_run_logs_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            directory: dir.path().join("logs"),
            ..LogConfig::default()
        };
        let started_at = Local::now();
        let mut logs = RunLogs::open(&config, started_at).unwrap();
        assert!(logs.latest_path().ends_with("spectrum.csv"));
        let expected = format!("data_{}.csv", started_at.format("%Y-%m-%d_%H-%M-%S"));
        assert!(logs.history_path().ends_with(expected));

        let mut fanout = logs.fanout();
        fanout.append(&sample(0.0, 0.0, 1.0)).unwrap();
        fanout.flush().unwrap();
        drop(fanout);

        let latest = std::fs::read(logs.latest_path()).unwrap();
        let history = std::fs::read(logs.history_path()).unwrap();
        assert_eq!(latest, history);
        assert_eq!(latest, b"0;0;1\n");
    }
}
