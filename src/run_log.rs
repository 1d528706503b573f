//! Reading a run log back for analysis.

use crate::row_sink::FIELD_DELIMITER;
use polars::prelude::*;
use std::path::Path;

pub const TIME_COLUMN_NAME: &str = "time";
pub const GATE_COLUMN_NAME: &str = "gate";
pub const MEASUREMENT_COLUMN_NAME: &str = "measurement";
pub const CONDUCTANCE_COLUMN_NAME: &str = "conductance";

#[derive(Debug, thiserror::Error)]
pub enum RunLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse run log: {0}")]
    Polars(#[from] PolarsError),
}

const COLUMN_NAMES: [&str; 4] = [
    TIME_COLUMN_NAME,
    GATE_COLUMN_NAME,
    MEASUREMENT_COLUMN_NAME,
    CONDUCTANCE_COLUMN_NAME,
];

fn empty_run_log() -> Result<DataFrame, RunLogError> {
    let columns: Vec<Column> = COLUMN_NAMES
        .iter()
        .map(|&name| Series::new_empty(name.into(), &DataType::Float64).into())
        .collect();
    Ok(DataFrame::new(columns)?)
}

/// Parse raw log rows into `time`, `gate`, `measurement` and `conductance`.
///
/// Conductance is the reciprocal of the measurement, in arbitrary units; a
/// zero reading gives an infinite value. A log without rows yet gives an
/// empty frame with the same columns.
pub fn parse_run_log(data: &[u8]) -> Result<DataFrame, RunLogError> {
    if data.trim_ascii().is_empty() {
        return empty_run_log();
    }

    let df = CsvReadOptions::default()
        .with_has_header(false)
        .with_parse_options(CsvParseOptions::default().with_separator(FIELD_DELIMITER))
        .into_reader_with_file_handle(std::io::Cursor::new(data))
        .finish()?
        .lazy()
        .select([
            col("column_1").cast(DataType::Float64).alias(TIME_COLUMN_NAME),
            col("column_2").cast(DataType::Float64).alias(GATE_COLUMN_NAME),
            col("column_3")
                .cast(DataType::Float64)
                .alias(MEASUREMENT_COLUMN_NAME),
        ])
        .with_column((lit(1.0) / col(MEASUREMENT_COLUMN_NAME)).alias(CONDUCTANCE_COLUMN_NAME))
        .collect()?;

    Ok(df)
}

/// Load a log file written by [`crate::CsvSink`], e.g. while a run is still in progress.
pub fn read_run_log(path: &Path) -> Result<DataFrame, RunLogError> {
    let data = std::fs::read(path)?;
    parse_run_log(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Sample;
    use crate::row_sink::{CsvSink, RowSink};

    fn column(df: &DataFrame, name: &str) -> Vec<f64> {
        df.column(name)
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect()
    }

    #[test]
    fn test_parse_rows() {
        let df = parse_run_log(b"0.1;0;2\n0.2;0.01;4\n0.3;0.02;0.5\n").unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(df.get_column_names_str(), COLUMN_NAMES);
        assert_eq!(column(&df, GATE_COLUMN_NAME), [0.0, 0.01, 0.02]);
        assert_eq!(column(&df, CONDUCTANCE_COLUMN_NAME), [0.5, 0.25, 2.0]);
    }

    #[test]
    fn test_read_back_sink_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectrum.csv");
        let mut sink = CsvSink::create(&path).unwrap();
        for (i, gate) in [0.0, 0.5, 1.0].into_iter().enumerate() {
            sink.append(&Sample {
                elapsed_seconds: i as f64 * 0.07,
                gate_voltage: gate,
                measurement: 1e-3 * (i + 1) as f64,
            })
            .unwrap();
            sink.flush().unwrap();
        }

        let df = read_run_log(&path).unwrap();
        assert_eq!(column(&df, GATE_COLUMN_NAME), [0.0, 0.5, 1.0]);
        assert_eq!(column(&df, MEASUREMENT_COLUMN_NAME), [1e-3, 2e-3, 3e-3]);
    }

    #[test]
    fn test_log_without_rows() {
        for data in [&b""[..], &b"\n"[..], &b"  \r\n"[..]] {
            let df = parse_run_log(data).unwrap();
            assert_eq!(df.height(), 0);
            assert_eq!(df.get_column_names_str(), COLUMN_NAMES);
            assert!(df.dtypes().iter().all(|dtype| *dtype == DataType::Float64));
        }
    }

    #[test]
    fn test_read_freshly_opened_logs() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::LogConfig {
            directory: dir.path().to_path_buf(),
            ..crate::config::LogConfig::default()
        };
        let logs = crate::RunLogs::open(&config, chrono::Local::now()).unwrap();
        assert_eq!(read_run_log(logs.latest_path()).unwrap().height(), 0);
        assert_eq!(read_run_log(logs.history_path()).unwrap().height(), 0);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_run_log(Path::new("/nonexistent/spectrum.csv")),
            Err(RunLogError::Io(_))
        ));
    }
}
