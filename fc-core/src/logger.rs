//! Append-only CSV log of timestamped feedback vectors.
//!
//! One row per published feedback vector: a seconds-since-start column,
//! then the RPM half, then the DC half. `RIP` slots are written as `NaN`,
//! `PAD` slots as their integer literal, so downstream tooling can tell
//! "slave gone" from "fan not wired".

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Sender, TrySendError};
use log::{error, info, warn};

use fc_types::codes::{MP_STOP_TIMEOUT, PAD, RIP};
use fc_types::error::{FcError, Result};
use fc_types::FeedbackVector;

/// Everything the header needs to describe the run.
#[derive(Debug, Clone)]
pub struct LogSchema {
    /// Master software version string.
    pub version: String,
    /// Module table: (index, name, mac).
    pub slaves: Vec<(usize, String, String)>,
    pub rows: usize,
    pub cols: usize,
    pub layers: usize,
    pub max_fans: usize,
    /// Flattened duty-map description, when one is active.
    pub duty_map: Option<String>,
}

/// Capacity of the writer's inbound channel.
const LOGGER_QUEUE: usize = 256;

enum LoggerMsg {
    Row(FeedbackVector, Instant),
    Stop,
}

/// Handle to a running CSV logger.
pub struct DataLogger {
    tx: Sender<LoggerMsg>,
    join: Option<JoinHandle<()>>,
    path: PathBuf,
    started: Instant,
    dropped_rows: u64,
}

impl DataLogger {
    /// Open `path`, write the header, and spawn the writer thread.
    pub fn start(path: &Path, schema: LogSchema) -> Result<Self> {
        let n_slaves = schema.slaves.len();
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);

        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        writeln!(out, "# Fan Club data log, version {}", schema.version)?;
        writeln!(out, "# started: {}", epoch)?;
        for (index, name, mac) in &schema.slaves {
            writeln!(out, "# module {}: {} ({})", index, name, mac)?;
        }
        writeln!(
            out,
            "# array: {} rows x {} columns x {} layers",
            schema.rows, schema.cols, schema.layers
        )?;
        writeln!(out, "# max fans: {}", schema.max_fans)?;
        if let Some(map) = &schema.duty_map {
            writeln!(out, "# duty map: {}", map)?;
        }

        let mut writer = csv::Writer::from_writer(out);
        let mut columns = Vec::with_capacity(1 + 2 * n_slaves * schema.max_fans);
        columns.push("time".to_string());
        for slave in 0..n_slaves {
            for fan in 0..schema.max_fans {
                columns.push(format!("s{}rpm{}", slave, fan));
            }
        }
        for slave in 0..n_slaves {
            for fan in 0..schema.max_fans {
                columns.push(format!("s{}dc{}", slave, fan));
            }
        }
        writer
            .write_record(&columns)
            .map_err(|e| FcError::new(fc_types::ErrorKind::Io, e.to_string()))?;

        let started = Instant::now();
        let (tx, rx) = bounded::<LoggerMsg>(LOGGER_QUEUE);
        let max_fans = schema.max_fans;
        let join = thread::Builder::new()
            .name("fc-datalog".into())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        LoggerMsg::Row(vector, at) => {
                            if vector.n_slaves() != n_slaves || vector.max_fans() != max_fans {
                                warn!(
                                    target: "datalog",
                                    "dropping row with mismatched shape {}x{}",
                                    vector.n_slaves(),
                                    vector.max_fans()
                                );
                                continue;
                            }
                            let t = at.duration_since(started).as_secs_f64();
                            let mut record = Vec::with_capacity(1 + vector.len());
                            record.push(format!("{:.3}", t));
                            for value in vector.values() {
                                record.push(render_slot(*value));
                            }
                            if let Err(e) = writer.write_record(&record) {
                                error!(target: "datalog", "write failed: {}", e);
                                break;
                            }
                        }
                        LoggerMsg::Stop => break,
                    }
                }
                if let Err(e) = writer.flush() {
                    error!(target: "datalog", "flush failed: {}", e);
                }
            })
            .map_err(|e| FcError::new(fc_types::ErrorKind::Io, e.to_string()))?;

        info!(target: "datalog", "logging to {}", path.display());
        Ok(Self {
            tx,
            join: Some(join),
            path: path.to_path_buf(),
            started,
            dropped_rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seconds since the logger started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Queue one row. Drops the newest row when the writer is behind.
    pub fn push(&mut self, vector: FeedbackVector, at: Instant) {
        match self.tx.try_send(LoggerMsg::Row(vector, at)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_rows += 1;
                if self.dropped_rows % 100 == 1 {
                    warn!(
                        target: "datalog",
                        "writer behind; {} row(s) dropped",
                        self.dropped_rows
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(target: "datalog", "writer thread is gone");
            }
        }
    }

    pub fn dropped_rows(&self) -> u64 {
        self.dropped_rows
    }

    /// Stop the writer, joining within `timeout` (at most `MP_STOP_TIMEOUT`).
    pub fn stop(mut self, timeout: Duration) {
        let deadline = timeout.min(MP_STOP_TIMEOUT);
        let _ = self.tx.send_timeout(LoggerMsg::Stop, deadline);
        if let Some(join) = self.join.take() {
            // The writer exits on Stop or channel disconnect; the file is
            // flushed on the way out. Join failure means a panic upstream.
            if join.join().is_err() {
                error!(target: "datalog", "writer thread panicked; file closed best-effort");
            }
        }
    }
}

fn render_slot(value: i64) -> String {
    if value == RIP {
        "NaN".to_string()
    } else if value == PAD {
        PAD.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(n_slaves: usize, max_fans: usize) -> LogSchema {
        LogSchema {
            version: "IV-1".into(),
            slaves: (0..n_slaves)
                .map(|i| {
                    (
                        i,
                        format!("Module {}", i),
                        format!("AA:BB:CC:DD:EE:{:02X}", i),
                    )
                })
                .collect(),
            rows: 1,
            cols: n_slaves * max_fans,
            layers: 1,
            max_fans,
            duty_map: Some("matrix 1x8".into()),
        }
    }

    #[test]
    fn rows_have_exact_column_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let mut logger = DataLogger::start(&path, schema(2, 4)).unwrap();

        let mut vector = FeedbackVector::rip(2, 4);
        vector.set_rpm(0, 0, 1500);
        vector.set_dc(0, 0, 5000);
        vector.pad_slave(0, 2);
        logger.push(vector.clone(), Instant::now());
        logger.push(vector, Instant::now());
        logger.stop(Duration::from_millis(200));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        // 2 header comments + 2 module lines + array + max fans + duty map
        // + column row + 2 data rows.
        let data: Vec<&str> = lines
            .iter()
            .filter(|l| !l.starts_with('#'))
            .copied()
            .collect();
        assert_eq!(data.len(), 3);
        for line in &data {
            assert_eq!(line.split(',').count(), 1 + 2 * 2 * 4);
        }
    }

    #[test]
    fn sentinels_render_as_nan_and_literal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let mut logger = DataLogger::start(&path, schema(1, 2)).unwrap();

        let mut vector = FeedbackVector::rip(1, 2);
        vector.set_rpm(0, 0, 1200);
        vector.set_dc(0, 0, 4000);
        vector.pad_slave(0, 1);
        logger.push(vector, Instant::now());
        logger.stop(Duration::from_millis(200));

        let contents = std::fs::read_to_string(&path).unwrap();
        let row = contents
            .lines()
            .filter(|l| !l.starts_with('#'))
            .nth(1)
            .unwrap();
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields[1], "1200");
        assert_eq!(fields[2], "-69");
        assert_eq!(fields[3], "4000");
        assert_eq!(fields[4], "-69");
    }

    #[test]
    fn header_names_every_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let logger = DataLogger::start(&path, schema(3, 2)).unwrap();
        logger.stop(Duration::from_millis(200));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("# module 0: Module 0 (AA:BB:CC:DD:EE:00)"));
        assert!(contents.contains("# module 2:"));
        assert!(contents.contains("# duty map: matrix 1x8"));
        let columns = contents
            .lines()
            .find(|l| l.starts_with("time"))
            .unwrap();
        assert!(columns.contains("s0rpm0"));
        assert!(columns.contains("s2dc1"));
    }

    #[test]
    fn mismatched_shape_rows_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let mut logger = DataLogger::start(&path, schema(2, 4)).unwrap();
        logger.push(FeedbackVector::rip(1, 4), Instant::now());
        logger.stop(Duration::from_millis(200));

        let contents = std::fs::read_to_string(&path).unwrap();
        let data_rows = contents
            .lines()
            .filter(|l| !l.starts_with('#') && !l.starts_with("time"))
            .count();
        assert_eq!(data_rows, 0);
    }
}
