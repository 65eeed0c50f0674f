use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{Level, LevelFilter};

use crate::clock::Timestamp;

/// Where human-readable run output goes. Clones share the same sink.
#[derive(Clone)]
pub struct Console {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Console {
    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// A console that records everything written to it.
    pub fn capture() -> (Self, CapturedOutput) {
        let captured = CapturedOutput::default();
        (Self::from_writer(captured.clone()), captured)
    }

    /// Console output never aborts a run; failures go to the `log` facade.
    pub fn line(&self, text: &str) {
        let result = match self.sink.lock() {
            Ok(mut sink) => writeln!(sink, "{}", text).and_then(|_| sink.flush()),
            Err(_) => Err(io::Error::other("console sink poisoned")),
        };
        if let Err(e) = result {
            log::warn!("Console write failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

/// In-memory console buffer.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .map_err(|_| io::Error::other("capture buffer poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The `report.log` of a run, filtered by severity. The file is created on
/// the first record that passes the filter.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    progname: String,
    level: LevelFilter,
    file: Option<BufWriter<File>>,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>, progname: impl Into<String>, level: LevelFilter) -> Self {
        Self {
            path: path.into(),
            progname: progname.into(),
            level,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.file = Some(BufWriter::new(file));
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("report log unavailable"))
    }

    /// Appends one record, e.g.
    /// `I, [2024-01-01T12:00:00.000000 #4242]  INFO -- ImportUsers: message`.
    pub fn write(&mut self, level: Level, message: &str, at: Timestamp) -> io::Result<()> {
        if !self.enabled(level) {
            return Ok(());
        }
        let line = format_record(level, message, at, &self.progname);
        let writer = self.writer()?;
        writer.write_all(line.as_bytes())?;
        writer.flush()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

fn format_record(level: Level, message: &str, at: Timestamp, progname: &str) -> String {
    let label = match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    };
    format!(
        "{}, [{} #{}] {:>5} -- {}: {}\n",
        &label[..1],
        at.format("%Y-%m-%dT%H:%M:%S%.6f"),
        std::process::id(),
        label,
        progname,
        message
    )
}
