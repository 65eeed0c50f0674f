use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::ReportError;

/// Writable handle to one report file. Clones share the same underlying file;
/// once closed, every clone refuses further writes.
#[derive(Debug, Clone)]
pub struct OutputFile {
    path: PathBuf,
    inner: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl OutputFile {
    fn create(path: PathBuf) -> io::Result<Self> {
        let file = File::create(&path)?;
        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(Some(BufWriter::new(file)))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if both handles refer to the same open file.
    pub fn ptr_eq(&self, other: &OutputFile) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }

    fn with<R>(&self, f: impl FnOnce(&mut BufWriter<File>) -> io::Result<R>) -> io::Result<R> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other(format!("{} is poisoned", self.path.display())))?;
        match guard.as_mut() {
            Some(writer) => f(writer),
            None => Err(io::Error::other(format!("{} is closed", self.path.display()))),
        }
    }

    /// Flushes and releases the file.
    pub fn close(&self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other(format!("{} is poisoned", self.path.display())))?;
        match guard.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Write for &OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with(|writer| writer.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with(|writer| writer.flush())
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self).flush()
    }
}

/// Manages the output files of one run inside its report directory.
#[derive(Debug)]
pub struct OutputFiles {
    directory: PathBuf,
    open_files: HashMap<String, OutputFile>,
}

impl OutputFiles {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            open_files: HashMap::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Opens `file_name` (which may contain subdirectories) for writing, or
    /// returns the handle opened earlier under the same name.
    pub fn open(&mut self, file_name: &str) -> Result<OutputFile, ReportError> {
        if let Some(file) = self.open_files.get(file_name) {
            return Ok(file.clone());
        }

        let path = self.directory.join(file_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReportError::io_error(parent, e))?;
        }
        let file = OutputFile::create(path.clone()).map_err(|e| ReportError::io_error(&path, e))?;
        debug!("Opened output file {}", path.display());

        self.open_files.insert(file_name.to_string(), file.clone());
        Ok(file)
    }

    pub fn flush(&self) -> Result<(), ReportError> {
        for file in self.open_files.values() {
            (&*file)
                .flush()
                .map_err(|e| ReportError::io_error(file.path(), e))?;
        }
        Ok(())
    }

    /// Closes every open file and empties the table. All files are closed even
    /// if one fails; the first failure is returned.
    pub fn close(&mut self) -> Result<(), ReportError> {
        let mut first_error = None;
        for (_, file) in self.open_files.drain() {
            if let Err(e) = file.close() {
                first_error.get_or_insert_with(|| ReportError::io_error(file.path(), e));
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.open_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open_files.is_empty()
    }
}
