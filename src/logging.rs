//! Per-partition log handles and the shared error log.
//!
//! Each partition gets its own [`PartitionLog`], created when its pipeline
//! starts and dropped when it ends. Lines go to `<log_dir>/<area>.log` and
//! are mirrored as `tracing` events tagged with the area.
//!
//! [`ErrorLog`] is the one file written by every worker. It is opened in
//! append mode and each record is a single `write_all`, so concurrent
//! writers never interleave within a record.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y%m%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

/// Logger handle scoped to one partition.
#[derive(Debug)]
pub struct PartitionLog {
    area: String,
    file: Option<File>,
    path: Option<PathBuf>,
}

impl PartitionLog {
    /// Open `<log_dir>/<area>.log` for appending.
    pub fn open(log_dir: &Path, area: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!("{}.log", area));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            area: area.to_string(),
            file: Some(file),
            path: Some(path),
        })
    }

    /// A handle that only emits `tracing` events.
    pub fn console(area: &str) -> Self {
        Self {
            area: area.to_string(),
            file: None,
            path: None,
        }
    }

    pub fn area(&self) -> &str {
        &self.area
    }

    /// Path of the backing log file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn debug(&self, message: impl Display) {
        self.emit(Level::Debug, message);
    }

    pub fn info(&self, message: impl Display) {
        self.emit(Level::Info, message);
    }

    pub fn warn(&self, message: impl Display) {
        self.emit(Level::Warn, message);
    }

    pub fn error(&self, message: impl Display) {
        self.emit(Level::Error, message);
    }

    fn emit(&self, level: Level, message: impl Display) {
        let message = message.to_string();
        match level {
            Level::Debug => tracing::debug!(area = %self.area, "{}", message),
            Level::Info => tracing::info!(area = %self.area, "{}", message),
            Level::Warn => tracing::warn!(area = %self.area, "{}", message),
            Level::Error => tracing::error!(area = %self.area, "{}", message),
        }

        if let Some(file) = &self.file {
            let line = format!(
                "{:<8} {} - {}: {}\n",
                level.label(),
                chrono::Local::now().format(DATE_FORMAT),
                self.area,
                message
            );
            if let Err(e) = (&*file).write_all(line.as_bytes()) {
                tracing::warn!(area = %self.area, "Failed to write partition log: {}", e);
            }
        }
    }
}

/// Append-only error log shared by all workers.
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    file: File,
}

impl ErrorLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record for an area.
    pub fn record(&self, area: &str, message: impl Display) {
        let line = format!(
            "{} {}: {}\n",
            chrono::Local::now().format(DATE_FORMAT),
            area,
            message
        );
        if let Err(e) = (&self.file).write_all(line.as_bytes()) {
            tracing::warn!("Failed to append to {}: {}", self.path.display(), e);
        }
    }
}
