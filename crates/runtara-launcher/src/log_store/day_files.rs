// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Day-rotated log files.
//!
//! Layout of the log directory:
//! - `current.log` - records of the active day, one JSON object per line
//! - `YYYY-MM-DD.log` - records of a finished day
//!
//! When a record for a later day arrives, `current.log` is renamed after the
//! day it holds and dated files older than the retention window are removed.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate, Utc};
use tracing::{debug, info, warn};

use super::LogRecord;
use super::cursor::Cursor;
use crate::error::{Error, Result};

/// Name of the file holding the active day.
pub const CURRENT_FILE: &str = "current.log";

/// Days a finished log file is kept.
pub const RETENTION_DAYS: u64 = 7;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Append-only store of log records split into one file per day.
#[derive(Debug)]
pub struct DayFileStore {
    dir: PathBuf,
    current: File,
    current_day: NaiveDate,
    oldest: Option<Cursor>,
    retention_days: u64,
}

impl DayFileStore {
    /// Open (or create) a store in `dir`.
    ///
    /// A `current.log` left behind by an earlier run on a previous day is
    /// rotated immediately.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| log_io("create log directory", &dir, e))?;

        let today = Utc::now().date_naive();
        let current_path = dir.join(CURRENT_FILE);
        let current_day = first_record(&current_path)
            .map(|record| record.ts.day())
            .unwrap_or(today);

        let current = open_append(&current_path)?;
        let mut store = Self {
            dir,
            current,
            current_day,
            oldest: None,
            retention_days: RETENTION_DAYS,
        };

        if current_day < today {
            store.rotate(today)?;
        } else {
            store.refresh_oldest();
        }
        Ok(store)
    }

    /// Directory holding the log files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Day whose records `current.log` holds.
    pub fn current_day(&self) -> NaiveDate {
        self.current_day
    }

    /// Oldest cursor still on disk.
    pub fn oldest(&self) -> Option<Cursor> {
        self.oldest
    }

    /// Append a record, rotating first if it belongs to a later day.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let day = record.ts.day();
        if day > self.current_day {
            self.rotate(day)?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.current
            .write_all(line.as_bytes())
            .map_err(|e| log_io("append to", &self.dir.join(CURRENT_FILE), e))?;

        if self.oldest.is_none() {
            self.oldest = Some(record.ts);
        }
        Ok(())
    }

    /// Close out the current day and start `new_day`.
    fn rotate(&mut self, new_day: NaiveDate) -> Result<()> {
        let current_path = self.dir.join(CURRENT_FILE);
        let dated_path = self.dated_path(self.current_day);

        info!(
            from = %self.current_day,
            to = %new_day,
            "Rotating log file"
        );

        if dated_path.exists() {
            // Same day seen twice (clock moved back across a restart): keep both halves.
            let contents =
                fs::read(&current_path).map_err(|e| log_io("read", &current_path, e))?;
            let mut dated = open_append(&dated_path)?;
            dated
                .write_all(&contents)
                .map_err(|e| log_io("append to", &dated_path, e))?;
            fs::remove_file(&current_path).map_err(|e| log_io("remove", &current_path, e))?;
        } else {
            fs::rename(&current_path, &dated_path)
                .map_err(|e| log_io("rename", &current_path, e))?;
        }

        self.current = open_append(&current_path)?;
        self.current_day = new_day;
        self.prune(new_day);
        self.refresh_oldest();
        Ok(())
    }

    /// Remove dated files older than the retention window.
    fn prune(&self, today: NaiveDate) {
        let Some(cutoff) = today.checked_sub_days(Days::new(self.retention_days)) else {
            return;
        };
        for (day, path) in self.dated_files() {
            if day >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed expired log file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove expired log file"),
            }
        }
    }

    /// Re-read the oldest cursor from the oldest file on disk.
    fn refresh_oldest(&mut self) {
        self.oldest = self
            .files_from(NaiveDate::MIN)
            .into_iter()
            .find_map(|path| first_record(&path))
            .map(|record| record.ts);
    }

    /// Dated files in the directory, sorted by day.
    fn dated_files(&self) -> Vec<(NaiveDate, PathBuf)> {
        let mut files = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.dir.display(), error = %e, "Failed to list log directory");
                return files;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".log")) else {
                continue;
            };
            if let Ok(day) = NaiveDate::parse_from_str(stem, DAY_FORMAT) {
                files.push((day, entry.path()));
            }
        }
        files.sort_by_key(|(day, _)| *day);
        files
    }

    /// Files that can hold records from `start_day` onwards, oldest first.
    pub fn files_from(&self, start_day: NaiveDate) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .dated_files()
            .into_iter()
            .filter(|(day, _)| *day >= start_day && *day < self.current_day)
            .map(|(_, path)| path)
            .collect();
        files.push(self.dir.join(CURRENT_FILE));
        files
    }

    /// Files that can hold records up to `end_day`, newest first.
    pub fn files_until(&self, end_day: NaiveDate) -> Vec<PathBuf> {
        let mut files = Vec::new();
        if end_day >= self.current_day {
            files.push(self.dir.join(CURRENT_FILE));
        }
        let mut dated: Vec<PathBuf> = self
            .dated_files()
            .into_iter()
            .filter(|(day, _)| *day <= end_day && *day < self.current_day)
            .map(|(_, path)| path)
            .collect();
        dated.reverse();
        files.extend(dated);
        files
    }

    fn dated_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.log", day.format(DAY_FORMAT)))
    }
}

/// Read every parseable record of a log file, in file order.
pub fn read_records(path: &Path) -> Vec<LogRecord> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to open log file");
            return Vec::new();
        }
    };
    BufReader::new(file)
        .lines()
        .map_while(std::result::Result::ok)
        .filter_map(|line| serde_json::from_str(&line).ok())
        .collect()
}

fn first_record(path: &Path) -> Option<LogRecord> {
    let file = File::open(path).ok()?;
    BufReader::new(file)
        .lines()
        .map_while(std::result::Result::ok)
        .find_map(|line| serde_json::from_str(&line).ok())
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| log_io("open", path, e))
}

fn log_io(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::LogIo(format!("failed to {} {}: {}", action, path.display(), e))
}
