// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Log store for launcher and runtime output.
//!
//! [`RingLog`] keeps the most recent records in memory and, when given a
//! directory, mirrors every record to day-rotated files so that older pages
//! remain reachable through cursor queries.
//!
//! ```text
//!   add(entry) ──► CursorClock ──► RingBuffer (last N records)
//!                                   │
//!                                   └──► DayFileStore (current.log, YYYY-MM-DD.log)
//!
//!   get_entries(cursor, limit) ──► files covering start..today (or the ring)
//!                              ──► LogPage { entries, next, previous }
//! ```

pub mod cursor;
pub mod day_files;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ring::RingBuffer;
use cursor::{Cursor, CursorClock, CursorQuery, MAX_CURSOR_MILLIS, now_millis};
use day_files::{DayFileStore, read_records};

/// Level used for records produced by the launcher itself.
pub const LEVEL_SYSTEM: &str = "system";

/// Default in-memory capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default page size for cursor queries.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Largest page a cursor query returns.
pub const MAX_PAGE_LIMIT: usize = 500;

/// How far ahead of the wall clock a supplied timestamp may be.
pub const MAX_CLOCK_SKEW_MS: u64 = 5_000;

/// A stored log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Cursor of the record.
    pub ts: Cursor,
    /// Level (`system`, `info`, `warn`, `error`, ... as emitted).
    pub level: String,
    /// Message text.
    pub msg: String,
    /// Source id of the launcher instance that stored the record.
    pub src: String,
    /// Extra structured fields carried by the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// A record before it has been assigned a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Millisecond timestamp; the current time is used when absent.
    pub ts: Option<u64>,
    /// Level.
    pub level: String,
    /// Message text.
    pub msg: String,
    /// Source id; the log's own id is used when absent.
    pub src: Option<String>,
    /// Extra structured fields.
    pub payload: Option<Value>,
}

impl LogEntry {
    /// An entry with the given level and message.
    pub fn new(level: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            ts: None,
            level: level.into(),
            msg: msg.into(),
            src: None,
            payload: None,
        }
    }

    /// A launcher (`system` level) entry.
    pub fn system(msg: impl Into<String>) -> Self {
        Self::new(LEVEL_SYSTEM, msg)
    }

    /// Set an explicit timestamp.
    pub fn at(mut self, millis: u64) -> Self {
        self.ts = Some(millis);
        self
    }

    /// Attach structured fields.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// One page of a cursor query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogPage {
    /// Entries in ascending cursor order.
    pub entries: Vec<LogRecord>,
    /// Cursor for the following page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Cursor (with `-` prefix) for the preceding page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
}

/// Fixed-capacity log of structured records with optional file backing.
#[derive(Debug)]
pub struct RingLog {
    ring: RingBuffer<LogRecord>,
    clock: CursorClock,
    source_id: String,
    store: Option<DayFileStore>,
}

impl RingLog {
    /// Memory-only log holding `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self::with_source_id(capacity, host_source_id())
    }

    /// Memory-only log with an explicit source id.
    pub fn with_source_id(capacity: usize, source_id: impl Into<String>) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            clock: CursorClock::new(),
            source_id: source_id.into(),
            store: None,
        }
    }

    /// Log mirrored to day-rotated files under `dir`.
    pub fn with_file_store(capacity: usize, dir: impl Into<PathBuf>) -> Result<Self> {
        let mut log = Self::new(capacity);
        log.store = Some(DayFileStore::open(dir)?);
        Ok(log)
    }

    /// Source id stamped on records without one.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Maximum number of in-memory records.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Number of in-memory records.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether no records are held in memory.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Store an entry and return the record that was written.
    ///
    /// A supplied timestamp is only honoured when it fits the cursor format
    /// and is not ahead of the wall clock by more than [`MAX_CLOCK_SKEW_MS`];
    /// otherwise the current time is used.
    pub fn add(&mut self, entry: LogEntry) -> LogRecord {
        let now = now_millis();
        let millis = match entry.ts {
            Some(ts) if ts <= MAX_CURSOR_MILLIS && ts <= now + MAX_CLOCK_SKEW_MS => ts,
            Some(ts) => {
                debug!(ts, "Replacing out-of-range record timestamp");
                now
            }
            None => now,
        };
        let ts = self.clock.next(millis);
        let record = LogRecord {
            ts,
            level: entry.level,
            msg: entry.msg,
            src: entry.src.unwrap_or_else(|| self.source_id.clone()),
            payload: entry.payload,
        };

        if record.level == LEVEL_SYSTEM {
            info!(target: "runtara_launcher::runtime", "{}", record.msg);
        }

        self.ring.push(record.clone());

        if let Some(store) = self.store.as_mut()
            && let Err(e) = store.append(&record)
        {
            warn!(error = %e, "Failed to persist log record");
        }

        record
    }

    /// Store a `system` level message.
    pub fn system(&mut self, msg: impl Into<String>) -> LogRecord {
        self.add(LogEntry::system(msg))
    }

    /// In-memory records, oldest first.
    pub fn to_vec(&self) -> Vec<LogRecord> {
        self.ring.to_vec()
    }

    /// The most recent `n` in-memory records, oldest first.
    pub fn last_lines(&self, n: usize) -> Vec<LogRecord> {
        self.ring.last_n(n)
    }

    /// Drop the in-memory records. Files on disk are kept.
    pub fn clear(&mut self) {
        self.ring.clear();
    }

    /// Oldest cursor the log can still return.
    pub fn oldest(&self) -> Option<Cursor> {
        match &self.store {
            Some(store) => store.oldest(),
            None => self.ring.first().map(|record| record.ts),
        }
    }

    /// Query a page of records.
    ///
    /// `cursor` is absent for the latest page, a 17-digit cursor to walk
    /// forward from it, or `-` followed by a cursor to walk backward from it.
    /// Malformed cursors yield an empty page. `limit` is clamped to
    /// `1..=500` and defaults to 100.
    pub fn get_entries(&self, cursor: Option<&str>, limit: Option<usize>) -> LogPage {
        match CursorQuery::parse(cursor) {
            Ok(query) => self.query(query, limit),
            Err(e) => {
                warn!(error = %e, "Rejected log query");
                LogPage::default()
            }
        }
    }

    /// Query a page of records from an already parsed cursor.
    pub fn query(&self, query: CursorQuery, limit: Option<usize>) -> LogPage {
        let limit = limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let now = Cursor::now();

        match query {
            CursorQuery::Latest => self.walk_backward(now, limit),
            CursorQuery::Backward(start) => self.walk_backward(start.min(now), limit),
            CursorQuery::Forward(start) => {
                if start > now {
                    return LogPage {
                        entries: Vec::new(),
                        next: Some(start.to_string()),
                        previous: None,
                    };
                }
                let start = match self.oldest() {
                    Some(oldest) if oldest > start => oldest,
                    _ => start,
                };
                self.walk_forward(start, limit)
            }
        }
    }

    fn walk_forward(&self, start: Cursor, limit: usize) -> LogPage {
        let mut entries = Vec::with_capacity(limit);
        match &self.store {
            Some(store) => {
                'files: for path in store.files_from(start.day()) {
                    for record in read_records(&path) {
                        if record.ts < start {
                            continue;
                        }
                        entries.push(record);
                        if entries.len() == limit {
                            break 'files;
                        }
                    }
                }
            }
            None => {
                entries.extend(
                    self.ring
                        .iter()
                        .filter(|record| record.ts >= start)
                        .take(limit)
                        .cloned(),
                );
            }
        }

        if entries.is_empty() {
            return LogPage {
                entries,
                next: Some(start.to_string()),
                previous: start.predecessor().map(|c| format!("-{}", c)),
            };
        }
        page(entries)
    }

    fn walk_backward(&self, start: Cursor, limit: usize) -> LogPage {
        let mut newest_first = Vec::with_capacity(limit);
        match &self.store {
            Some(store) => {
                'files: for path in store.files_until(start.day()) {
                    for record in read_records(&path).into_iter().rev() {
                        if record.ts > start {
                            continue;
                        }
                        newest_first.push(record);
                        if newest_first.len() == limit {
                            break 'files;
                        }
                    }
                }
            }
            None => {
                newest_first.extend(
                    self.ring
                        .iter()
                        .rev()
                        .filter(|record| record.ts <= start)
                        .take(limit)
                        .cloned(),
                );
            }
        }

        if newest_first.is_empty() {
            return LogPage {
                entries: Vec::new(),
                next: Some(start.successor().to_string()),
                previous: None,
            };
        }
        newest_first.reverse();
        page(newest_first)
    }
}

fn page(entries: Vec<LogRecord>) -> LogPage {
    let next = entries.last().map(|record| record.ts.successor().to_string());
    let previous = entries
        .first()
        .and_then(|record| record.ts.predecessor())
        .map(|c| format!("-{}", c));
    LogPage {
        entries,
        next,
        previous,
    }
}

/// Short id of this host, used to tell apart records from different launchers.
pub fn host_source_id() -> String {
    let hostname = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    let digest = Sha256::digest(hostname.as_bytes());
    hex::encode(digest)[..4].to_string()
}
