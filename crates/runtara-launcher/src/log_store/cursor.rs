// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Log cursors.
//!
//! A cursor is the epoch millisecond of a record followed by a 4-digit
//! sequence number, rendered as 17 ASCII digits (`17000000000000003`).
//! Prefixing a cursor with `-` asks for the page that precedes it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Highest sequence number within one millisecond.
pub const MAX_SEQUENCE: u16 = 9999;

/// Largest millisecond value that fits the 13-digit cursor prefix.
pub const MAX_CURSOR_MILLIS: u64 = 9_999_999_999_999;

const CURSOR_LEN: usize = 17;
const MILLIS_LEN: usize = 13;

/// Totally ordered position of a record in the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    millis: u64,
    seq: u16,
}

impl Cursor {
    /// Build a cursor. Sequence numbers above 9999 roll into the next millisecond.
    pub fn new(millis: u64, seq: u16) -> Self {
        if seq > MAX_SEQUENCE {
            Self {
                millis: millis + u64::from(seq / (MAX_SEQUENCE + 1)),
                seq: seq % (MAX_SEQUENCE + 1),
            }
        } else {
            Self { millis, seq }
        }
    }

    /// Lowest cursor of a millisecond.
    pub fn start_of(millis: u64) -> Self {
        Self { millis, seq: 0 }
    }

    /// Highest cursor of a millisecond.
    pub fn end_of(millis: u64) -> Self {
        Self {
            millis,
            seq: MAX_SEQUENCE,
        }
    }

    /// Highest cursor of the current millisecond.
    pub fn now() -> Self {
        Self::end_of(now_millis())
    }

    /// Epoch milliseconds.
    pub fn millis(&self) -> u64 {
        self.millis
    }

    /// Sequence within the millisecond.
    pub fn seq(&self) -> u16 {
        self.seq
    }

    /// The next possible cursor.
    pub fn successor(&self) -> Self {
        if self.seq == MAX_SEQUENCE {
            Self::start_of(self.millis + 1)
        } else {
            Self {
                millis: self.millis,
                seq: self.seq + 1,
            }
        }
    }

    /// The previous possible cursor, if any.
    pub fn predecessor(&self) -> Option<Self> {
        if self.seq > 0 {
            Some(Self {
                millis: self.millis,
                seq: self.seq - 1,
            })
        } else if self.millis > 0 {
            Some(Self::end_of(self.millis - 1))
        } else {
            None
        }
    }

    /// UTC calendar day the cursor falls on.
    pub fn day(&self) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(self.millis as i64)
            .unwrap_or_default()
            .date_naive()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:013}{:04}", self.millis, self.seq)
    }
}

/// A cursor string that is not 17 ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid cursor: {0}")]
pub struct InvalidCursor(pub String);

impl FromStr for Cursor {
    type Err = InvalidCursor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CURSOR_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidCursor(s.to_string()));
        }
        let millis = s[..MILLIS_LEN]
            .parse()
            .map_err(|_| InvalidCursor(s.to_string()))?;
        let seq = s[MILLIS_LEN..]
            .parse()
            .map_err(|_| InvalidCursor(s.to_string()))?;
        Ok(Self { millis, seq })
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a log query starts and which way it walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorQuery {
    /// The most recent entries.
    Latest,
    /// Entries at or after the cursor.
    Forward(Cursor),
    /// Entries at or before the cursor.
    Backward(Cursor),
}

impl CursorQuery {
    /// Parse the wire form: absent, `<cursor>`, or `-<cursor>`.
    pub fn parse(raw: Option<&str>) -> Result<Self, InvalidCursor> {
        match raw {
            None => Ok(Self::Latest),
            Some(s) if s.is_empty() => Ok(Self::Latest),
            Some(s) => match s.strip_prefix('-') {
                Some(rest) => rest.parse().map(Self::Backward),
                None => s.parse().map(Self::Forward),
            },
        }
    }
}

/// Issues strictly increasing cursors.
#[derive(Debug, Default, Clone)]
pub struct CursorClock {
    last: Option<Cursor>,
}

impl CursorClock {
    /// Create a clock with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a cursor for a record stamped `millis`.
    ///
    /// Records sharing a millisecond get increasing sequence numbers. A stamp
    /// older than the last issued cursor is moved forward past it.
    pub fn next(&mut self, millis: u64) -> Cursor {
        let cursor = match self.last {
            Some(last) if millis <= last.millis => last.successor(),
            _ => Cursor::start_of(millis),
        };
        self.last = Some(cursor);
        cursor
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_17_digits() {
        let cursor = Cursor::new(1_700_000_000_123, 7);
        assert_eq!(cursor.to_string(), "17000000001230007");
        assert_eq!(cursor.to_string().len(), 17);
    }

    #[test]
    fn test_parse_roundtrip() {
        let cursor: Cursor = "17000000001230042".parse().unwrap();
        assert_eq!(cursor.millis(), 1_700_000_000_123);
        assert_eq!(cursor.seq(), 42);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("".parse::<Cursor>().is_err());
        assert!("1700000000123004".parse::<Cursor>().is_err());
        assert!("170000000012300a2".parse::<Cursor>().is_err());
        assert!("+7000000001230042".parse::<Cursor>().is_err());
    }

    #[test]
    fn test_query_parse() {
        assert_eq!(CursorQuery::parse(None).unwrap(), CursorQuery::Latest);
        assert_eq!(
            CursorQuery::parse(Some("-17000000001230000")).unwrap(),
            CursorQuery::Backward(Cursor::start_of(1_700_000_000_123))
        );
        assert_eq!(
            CursorQuery::parse(Some("17000000001230000")).unwrap(),
            CursorQuery::Forward(Cursor::start_of(1_700_000_000_123))
        );
        assert!(CursorQuery::parse(Some("--17000000001230000")).is_err());
    }

    #[test]
    fn test_clock_same_millisecond() {
        let mut clock = CursorClock::new();
        let a = clock.next(1000);
        let b = clock.next(1000);
        let c = clock.next(1001);
        assert_eq!(a, Cursor::new(1000, 0));
        assert_eq!(b, Cursor::new(1000, 1));
        assert_eq!(c, Cursor::new(1001, 0));
    }

    #[test]
    fn test_clock_wraps_into_next_millisecond() {
        let mut clock = CursorClock::new();
        let mut last = clock.next(5);
        for _ in 0..MAX_SEQUENCE {
            last = clock.next(5);
        }
        assert_eq!(last, Cursor::end_of(5));
        assert_eq!(clock.next(5), Cursor::start_of(6));
    }

    #[test]
    fn test_clock_never_goes_backwards() {
        let mut clock = CursorClock::new();
        let a = clock.next(2000);
        let b = clock.next(1500);
        assert!(b > a);
    }

    #[test]
    fn test_successor_predecessor() {
        let cursor = Cursor::end_of(10);
        assert_eq!(cursor.successor(), Cursor::start_of(11));
        assert_eq!(Cursor::start_of(11).predecessor(), Some(cursor));
        assert_eq!(Cursor::start_of(0).predecessor(), None);
    }

    #[test]
    fn test_serde_as_string() {
        let cursor = Cursor::new(1_700_000_000_000, 1);
        let json = serde_json::to_string(&cursor).unwrap();
        assert_eq!(json, "\"17000000000000001\"");
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cursor);
    }
}
