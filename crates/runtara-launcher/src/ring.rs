// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fixed-capacity ring buffer shared by the log store and the sample ring.

/// Fixed-capacity circular store that overwrites the oldest entry once full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    wrapped: bool,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a ring holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            head: 0,
            wrapped: false,
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        if self.wrapped {
            self.slots.len()
        } else {
            self.head
        }
    }

    /// Whether the ring holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write an entry, overwriting the oldest one when full.
    pub fn push(&mut self, value: T) {
        self.slots[self.head] = Some(value);
        self.head += 1;
        if self.head == self.slots.len() {
            self.head = 0;
            self.wrapped = true;
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.wrapped = false;
    }

    /// Iterate entries oldest first, unwinding the wraparound.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        let (older, newer) = if self.wrapped {
            (&self.slots[self.head..], &self.slots[..self.head])
        } else {
            (&self.slots[..0], &self.slots[..self.head])
        };
        older.iter().chain(newer.iter()).filter_map(Option::as_ref)
    }

    /// All entries, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// The most recent `n` entries, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<T> {
        let skip = self.len().saturating_sub(n);
        self.iter().skip(skip).cloned().collect()
    }

    /// The oldest entry still held.
    pub fn first(&self) -> Option<&T> {
        self.iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrapped_order() {
        let mut ring = RingBuffer::new(5);
        for i in 0..3 {
            ring.push(i);
        }
        assert_eq!(ring.to_vec(), vec![0, 1, 2]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_wrapped_order() {
        let mut ring = RingBuffer::new(4);
        for i in 0..10 {
            ring.push(i);
        }
        assert_eq!(ring.to_vec(), vec![6, 7, 8, 9]);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.first(), Some(&6));
    }

    #[test]
    fn test_exact_fill_wraps() {
        let mut ring = RingBuffer::new(3);
        for i in 0..3 {
            ring.push(i);
        }
        assert_eq!(ring.to_vec(), vec![0, 1, 2]);
        ring.push(3);
        assert_eq!(ring.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_last_n() {
        let mut ring = RingBuffer::new(20);
        for i in 0..30 {
            ring.push(i);
        }
        let last = ring.last_n(15);
        assert_eq!(last.len(), 15);
        assert_eq!(last[1], 16);
        assert_eq!(ring.last_n(50).len(), 20);
    }

    #[test]
    fn test_clear() {
        let mut ring = RingBuffer::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        ring.clear();
        assert!(ring.is_empty());
        ring.push(4);
        assert_eq!(ring.to_vec(), vec![4]);
    }
}
