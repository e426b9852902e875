//! Numbered-line history for resend requests

use std::collections::VecDeque;

/// Ring buffer of the most recently sent numbered lines
///
/// Entries keep the exact wire bytes so a resend repeats the original
/// transmission.
#[derive(Debug, Clone)]
pub struct LineHistory {
    capacity: usize,
    entries: VecDeque<(u32, Vec<u8>)>,
}

impl LineHistory {
    /// Create an empty history holding at most `capacity` lines
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a sent line, evicting the oldest when full
    pub fn push(&mut self, line: u32, encoded: Vec<u8>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((line, encoded));
    }

    /// Wire bytes of a retained line
    pub fn get(&self, line: u32) -> Option<&[u8]> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| *n == line)
            .map(|(_, bytes)| bytes.as_slice())
    }

    /// Most recently sent line
    pub fn last(&self) -> Option<(u32, &[u8])> {
        self.entries
            .back()
            .map(|(n, bytes)| (*n, bytes.as_slice()))
    }

    /// Number of retained lines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no line is retained
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained lines
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget every line
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Resend request being serviced
///
/// `delta` counts the lines still to replay; the next replayed line is
/// `current_line - delta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingResend {
    /// Line the printer asked for
    pub target_line: u32,
    /// Lines left to replay
    pub delta: u32,
}
