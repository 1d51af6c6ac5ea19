//! Bounded engine output buffer.

use std::collections::VecDeque;

/// Ring buffer of the most recent engine output lines.
///
/// Pushing beyond capacity drops the oldest line.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogBuffer {
    /// Create an empty buffer. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a line, removing the oldest if at capacity.
    pub fn push(&mut self, line: String) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest() {
        let mut buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(format!("line {i}"));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.tail(10), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn tail_returns_most_recent_in_order() {
        let mut buffer = LogBuffer::new(300);
        for i in 0..10 {
            buffer.push(i.to_string());
        }
        assert_eq!(buffer.tail(2), vec!["8", "9"]);
        assert!(buffer.tail(0).is_empty());
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut buffer = LogBuffer::new(300);
        for i in 0..1000 {
            buffer.push(i.to_string());
            assert!(buffer.len() <= buffer.capacity());
        }
        assert_eq!(buffer.tail(1), vec!["999"]);
    }
}
