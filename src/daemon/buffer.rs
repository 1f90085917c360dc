//! Ring buffer for session line history
//!
//! The RingBuffer stores recent output lines from a session, enabling
//! "late attach" - a control client querying a session and seeing what
//! happened before it connected, or a reconnecting wrapper replaying its
//! local mirror into a daemon-side buffer that was just cleared.

/// A fixed-capacity ring buffer of lines, each tagged with a monotonically
/// increasing sequence number.
///
/// When the buffer is full, the oldest line is overwritten by the newest.
/// `total_seq` keeps counting past `cap` so callers can tell which
/// sequence numbers have been evicted.
pub struct RingBuffer {
    lines: Vec<Option<String>>,
    cap: usize,
    count: usize,
    head: usize,
    total_seq: u64,
}

/// Result of a cursor-paginated read.
pub struct ReadRange {
    pub lines: Vec<String>,
    pub next_cursor: u64,
    pub has_more: bool,
}

/// One search hit: the line's sequence number and its text.
pub struct SearchHit {
    pub seq: u64,
    pub line: String,
}

impl RingBuffer {
    /// Create a new ring buffer. A non-positive `cap` is replaced with the
    /// default capacity of 10,000 lines.
    pub fn new(cap: i64) -> Self {
        let cap = if cap > 0 {
            cap as usize
        } else {
            crate::config::DEFAULT_BUFFER_CAPACITY
        };
        Self {
            lines: (0..cap).map(|_| None).collect(),
            cap,
            count: 0,
            head: 0,
            total_seq: 0,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn total_seq(&self) -> u64 {
        self.total_seq
    }

    /// Sequence number of the oldest retained line.
    pub fn oldest_seq(&self) -> u64 {
        self.total_seq - self.count as u64
    }

    /// Append a line, returning its assigned sequence number.
    pub fn append(&mut self, line: String) -> u64 {
        let seq = self.total_seq;
        self.lines[self.head] = Some(line);
        self.head = (self.head + 1) % self.cap;
        if self.count < self.cap {
            self.count += 1;
        }
        self.total_seq += 1;
        seq
    }

    /// The last `min(n, count)` lines, oldest-to-newest. `n <= 0` returns
    /// empty.
    pub fn last_n(&self, n: i64) -> Vec<String> {
        if n <= 0 || self.count == 0 {
            return Vec::new();
        }
        let take = std::cmp::min(n as usize, self.count);
        let start = (self.head + self.cap - take) % self.cap;
        (0..take)
            .map(|i| self.lines[(start + i) % self.cap].clone().unwrap())
            .collect()
    }

    /// Cursor-paginated read starting at sequence `from`, returning up to
    /// `count` lines.
    pub fn read_range(&self, from: u64, count: i64) -> ReadRange {
        let oldest = self.oldest_seq();
        let from = if from < oldest { oldest } else { from };

        if self.count == 0 || count <= 0 || from >= self.total_seq {
            return ReadRange {
                lines: Vec::new(),
                next_cursor: from,
                has_more: false,
            };
        }

        let available = self.total_seq - from;
        let take = std::cmp::min(count as u64, available) as usize;
        let offset_from_oldest = (from - oldest) as usize;
        let start = (self.head + self.cap - self.count + offset_from_oldest) % self.cap;
        let lines: Vec<String> = (0..take)
            .map(|i| self.lines[(start + i) % self.cap].clone().unwrap())
            .collect();
        let next = from + lines.len() as u64;
        ReadRange {
            has_more: next < self.total_seq,
            next_cursor: next,
            lines,
        }
    }

    /// Case-insensitive substring search across currently retained lines,
    /// oldest-to-newest, capped at `max` results. An empty pattern matches
    /// every retained line up to `max`.
    pub fn search(&self, pattern: &str, max: usize) -> Vec<SearchHit> {
        if max == 0 || self.count == 0 {
            return Vec::new();
        }
        let needle = pattern.to_lowercase();
        let oldest = self.oldest_seq();
        let start = (self.head + self.cap - self.count) % self.cap;
        let mut hits = Vec::new();
        for i in 0..self.count {
            let line = self.lines[(start + i) % self.cap].as_ref().unwrap();
            if needle.is_empty() || line.to_lowercase().contains(&needle) {
                hits.push(SearchHit {
                    seq: oldest + i as u64,
                    line: line.clone(),
                });
                if hits.len() == max {
                    break;
                }
            }
        }
        hits
    }

    /// Snapshot of all retained lines, oldest-to-newest.
    pub fn all_lines(&self) -> Vec<String> {
        self.last_n(self.count as i64)
    }

    /// Change capacity, discarding any retained lines. A non-positive `cap`
    /// is replaced with the default capacity, matching `new`.
    pub fn set_cap(&mut self, cap: i64) {
        let cap = if cap > 0 {
            cap as usize
        } else {
            crate::config::DEFAULT_BUFFER_CAPACITY
        };
        self.lines = (0..cap).map(|_| None).collect();
        self.cap = cap;
        self.head = 0;
        self.count = 0;
    }

    /// Reset to empty. Used on reconnection so an authoritative `replay`
    /// can repopulate the buffer from scratch.
    pub fn clear(&mut self) {
        for slot in self.lines.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.count = 0;
        self.total_seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_cap_defaults() {
        let buf = RingBuffer::new(0);
        assert_eq!(buf.cap(), crate::config::DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn append_and_last_n() {
        let mut buf = RingBuffer::new(10);
        for line in ["a", "b", "c"] {
            buf.append(line.to_string());
        }
        assert_eq!(buf.last_n(10), vec!["a", "b", "c"]);
        assert_eq!(buf.last_n(0), Vec::<String>::new());
    }

    #[test]
    fn sequence_numbers_are_dense() {
        let mut buf = RingBuffer::new(10);
        for (i, line) in ["a", "b", "c"].iter().enumerate() {
            assert_eq!(buf.append(line.to_string()), i as u64);
        }
    }

    #[test]
    fn eviction_boundary() {
        let mut buf = RingBuffer::new(3);
        for n in 1..=5 {
            buf.append(n.to_string());
        }
        assert_eq!(buf.count(), 3);
        assert_eq!(buf.oldest_seq(), 2);
        assert_eq!(buf.last_n(10), vec!["3", "4", "5"]);

        let page = buf.read_range(0, 100);
        assert_eq!(page.lines, vec!["3", "4", "5"]);
        assert_eq!(page.next_cursor, 5);
        assert!(!page.has_more);
    }

    #[test]
    fn cursor_pagination_visits_every_line_once() {
        let mut buf = RingBuffer::new(100);
        for n in 1..=10 {
            buf.append(n.to_string());
        }
        let page1 = buf.read_range(3, 4);
        assert_eq!(page1.lines, vec!["4", "5", "6", "7"]);
        assert_eq!(page1.next_cursor, 7);
        assert!(page1.has_more);

        let page2 = buf.read_range(page1.next_cursor, 100);
        assert_eq!(page2.lines, vec!["8", "9", "10"]);
        assert_eq!(page2.next_cursor, 10);
        assert!(!page2.has_more);
    }

    #[test]
    fn read_range_clamps_stale_cursor() {
        let mut buf = RingBuffer::new(3);
        for n in 1..=5 {
            buf.append(n.to_string());
        }
        let page = buf.read_range(0, 2);
        assert_eq!(page.lines, vec!["3", "4"]);
    }

    #[test]
    fn search_is_case_insensitive_and_ordered() {
        let mut buf = RingBuffer::new(10);
        for line in ["hello world", "foo", "Hello again", "bye", "HELLO end"] {
            buf.append(line.to_string());
        }
        let hits = buf.search("hello", 10);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].line, "hello world");
        assert_eq!(hits[1].line, "Hello again");
        assert_eq!(hits[2].line, "HELLO end");
        assert!(hits.windows(2).all(|w| w[0].seq < w[1].seq));

        let capped = buf.search("hello", 1);
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].line, "hello world");
    }

    #[test]
    fn set_cap_shrinks_and_discards_retained_lines() {
        let mut buf = RingBuffer::new(10);
        for line in ["a", "b", "c"] {
            buf.append(line.to_string());
        }
        buf.set_cap(2);
        assert_eq!(buf.cap(), 2);
        assert_eq!(buf.count(), 0);
        buf.append("x".to_string());
        buf.append("y".to_string());
        buf.append("z".to_string());
        assert_eq!(buf.count(), 2);
        assert_eq!(buf.last_n(10), vec!["y", "z"]);
    }

    #[test]
    fn clear_resets_sequence() {
        let mut buf = RingBuffer::new(10);
        buf.append("a".to_string());
        buf.clear();
        assert_eq!(buf.total_seq(), 0);
        assert_eq!(buf.count(), 0);
        assert_eq!(buf.append("b".to_string()), 0);
    }
}
