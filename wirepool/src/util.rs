//! Small shared containers (spec.md's "Buffer, memory stream, property
//! list" component, scoped to what this engine actually needs — see
//! `SPEC_FULL.md` §4.9).

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A fixed-capacity ring buffer of recent log lines, used by
/// `Lifecycle::stats()` to surface the last few diagnostic events without
/// depending on whatever sink the business installed into `tracing`.
pub struct RingLog {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl RingLog {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), lines: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_past_capacity() {
        let log = RingLog::new(2);
        log.push("a");
        log.push("b");
        log.push("c");
        assert_eq!(log.snapshot(), vec!["b".to_string(), "c".to_string()]);
    }
}
