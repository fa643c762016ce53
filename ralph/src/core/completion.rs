//! Completion signal detection over captured agent output.

/// The literal marker an agent prints once all work is finished.
pub const COMPLETION_SIGNAL: &str = "<promise>COMPLETE</promise>";

/// Exact, case-sensitive substring search for [`COMPLETION_SIGNAL`].
///
/// Operates on raw bytes so non-UTF-8 output is still scanned.
pub fn contains_signal(output: &[u8]) -> bool {
    contains(output, COMPLETION_SIGNAL.as_bytes())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Incremental search for a byte pattern over a stream fed in arbitrary chunks.
///
/// Matches spanning chunk boundaries are found; memory stays bounded by the
/// pattern length no matter how much is fed.
#[derive(Debug, Clone)]
pub struct SignalScanner {
    pattern: Vec<u8>,
    tail: Vec<u8>,
    seen: bool,
}

impl SignalScanner {
    pub fn new(pattern: &[u8]) -> Self {
        Self {
            pattern: pattern.to_vec(),
            tail: Vec::new(),
            seen: false,
        }
    }

    /// Scanner for [`COMPLETION_SIGNAL`].
    pub fn completion() -> Self {
        Self::new(COMPLETION_SIGNAL.as_bytes())
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if self.seen || self.pattern.is_empty() {
            return;
        }
        let mut window = std::mem::take(&mut self.tail);
        window.extend_from_slice(chunk);
        if contains(&window, &self.pattern) {
            self.seen = true;
            return;
        }
        let keep = self.pattern.len() - 1;
        let start = window.len().saturating_sub(keep);
        self.tail = window.split_off(start);
    }

    pub fn seen(&self) -> bool {
        self.seen
    }
}
