use anyhow;

// a finished proof travels as one `data` line
pub const MAX_FRAME: usize = 64 * 1024 * 1024;

/// Incremental decoder for `text/event-stream` bodies.
///
/// Feed it body chunks as they arrive; it hands back the `data` of every
/// event completed so far. Comments (which is how keep-alives arrive),
/// `event`, `id` and `retry` fields are skipped. An event growing past the
/// frame limit is an error.
#[derive(Debug)]
pub struct SseDecoder {
    pending: Vec<u8>,

    // bytes of `pending` already known to hold no newline
    scanned: usize,

    data: Vec<String>,
    buffered: usize,
    limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            data: Vec::new(),
            buffered: 0,
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<String>> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let line = String::from_utf8_lossy(&self.pending[start..end]).into_owned();
            start = end + 1;
            self.scanned = start;
            if let Some(frame) = self.line(line.trim_end_matches('\r')) {
                frames.push(frame);
            }
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();
        if self.pending.len() + self.buffered > self.limit {
            let size = self.pending.len() + self.buffered;
            self.pending.clear();
            self.scanned = 0;
            self.data.clear();
            self.buffered = 0;
            anyhow::bail!("event of over `{size}` bytes exceeds the `{}` byte limit", self.limit);
        }
        Ok(frames)
    }

    fn line(&mut self, line: &str) -> Option<String> {
        // blank line dispatches the event
        if line.is_empty() {
            if self.data.is_empty() {
                return None
            }
            let frame = self.data.join("\n");
            self.data.clear();
            self.buffered = 0;
            return Some(frame)
        }
        if line.starts_with(':') {
            return None
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),

            None => (line, ""),
        };
        if field == "data" {
            self.buffered += value.len();
            self.data.push(value.to_string());
        }
        None
    }
}
