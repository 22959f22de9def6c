use anyhow::{anyhow, Result};
use std::io::BufRead;

use super::result::DetectionBatch;

/// Upstream detector/tracker boundary.
///
/// The kernel never runs a model itself. A source hands over one batch per
/// frame; any error it returns is an upstream failure and aborts that frame.
pub trait DetectionSource {
    /// Source identifier.
    fn name(&self) -> &'static str;

    /// Next detection batch, `Ok(None)` once the source is exhausted.
    fn next_batch(&mut self) -> Result<Option<DetectionBatch>>;

    /// Advisory reachability for health reporting.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Reads one JSON-encoded `DetectionBatch` per line.
///
/// Blank lines are skipped. A line that does not parse is reported as an
/// upstream error; the following line is still readable.
pub struct JsonLinesSource<R> {
    reader: R,
    line_no: u64,
    healthy: bool,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            healthy: true,
        }
    }
}

impl<R: BufRead> DetectionSource for JsonLinesSource<R> {
    fn name(&self) -> &'static str {
        "json-lines"
    }

    fn next_batch(&mut self) -> Result<Option<DetectionBatch>> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = match self.reader.read_line(&mut line) {
                Ok(read) => read,
                Err(e) => {
                    self.healthy = false;
                    return Err(anyhow!("detector stream read failed: {}", e));
                }
            };
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            self.healthy = true;
            return serde_json::from_str(line.trim())
                .map(Some)
                .map_err(|e| anyhow!("malformed detector output on line {}: {}", self.line_no, e));
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }
}

/// Fills in the expected headcount for batches that arrive without one.
///
/// Batches that carry their own count are passed through unchanged.
pub struct DefaultHeadcount<S> {
    inner: S,
    expected_count: Option<u32>,
}

impl<S: DetectionSource> DefaultHeadcount<S> {
    pub fn new(inner: S, expected_count: Option<u32>) -> Self {
        Self {
            inner,
            expected_count,
        }
    }
}

impl<S: DetectionSource> DetectionSource for DefaultHeadcount<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn next_batch(&mut self) -> Result<Option<DetectionBatch>> {
        let fallback = self.expected_count;
        Ok(self.inner.next_batch()?.map(|mut batch| {
            if batch.expected_count.is_none() {
                batch.expected_count = fallback;
            }
            batch
        }))
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }
}
