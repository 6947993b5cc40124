/// Bounded output capture
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Append-only byte buffer with a hard cap.
///
/// Writes past the cap are discarded but reported as consumed so upstream
/// pipes keep draining; `overflow` records that the cap was breached.
/// Filling the buffer to exactly the cap is not overflow on its own; any
/// write arriving after saturation marks it.
#[derive(Debug)]
pub struct BoundedSink {
    buf: Vec<u8>,
    limit: usize,
    overflow: bool,
}

impl BoundedSink {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            overflow: false,
        }
    }

    /// Whether any bytes were discarded.
    pub fn overflow(&self) -> bool {
        self.overflow
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Captured bytes as a lossy UTF-8 string.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Write for BoundedSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let remaining = self.limit.saturating_sub(self.buf.len());
        if remaining == 0 {
            self.overflow = true;
            // Pretend the bytes were consumed so the pipe keeps draining.
            return Ok(data.len());
        }

        if data.len() > remaining {
            self.buf.extend_from_slice(&data[..remaining]);
            self.overflow = true;
        } else {
            self.buf.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Handle shared between a drain thread and the executor. All writes are
/// serialized through the inner lock.
pub type SharedSink = Arc<Mutex<BoundedSink>>;

pub fn shared(limit: usize) -> SharedSink {
    Arc::new(Mutex::new(BoundedSink::new(limit)))
}

/// Snapshot a shared sink after its drain thread has been joined.
pub fn snapshot(sink: &SharedSink) -> (String, bool) {
    let guard = sink.lock().unwrap_or_else(|e| e.into_inner());
    (guard.contents(), guard.overflow())
}
