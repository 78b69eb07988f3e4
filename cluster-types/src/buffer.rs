//! Shared output sink for captured process and log output.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

/// Growable, cloneable byte sink.
///
/// Clones share the same underlying buffer, so one handle can be given to a
/// log subscriber or a pipe reader while another is kept for diagnostics.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes.
    pub fn append(&self, bytes: &[u8]) {
        self.lock().extend_from_slice(bytes);
    }

    /// Append a line of text, adding the trailing newline.
    pub fn append_line(&self, line: &str) {
        let mut buf = self.lock();
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
    }

    /// Everything captured so far, decoded lossily as UTF-8.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    /// Number of bytes captured.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // Poisoned contents are still valid bytes.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl io::Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("len", &self.len())
            .finish()
    }
}
