//! Diagnostic sink shared by the progress and trace layers.
//!
//! Both write to the interactive status stream (stderr by default). Neither output is
//! part of a command's result, so writers report failures and callers may drop them.

use parking_lot::Mutex;
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

/// Clear the current terminal line and return the cursor to column 0.
const CLEAR_LINE: &str = "\r\x1b[2K";

#[derive(Clone)]
pub struct DiagnosticSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    live: bool,
}

impl DiagnosticSink {
    /// Sink on stderr. Live line rewriting is enabled only for terminals.
    pub fn stderr() -> Self {
        let live = io::stderr().is_terminal();
        Self {
            writer: Arc::new(Mutex::new(Box::new(io::stderr()))),
            live,
        }
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            live: false,
        }
    }

    /// In-memory sink; the returned buffer sees everything written.
    pub fn capture() -> (Self, CaptureBuffer) {
        let buffer = CaptureBuffer::default();
        (Self::from_writer(buffer.clone()), buffer)
    }

    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Whether in-place line updates are meaningful on this sink.
    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()
    }

    pub fn write_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) -> io::Result<()> {
        let mut writer = self.writer.lock();
        for line in lines {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()
    }

    /// Overwrite the current line in place (no trailing newline).
    pub fn rewrite_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock();
        write!(writer, "{}{}", CLEAR_LINE, line)?;
        writer.flush()
    }

    /// Overwrite the current line and terminate it.
    pub fn finish_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock();
        if self.live {
            write!(writer, "{}", CLEAR_LINE)?;
        }
        writeln!(writer, "{}", line)?;
        writer.flush()
    }
}

/// Cloneable in-memory writer.
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
