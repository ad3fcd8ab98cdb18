//! Logging setup: a console layer for the terminal plus an in-memory ring
//! buffer that backs the web UI's `/log` endpoint.

use std::collections::VecDeque;
use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing_subscriber::{
    fmt::{self, time::UtcTime, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::cli::ColorChoice;

/// How many log lines the web surface can look back over.
const BUFFER_CAPACITY: usize = 1000;

/// Ring buffer of recent log lines with a monotonically increasing line
/// counter as its pseudo-revision. `/log` long-polls against that counter.
pub struct LogBuffer {
    inner: Mutex<BufferInner>,
    notify: Notify,
}

struct BufferInner {
    lines: VecDeque<String>,
    total: u64,
}

impl LogBuffer {
    pub fn new() -> LogBuffer {
        LogBuffer {
            inner: Mutex::new(BufferInner {
                lines: VecDeque::new(),
                total: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn append_line(&self, line: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.lines.push_back(line.to_owned());
            while inner.lines.len() > BUFFER_CAPACITY {
                inner.lines.pop_front();
            }
            inner.total += 1;
        }
        self.notify.notify_waiters();
    }

    /// The current pseudo-revision and retained lines.
    pub fn snapshot(&self) -> (u64, Vec<String>) {
        let inner = self.inner.lock().unwrap();
        (inner.total, inner.lines.iter().cloned().collect())
    }

    /// Resolves once the pseudo-revision differs from `revision`.
    pub async fn wait_past(&self, revision: u64) {
        loop {
            let notified = self.notify.notified();
            if self.inner.lock().unwrap().total != revision {
                return;
            }
            notified.await;
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        LogBuffer::new()
    }
}

/// `MakeWriter` adapter feeding formatted events into a [`LogBuffer`].
struct BufferMakeWriter {
    buffer: Arc<LogBuffer>,
}

struct BufferWriter {
    buffer: Arc<LogBuffer>,
    pending: Vec<u8>,
}

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for BufferWriter {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.pending);
        for line in text.lines().filter(|line| !line.is_empty()) {
            self.buffer.append_line(line);
        }
    }
}

impl<'a> MakeWriter<'a> for BufferMakeWriter {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter {
            buffer: Arc::clone(&self.buffer),
            pending: Vec::new(),
        }
    }
}

pub fn init_logging(verbosity: u8, color: ColorChoice) -> Arc<LogBuffer> {
    tracing_log::LogTracer::init().expect("failed to set log tracer");

    let console_filter = match verbosity {
        0 => "info",
        1 => "info,libhearth=debug",
        2 => "info,libhearth=trace",
        _ => "trace",
    };

    let console_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_filter));

    let use_ansi = match color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stderr().is_terminal(),
    };

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(use_ansi)
        .without_time()
        .with_target(false)
        .with_thread_names(false)
        .with_level(true)
        .with_filter(console_env_filter);

    let buffer = Arc::new(LogBuffer::new());
    let buffer_layer = fmt::layer()
        .with_writer(BufferMakeWriter {
            buffer: Arc::clone(&buffer),
        })
        .with_ansi(false)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_level(true)
        .with_filter(EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(buffer_layer)
        .init();

    buffer
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn buffer_counts_every_line_ever_seen() {
        let buffer = LogBuffer::new();
        assert_eq!(buffer.snapshot(), (0, vec![]));

        buffer.append_line("one");
        buffer.append_line("two");

        let (revision, lines) = buffer.snapshot();
        assert_eq!(revision, 2);
        assert_eq!(lines, ["one", "two"]);
    }

    #[test]
    fn buffer_drops_old_lines_but_keeps_counting() {
        let buffer = LogBuffer::new();
        for i in 0..(BUFFER_CAPACITY + 5) {
            buffer.append_line(&format!("line {}", i));
        }

        let (revision, lines) = buffer.snapshot();
        assert_eq!(revision, (BUFFER_CAPACITY + 5) as u64);
        assert_eq!(lines.len(), BUFFER_CAPACITY);
        assert_eq!(lines[0], "line 5");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_past_parks_until_a_new_line() {
        let buffer = Arc::new(LogBuffer::new());
        buffer.append_line("hello");

        // A stale revision resolves immediately.
        buffer.wait_past(0).await;

        // A current revision parks until the next line.
        let waiter = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.wait_past(1).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        buffer.append_line("wake up");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter never woke")
            .unwrap();
    }
}
