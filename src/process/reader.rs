//! Line-oriented capture of a child's output pipes.

use std::io;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Which output stream a reader drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdioKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StdioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Append-only byte accumulator shared between one writer and many readers.
///
/// Chunks are appended whole under the write lock, so a snapshot is always
/// a prefix of the final content that ends on a chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<RwLock<Vec<u8>>>,
}

impl OutputBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, chunk: &[u8]) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);
    }

    /// Copy of everything accumulated so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drains one pipe end into an [`OutputBuffer`], newline by newline.
#[derive(Debug)]
pub struct StreamReader<R> {
    kind: StdioKind,
    reader: BufReader<R>,
    buffer: OutputBuffer,
    echo: bool,
}

impl<R: AsyncRead + Unpin> StreamReader<R> {
    /// Wrap a readable stream with an empty accumulator.
    pub fn attach(kind: StdioKind, source: R) -> Self {
        Self {
            kind,
            reader: BufReader::new(source),
            buffer: OutputBuffer::new(),
            echo: false,
        }
    }

    /// Log every chunk as it is captured.
    #[must_use]
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    #[must_use]
    pub fn kind(&self) -> StdioKind {
        self.kind
    }

    /// A handle to the accumulator that outlives the reader.
    #[must_use]
    pub fn buffer(&self) -> OutputBuffer {
        self.buffer.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer.snapshot()
    }

    /// Read until end-of-stream, appending each chunk to the accumulator.
    ///
    /// A trailing chunk without a newline is kept. Broken pipes, closed
    /// handles, timeouts and truncated reads end the loop like EOF does.
    /// Returns the number of bytes captured.
    ///
    /// # Errors
    ///
    /// Returns any other read error; bytes read before it are kept.
    pub async fn drain(mut self) -> io::Result<u64> {
        let mut total = 0u64;
        let mut chunk = Vec::new();

        loop {
            chunk.clear();
            let result = self.reader.read_until(b'\n', &mut chunk).await;

            if !chunk.is_empty() {
                self.buffer.append(&chunk);
                total += chunk.len() as u64;
                if self.echo {
                    tracing::info!(
                        stream = %self.kind,
                        "{}",
                        String::from_utf8_lossy(&chunk).trim_end()
                    );
                }
            }

            match result {
                Ok(0) => {
                    tracing::debug!(stream = %self.kind, bytes = total, "Read EOF");
                    return Ok(total);
                }
                Ok(_) => {}
                Err(e) if is_end_of_stream(&e) => {
                    if self.echo {
                        tracing::info!(stream = %self.kind, error = %e, "Stream closed");
                    } else {
                        tracing::debug!(stream = %self.kind, error = %e, "Stream closed");
                    }
                    return Ok(total);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Read errors that just mean the other end went away.
fn is_end_of_stream(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
            | io::ErrorKind::NotConnected
    ) {
        return true;
    }

    #[cfg(unix)]
    {
        err.raw_os_error() == Some(nix::errno::Errno::EBADF as i32)
    }

    #[cfg(not(unix))]
    {
        false
    }
}
