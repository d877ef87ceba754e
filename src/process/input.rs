//! Input plumbing: the operator console and the child's stdin.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Where interactive prompts are shown and answers are read from.
///
/// Defaults to the supervisor process's own stdin/stdout; tests swap in
/// in-memory streams.
pub struct Console {
    input: Box<dyn AsyncBufRead + Send + Unpin>,
    output: Box<dyn AsyncWrite + Send + Unpin>,
}

impl Console {
    pub fn new(
        input: impl AsyncBufRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
        }
    }

    /// The process's own standard input and output.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }

    /// Show `prompt` and read one line of response, newline included.
    ///
    /// Returns an empty string if the input is already at EOF.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from writing the prompt or reading the answer.
    pub async fn ask(&mut self, prompt: &str) -> io::Result<String> {
        self.output.write_all(prompt.as_bytes()).await?;
        self.output.flush().await?;

        let mut line = String::new();
        self.input.read_line(&mut line).await?;
        Ok(line)
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stdio()
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

struct InputRequest {
    data: String,
    ack: oneshot::Sender<io::Result<()>>,
}

/// Sender side of the task that owns a child's stdin.
///
/// Dropping every handle (or cancelling the token) closes the pipe.
#[derive(Debug, Clone)]
pub(crate) struct StdinHandle {
    tx: mpsc::Sender<InputRequest>,
}

impl StdinHandle {
    /// Start the writer task for `stdin`.
    pub(crate) fn spawn(mut stdin: ChildStdin, cancel: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel::<InputRequest>(8);

        tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,
                    request = rx.recv() => request,
                };
                let Some(InputRequest { data, ack }) = request else {
                    break;
                };

                let result = async {
                    stdin.write_all(data.as_bytes()).await?;
                    stdin.flush().await
                }
                .await;
                if let Err(ref e) = result {
                    tracing::debug!(error = %e, "Write to child stdin failed");
                }
                let _ = ack.send(result);
            }
            tracing::trace!("Child stdin closed");
        });

        Self { tx }
    }

    /// Write `data` to the child and wait until it has been flushed.
    pub(crate) async fn write(&self, data: String) -> io::Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(InputRequest { data, ack })
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        done.await
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?
    }
}
