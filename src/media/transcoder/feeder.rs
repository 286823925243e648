// Feeder tasks that copy input byte streams into the transform tool

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

const CHUNK_SIZE: usize = 64 * 1024;

/// Why a feeder stopped early
#[derive(Debug, thiserror::Error)]
pub(crate) enum FeedError {
    /// Reading the source stream failed
    #[error("source read failed: {0}")]
    Source(#[source] io::Error),

    /// Writing to (or opening) the tool's input failed
    #[error("input write failed: {0}")]
    Sink(#[source] io::Error),

    #[error("cancelled")]
    Cancelled,
}

/// One running feeder task
pub(crate) struct Feeder {
    pub input: &'static str,
    handle: JoinHandle<Result<u64, FeedError>>,
}

impl Feeder {
    /// Spawn `task` in the current span
    pub fn spawn<F>(input: &'static str, task: F) -> Self
    where
        F: Future<Output = Result<u64, FeedError>> + Send + 'static,
    {
        Self {
            input,
            handle: tokio::spawn(task.in_current_span()),
        }
    }

    /// Wait for the task; a panic counts as a source failure
    pub async fn join(self) -> (&'static str, Result<u64, FeedError>) {
        let result = match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(FeedError::Source(io::Error::other(err))),
        };
        (self.input, result)
    }
}

/// Copy `source` into `sink` until EOF, an error, or cancellation
///
/// A source failure cancels `token` so the rest of the session winds down
/// with it. The sink is shut down on success and dropped on every path,
/// which is what signals EOF to the tool.
pub(crate) async fn feed<R, W>(
    input: &'static str,
    mut source: R,
    mut sink: W,
    token: CancellationToken,
) -> Result<u64, FeedError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FeedError::Cancelled),
            read = source.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    debug!(input, error = %err, bytes = total, "source failed");
                    token.cancel();
                    return Err(FeedError::Source(err));
                }
            },
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FeedError::Cancelled),
            written = sink.write_all(&buf[..n]) => written.map_err(FeedError::Sink)?,
        }
        total += n as u64;
    }

    sink.shutdown().await.map_err(FeedError::Sink)?;
    debug!(input, bytes = total, "input exhausted");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio_util::io::StreamReader;

    #[tokio::test]
    async fn copies_until_eof() {
        let mut sink = Vec::new();
        let copied = feed("audio", &b"hello world"[..], &mut sink, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(copied, 11);
        assert_eq!(sink, b"hello world");
    }

    #[tokio::test]
    async fn source_errors_cancel_the_session() {
        let source = StreamReader::new(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::other("connection reset")),
        ]));
        let token = CancellationToken::new();

        let result = feed("video", source, Vec::new(), token.clone()).await;

        assert!(matches!(result, Err(FeedError::Source(_))));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_stops_endless_sources() {
        let token = CancellationToken::new();
        token.cancel();

        let result = feed("video", tokio::io::repeat(0), tokio::io::sink(), token).await;
        assert!(matches!(result, Err(FeedError::Cancelled)));
    }
}
