// Resolver trait definition

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::errors::ResolveError;
use super::models::{MediaDetails, Representation};

/// Sequentially read, exclusively owned source of bytes
///
/// Dropping the handle closes it, so every exit path releases the
/// underlying connection exactly once.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// A byte stream opened for one representation
pub struct OpenedStream {
    pub reader: ByteStream,
    /// Total length, when the upstream announced it
    pub content_length: Option<u64>,
}

impl OpenedStream {
    pub fn new(reader: impl AsyncRead + Send + 'static, content_length: Option<u64>) -> Self {
        Self {
            reader: Box::pin(reader),
            content_length,
        }
    }
}

impl fmt::Debug for OpenedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Trait for metadata/stream resolvers
///
/// Both calls may be slow and network-bound, and fail independently.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Name of the resolver (for logging)
    fn name(&self) -> &'static str;

    /// Look up an identifier and return its details and representation catalog
    async fn resolve(&self, id: &str) -> Result<MediaDetails, ResolveError>;

    /// Open a byte stream for one representation of the catalog
    async fn open_stream(&self, representation: &Representation)
        -> Result<OpenedStream, ResolveError>;
}
