//! The Article Stream Provider contract: the one collaborator every other
//! component in this crate is built against. Concrete NNTP pools live
//! outside this crate; callers inject an `Arc<dyn ArticleStreamProvider>`.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::model::MessageId;

/// yEnc header fields exposed by a provider's body stream, read from the
/// article's `=ybegin`/`=ypart` lines before the raw body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct YencHeaders {
    pub filename: Option<String>,
    pub file_size: Option<u64>,
    pub part_size: Option<u64>,
}

/// A readable handle to one article's body, with yEnc headers available
/// up front (read eagerly when the stream is opened).
pub trait ArticleBodyStream: AsyncRead + Send + Unpin {
    fn yenc_headers(&self) -> &YencHeaders;
}

/// Outcome of a lightweight existence probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatResult {
    Ok,
    NotFound,
}

/// Consumed contract: given a message ID, return a stream over its body.
///
/// `not_found` is classified as non-retryable at the import level — if no
/// configured provider holds an article, retrying won't help.
#[async_trait]
pub trait ArticleStreamProvider: Send + Sync {
    type BodyStream: ArticleBodyStream;

    async fn body_reader(
        &self,
        message_id: &MessageId,
        newsgroups: &[String],
    ) -> Result<Self::BodyStream, ProviderError>;

    async fn stat(&self, message_id: &MessageId, newsgroups: &[String]) -> Result<StatResult, ProviderError>;

    fn has_pool(&self) -> bool;
}

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("article not found")]
    NotFound,
    #[error("transient provider error: {0}")]
    Transient(String),
}

impl ProviderError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound)
    }
}
