use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use altnzb_core::{ArticleStreamProvider, ProviderError, StatResult, YencHeaders};
use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};

/// Canned response for one message id: either a readable body with yEnc
/// headers, or an error the parser/validator must react to.
#[derive(Clone)]
pub enum MockArticle {
    Body { headers: YencHeaders, bytes: Vec<u8> },
    NotFound,
    Transient,
}

/// In-memory [`ArticleStreamProvider`] keyed by message id, for exercising
/// the parser/validator/archive pipeline without a real NNTP pool.
#[derive(Default)]
pub struct MockProvider {
    articles: Mutex<HashMap<String, MockArticle>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, message_id: impl Into<String>, article: MockArticle) {
        self.articles.lock().unwrap().insert(message_id.into(), article);
    }

    /// Registers a plain, unnamed body of `len` zero bytes for `message_id`,
    /// the common case for segments whose size is all a test cares about.
    pub fn insert_sized(&self, message_id: impl Into<String>, len: usize) {
        self.insert(
            message_id,
            MockArticle::Body {
                headers: YencHeaders::default(),
                bytes: vec![0u8; len],
            },
        );
    }
}

pub struct MockBodyStream {
    headers: YencHeaders,
    bytes: Vec<u8>,
    pos: usize,
}

impl AsyncRead for MockBodyStream {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let remaining = &this.bytes[this.pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

impl altnzb_core::ArticleBodyStream for MockBodyStream {
    fn yenc_headers(&self) -> &YencHeaders {
        &self.headers
    }
}

#[async_trait]
impl ArticleStreamProvider for MockProvider {
    type BodyStream = MockBodyStream;

    async fn body_reader(&self, message_id: &altnzb_core::MessageId, _newsgroups: &[String]) -> Result<Self::BodyStream, ProviderError> {
        let articles = self.articles.lock().unwrap();
        match articles.get(message_id.0.as_str()) {
            Some(MockArticle::Body { headers, bytes }) => Ok(MockBodyStream {
                headers: headers.clone(),
                bytes: bytes.clone(),
                pos: 0,
            }),
            Some(MockArticle::NotFound) | None => Err(ProviderError::NotFound),
            Some(MockArticle::Transient) => Err(ProviderError::Transient("mock transient failure".into())),
        }
    }

    async fn stat(&self, message_id: &altnzb_core::MessageId, _newsgroups: &[String]) -> Result<StatResult, ProviderError> {
        let articles = self.articles.lock().unwrap();
        match articles.get(message_id.0.as_str()) {
            Some(MockArticle::Body { .. }) => Ok(StatResult::Ok),
            Some(MockArticle::NotFound) | None => Ok(StatResult::NotFound),
            Some(MockArticle::Transient) => Err(ProviderError::Transient("mock transient failure".into())),
        }
    }

    fn has_pool(&self) -> bool {
        true
    }
}

/// Escapes `"` and `&` so a subject containing a quoted filename can be
/// embedded in an XML attribute value.
fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

/// Builds a minimal single-file NZB document with one segment per entry in
/// `segment_ids`, each declared with `declared_bytes`.
pub fn single_file_nzb(subject: &str, segment_ids: &[&str], declared_bytes: u64) -> String {
    let subject = escape_attr(subject);
    let segments: String = segment_ids
        .iter()
        .enumerate()
        .map(|(i, id)| format!(r#"<segment bytes="{declared_bytes}" number="{}">{id}</segment>"#, i + 1))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="iso-8859-1"?>
<!DOCTYPE nzb PUBLIC "-//newzBin//DTD NZB 1.1//EN" "http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd">
<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
<file poster="poster@example.com" date="1700000000" subject="{subject}">
<groups><group>alt.binaries.test</group></groups>
<segments>{segments}</segments>
</file>
</nzb>"#
    )
}

/// Builds a multi-file NZB, each entry with one segment.
pub fn multi_file_nzb(files: &[(&str, &str, u64)]) -> String {
    let bodies: String = files
        .iter()
        .map(|(subject, segment_id, bytes)| {
            let subject = escape_attr(subject);
            format!(
                r#"<file poster="poster@example.com" date="1700000000" subject="{subject}">
<groups><group>alt.binaries.test</group></groups>
<segments><segment bytes="{bytes}" number="1">{segment_id}</segment></segments>
</file>"#
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="iso-8859-1"?>
<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
{bodies}
</nzb>"#
    )
}
