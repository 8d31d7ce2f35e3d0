//! `.strm`/`nxglnk://` link parsing.
//!
//! A `.strm` file's content is a single `nxglnk://` URI rather than an NZB
//! document. It names a total file size, a chunk size, a deterministic
//! per-segment message-id seed (`h` plus a 1-based part index), and
//! optionally an rclone-style cipher/password/salt, letting the segment map
//! be derived without any manifest at all.

use url::Url;

use crate::errors::{ImportError, ParseNzbError};
use crate::model::{Encryption, MessageId, Segment, SegmentSequence};

const SCHEME: &str = "nxglnk";
const KNOWN_CIPHERS: &[&str] = &["rclone", "none"];

/// A resolved `.strm` link: enough to synthesize a segment map without ever
/// contacting a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrmLink {
    pub message_id_prefix: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub filename: String,
    pub encryption: Encryption,
    pub password: Option<String>,
    pub salt: Option<String>,
}

impl StrmLink {
    /// Parses a `.strm` file's single-line content.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Parse`] wrapping a generic XML-syntax error
    /// message if the URI doesn't match
    /// `nxglnk://<host>?h=..&chunk_size=..&file_size=..&name=..`; there is no
    /// dedicated `.strm`-parsing error variant since the format is a small,
    /// internal extension of this crate's input surface.
    pub fn parse(content: &str) -> Result<Self, ImportError> {
        let trimmed = content.trim();
        let url = Url::parse(trimmed).map_err(|e| strm_error(e.to_string()))?;

        if url.scheme() != SCHEME {
            return Err(strm_error(format!("unsupported scheme '{}'", url.scheme())));
        }

        let mut message_id_prefix = None;
        let mut file_size = None;
        let mut chunk_size = None;
        let mut filename = None;
        let mut cipher = None;
        let mut password = None;
        let mut salt = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "h" => message_id_prefix = Some(value.into_owned()),
                "file_size" => file_size = value.parse::<u64>().ok(),
                "chunk_size" => chunk_size = value.parse::<u64>().ok(),
                "name" => filename = Some(value.into_owned()),
                "cipher" => cipher = Some(value.into_owned()),
                "password" => password = Some(value.into_owned()),
                "salt" => salt = Some(value.into_owned()),
                _ => {}
            }
        }

        let message_id_prefix = message_id_prefix.ok_or_else(|| strm_error("missing 'h' query parameter".to_owned()))?;
        let file_size =
            file_size.ok_or_else(|| strm_error("missing or invalid 'file_size' query parameter".to_owned()))?;
        let chunk_size =
            chunk_size.ok_or_else(|| strm_error("missing or invalid 'chunk_size' query parameter".to_owned()))?;
        if chunk_size == 0 {
            return Err(strm_error("'chunk_size' must be non-zero".to_owned()));
        }

        let encryption = match cipher {
            None => Encryption::None,
            Some(ref c) if c.eq_ignore_ascii_case("rclone") => Encryption::Rclone,
            Some(ref c) if KNOWN_CIPHERS.contains(&c.to_lowercase().as_str()) => Encryption::None,
            Some(c) => return Err(ImportError::Parse(ParseNzbError::UnknownCipher(c))),
        };

        Ok(Self {
            filename: filename.unwrap_or_else(|| message_id_prefix.clone()),
            message_id_prefix,
            file_size,
            chunk_size,
            encryption,
            password,
            salt,
        })
    }

    /// Number of segments implied by `file_size`/`chunk_size`.
    #[must_use]
    pub fn segment_count(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size)
    }

    /// Synthesizes this link's segment map. Message ids are deterministic:
    /// `{message_id_prefix}.{1-based part index}`.
    #[must_use]
    pub fn segments(&self) -> SegmentSequence {
        let mut out = Vec::new();
        let mut remaining = self.file_size;
        let mut part = 1u64;

        while remaining > 0 {
            let size = remaining.min(self.chunk_size);
            let message_id = MessageId::from(format!("{}.{part}", self.message_id_prefix));
            out.push(Segment::whole(message_id, size));
            remaining -= size;
            part += 1;
        }

        out
    }
}

fn strm_error(message: String) -> ImportError {
    ImportError::Parse(crate::errors::ParseNzbError::XmlSyntax(format!(
        "invalid .strm link: {message}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_link() {
        let link = StrmLink::parse("nxglnk://host?h=abc123&file_size=1500000&chunk_size=700000&name=Movie.mkv").unwrap();
        assert_eq!(link.message_id_prefix, "abc123");
        assert_eq!(link.file_size, 1_500_000);
        assert_eq!(link.chunk_size, 700_000);
        assert_eq!(link.filename, "Movie.mkv");
        assert_eq!(link.encryption, Encryption::None);
        assert_eq!(link.password, None);
        assert_eq!(link.salt, None);
    }

    #[test]
    fn segment_count_rounds_up() {
        let link = StrmLink::parse("nxglnk://host?h=abc&file_size=1500000&chunk_size=700000").unwrap();
        assert_eq!(link.segment_count(), 3);
    }

    #[test]
    fn segments_sum_to_file_size() {
        let link = StrmLink::parse("nxglnk://host?h=abc&file_size=1500000&chunk_size=700000").unwrap();
        let segments = link.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(crate::model::sequence_byte_count(&segments), 1_500_000);
        assert_eq!(segments[0].message_id, MessageId::from("abc.1"));
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert!(StrmLink::parse("https://host?h=abc&file_size=1&chunk_size=1").is_err());
    }

    #[test]
    fn rejects_zero_chunk_size() {
        assert!(StrmLink::parse("nxglnk://host?h=abc&file_size=100&chunk_size=0").is_err());
    }

    #[test]
    fn rejects_missing_h_parameter() {
        assert!(StrmLink::parse("nxglnk://host?file_size=100&chunk_size=10").is_err());
    }

    #[test]
    fn parses_rclone_cipher_password_and_salt() {
        let link = StrmLink::parse(
            "nxglnk://host?h=abc&file_size=100&chunk_size=10&cipher=rclone&password=p&salt=s",
        )
        .unwrap();
        assert_eq!(link.encryption, Encryption::Rclone);
        assert_eq!(link.password.as_deref(), Some("p"));
        assert_eq!(link.salt.as_deref(), Some("s"));
    }

    #[test]
    fn rejects_unknown_cipher() {
        assert!(StrmLink::parse("nxglnk://host?h=abc&file_size=100&chunk_size=10&cipher=rot13").is_err());
    }
}
