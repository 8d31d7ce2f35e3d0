use std::io;

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Represents the attributes that can be present in a 'file' element of an NZB document.
pub enum FileAttributeKind {
    Poster,
    Date,
    Subject,
}

impl std::fmt::Display for FileAttributeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poster => write!(f, "poster"),
            Self::Date => write!(f, "date"),
            Self::Subject => write!(f, "subject"),
        }
    }
}

#[derive(Error, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Represents errors that can occur during the parsing of an NZB document.
pub enum ParseNzbError {
    /// Indicates an invalid or missing 'groups' element within a 'file' element.
    /// Each 'file' element must contain at least one valid 'groups' element.
    #[error(
        "Invalid or missing 'groups' element within a 'file' element. \
        Each 'file' element must contain at least one valid 'groups' element."
    )]
    GroupsElement,

    /// Indicates an invalid or missing 'segments' element within a 'file' element.
    /// Each 'file' element must contain at least one valid 'segments' element.
    #[error(
        "Invalid or missing 'segments' element within a 'file' element. \
        Each 'file' element must contain at least one valid 'segments' element."
    )]
    SegmentsElement,

    /// Indicates an invalid or missing 'file' element in the NZB document.
    /// The NZB document must contain at least one valid 'file' element.
    #[error(
        "Invalid or missing 'file' element in the NZB document. \
        The NZB document must contain at least one valid 'file' element."
    )]
    FileElement,

    /// Indicates that the NZB document contains only `.par2` files.
    /// The NZB document must include at least one non-`.par2` file.
    #[error(
        "The NZB document contains only `.par2` files. \
        It must include at least one non-`.par2` file."
    )]
    OnlyPar2Files,

    /// Indicates an invalid or missing required attribute in a 'file' element.
    #[error("Invalid or missing required attribute '{0}' in a 'file' element.")]
    FileAttribute(FileAttributeKind),

    /// Indicates an unrecognized `cipher` value in the NZB's `<meta>` block.
    #[error("Unknown encryption cipher '{0}' declared in NZB metadata.")]
    UnknownCipher(String),

    /// Indicates that the NZB document is not valid XML and could not be parsed.
    ///
    /// The contained string is the error message provided by the underlying
    /// XML parsing library ([`roxmltree`](https://crates.io/crates/roxmltree) in this case).
    #[error("The NZB document is not valid XML and could not be parsed: {0}")]
    XmlSyntax(String),
}

impl From<roxmltree::Error> for ParseNzbError {
    fn from(error: roxmltree::Error) -> Self {
        ParseNzbError::XmlSyntax(error.to_string())
    }
}

/// Errors raised anywhere past manifest parsing: deobfuscation, validation,
/// archive analysis, and the import orchestrator itself.
///
/// Each variant is classified exactly once, at the point it's raised, via
/// [`ImportError::is_retryable`] — the Orchestrator never re-derives
/// retryability by pattern-matching a message string.
#[derive(Error, Debug)]
pub enum ImportError {
    /// The manifest itself failed to parse.
    #[error("NZB parsing error: {0}")]
    Parse(#[from] ParseNzbError),

    /// A file's name matched the obfuscation heuristic and no deobfuscation
    /// strategy recovered a usable name.
    #[error("file '{name}' is obfuscated and no deobfuscation strategy recovered a name")]
    ObfuscatedUnrecoverable {
        /// The obfuscated name as it appeared in the manifest.
        name: String,
    },

    /// All configured article stream providers returned not-found for a
    /// message ID required by the import.
    #[error("article {message_id} was not found in any configured provider")]
    ArticleNotFoundInProviders {
        /// The message ID that could not be located.
        message_id: String,
    },

    /// The segment validator's size invariant did not hold.
    #[error("file incomplete: expected {expected} bytes, found {found}")]
    SizeMismatch {
        /// The expected byte count (logical or encrypted size).
        expected: u64,
        /// The byte count actually covered by the segment sequence.
        found: u64,
    },

    /// A segment failed the structural invariants in `Segment::is_structurally_valid`.
    #[error("segment failed structural validation: {reason}")]
    InvalidSegment {
        /// Human-readable description of which invariant failed.
        reason: String,
    },

    /// A configured extension allow-list rejected every file in the import.
    #[error("no file in this import matches the configured content allow-list")]
    DisallowedContent,

    /// A single archive analysis exceeded its hard wall-clock limit.
    #[error("archive analysis did not complete within the configured timeout")]
    ArchiveAnalysisTimeout,

    /// A transient pool/transport/IO failure; safe to retry at the queue level.
    #[error("transient provider error: {0}")]
    TransientPool(String),

    /// The item's context was cancelled by an operator.
    #[error("cancelled by user")]
    Cancelled,

    /// The durable queue store reported an error other than lock contention.
    #[error("queue store error: {0}")]
    Store(String),

    /// A filesystem operation (NZB move, metadata write) failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ImportError {
    /// Whether the queue layer should retry this item rather than mark it `failed`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ImportError::TransientPool(_) | ImportError::ArchiveAnalysisTimeout)
    }
}
