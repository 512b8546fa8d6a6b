// crates/types/src/error.rs
use thiserror::Error;

/// A status string the tracker does not recognise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown job status: {0:?}")]
pub struct PhaseParseError(pub String);

/// Errors decoding a single live-feed frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedDecodeError {
    #[error("Malformed feed frame: {0}")]
    Malformed(String),

    #[error("Feed frame has no \"type\" tag")]
    MissingType,

    #[error("Unknown feed event type: {0:?}")]
    UnknownType(String),
}
