use thiserror::Error;

pub type RfResult<T> = Result<T, RfError>;

/// Header attribute a pair of replicate documents can disagree on.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CompatField {
    Tool,
    Scoring,
    Norm,
    Offset,
    Window,
    Sequence,
}

impl std::fmt::Display for CompatField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Tool => "tool",
            Self::Scoring => "scoring",
            Self::Norm => "normalization",
            Self::Offset => "offset",
            Self::Window => "window",
            Self::Sequence => "sequence",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Error)]
pub enum RfError {
    #[error("invalid configuration, {0}")]
    Config(String),
    #[error("i/o error, {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record for {0}")]
    CorruptRecord(String),
    #[error("malformed document, {0}")]
    MalformedDocument(String),
    #[error("coverage below thresholds")]
    LowCoverage,
    #[error("sequence mismatch between samples")]
    SeqMismatch,
    #[error("transcript missing from control sample")]
    MissingTranscript,
    #[error("non-numeric values")]
    NonNumeric,
    #[error("replicates disagree on {0}")]
    Incompatible(CompatField),
}
