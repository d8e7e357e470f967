use thiserror::Error;

/// Errors raised by the feature tree model itself, independent of any Change.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("invalid coordinates for feature '{id}': min {min} > max {max}")]
    InvalidCoordinate { id: String, min: i64, max: i64 },

    #[error("feature '{id}' of type '{kind}' is not a recognized transcript")]
    NotATranscript { id: String, kind: String },

    #[error("feature '{id}' has no CDS child")]
    NoCdsFound { id: String },

    #[error("feature '{id}' has no exon child")]
    NoExonFound { id: String },

    #[error("feature '{parent}' has no child '{child}'")]
    UnknownChild { parent: String, child: String },

    #[error("no sequence available for '{refseq}' in range [{start},{stop})")]
    SequenceUnavailable {
        refseq: String,
        start: i64,
        stop: i64,
    },
}

/// Format errors from the GFF3 codec and importer. Any of these aborts the
/// whole import.
#[derive(Debug, Error)]
pub enum Gff3Error {
    #[error("missing or empty '{column}' column in line: {line}")]
    MissingColumn { column: &'static str, line: String },

    #[error("bad coordinate '{value}' in line: {line}")]
    BadCoordinate { value: String, line: String },

    #[error("unknown strand token '{0}'")]
    BadStrand(String),

    #[error("unknown phase token '{0}'")]
    BadPhase(String),

    #[error("multiple locations for non-CDS type '{kind}' (ID '{id}')")]
    MultiLocationNonCds { kind: String, id: String },

    #[error("feature '{id}' has more than one score value")]
    MultipleScoreValues { id: String },

    #[error("unknown Parent '{parent}' referenced by '{id}'")]
    UnknownParent { parent: String, id: String },

    #[error("sequence data before any FASTA header")]
    SequenceBeforeHeader,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by Change construction, reconstitution and execution.
#[derive(Debug, Error)]
pub enum ChangeError {
    /// Optimistic-concurrency check failed: the caller-supplied expected
    /// value no longer matches the record.
    #[error("stale edit on feature '{feature}': expected {expected}, found {found}")]
    StaleEdit {
        feature: String,
        expected: String,
        found: String,
    },

    #[error("feature '{feature}' exceeds the bounds of its parent '{parent}'")]
    ExceedsParentBounds { feature: String, parent: String },

    #[error("wrong change type for feature '{feature}': {reason}")]
    WrongChangeType { feature: String, reason: String },

    #[error("sub-range {index} of feature '{feature}' would cross its neighbor")]
    DiscontinuousOrderViolation { feature: String, index: usize },

    #[error("unknown change type '{0}'")]
    UnknownChangeType(String),

    #[error("change '{change}' is not supported on the {backend} backend")]
    UnsupportedBackend {
        change: &'static str,
        backend: &'static str,
    },

    #[error("feature '{0}' not found")]
    FeatureNotFound(String),

    #[error("reference sequence '{0}' not found")]
    RefSeqNotFound(String),

    #[error("assembly '{0}' not found")]
    AssemblyNotFound(String),

    #[error("malformed change payload: {0}")]
    Malformed(String),

    /// Persistence failure after validation passed. The caller is expected to
    /// apply the pre-computed inverse against the client-side tree.
    #[error("backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Gff3(#[from] Gff3Error),
}
