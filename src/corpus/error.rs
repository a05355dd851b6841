use std::path::PathBuf;

/// Boundary errors for corpus inputs. Protocol lines that fail with any of
/// these are skipped; evaluation files that fail are fatal.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}: invalid json: {reason}")]
    InvalidJson { origin: String, reason: String },

    #[error("{origin}: missing required field '{field}'")]
    MissingField { origin: String, field: &'static str },

    #[error("{origin}: malformed value for '{field}': {reason}")]
    MalformedValue {
        origin: String,
        field: &'static str,
        reason: String,
    },
}
