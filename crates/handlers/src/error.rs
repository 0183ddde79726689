use std::error::Error as StdError;

/// Crate-wide result type for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed errors for handler-source loading and registry rebuilds.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source produced no handlers; the previous mapping stays active.
    #[error("handler source {source_id} produced no handlers")]
    EmptySource { source_id: String },

    /// The source itself failed to load.
    #[error("handler source {source_id} failed: {source}")]
    Source {
        source_id: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn empty_source(source_id: impl Into<String>) -> Self {
        Self::EmptySource {
            source_id: source_id.into(),
        }
    }

    #[must_use]
    pub fn source(
        source_id: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Source {
            source_id: source_id.into(),
            source: Box::new(source),
        }
    }
}
