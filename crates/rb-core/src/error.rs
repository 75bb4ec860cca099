//! Error types for Rebinner

use thiserror::Error;

/// Rebinner error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Histogram key that matches no sample group
    #[error("unparseable histogram key: {0}")]
    Key(String),

    /// An enabled systematic's variant is absent from the input collection.
    ///
    /// Fatal: a partial systematic set would corrupt the downstream
    /// statistical model.
    #[error("missing histogram {name} (variable {variable}, year {year}, category {category}, systematic {systematic})")]
    MissingHistogram {
        /// Full histogram key that was expected.
        name: String,
        /// Kinematic variable of the unit of work.
        variable: String,
        /// Data-taking year label.
        year: String,
        /// Analysis category.
        category: String,
        /// Systematic tag (empty for nominal).
        systematic: String,
    },

    /// Channel binning walk finished with fewer than two edges
    #[error("binning for channel {channel} did not converge: {reason}")]
    Binning {
        /// Channel key (lepton-stripped category).
        channel: String,
        /// What went wrong.
        reason: String,
    },

    /// Invalid histogram or configuration
    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
