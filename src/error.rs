use thiserror::Error;

/// Fatal errors surfaced by the catalog and the planning pipeline.
///
/// Per-task download problems are not represented here; the executor reports
/// those as `TaskOutcome` values without failing the batch.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("catalog request failed: {reason}")]
    CatalogFetch { reason: String },

    #[error("malformed source link target: {href}")]
    MalformedLink { href: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for HarvestError {
    fn from(err: reqwest::Error) -> Self {
        HarvestError::CatalogFetch {
            reason: err.to_string(),
        }
    }
}
