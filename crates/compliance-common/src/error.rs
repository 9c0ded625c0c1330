/// Error types shared by the guideline and submission stores.
///
/// Every store operation surfaces backing-store faults unchanged as a
/// `StorageError`. Server-level errors wrap these via `#[from]`.

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("guideline {0} is still referenced by submissions")]
    GuidelineInUse(i64),

    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },

    #[error("storage worker failed: {0}")]
    Worker(String),
}

/// Raised when the priority resolver is asked to pick a winner from nothing,
/// e.g. a classify request whose guideline ids matched no rows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no guidelines found to classify against")]
pub struct EmptyInputError;
