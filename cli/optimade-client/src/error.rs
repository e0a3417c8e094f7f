//! Error handling for OPTIMADE client operations.

use std::collections::BTreeSet;
use std::path::PathBuf;

use thiserror::Error;

/// A response had neither `data` nor `errors`.
///
/// This is an implementation error on the server side, not something retrying
/// will fix.
#[derive(Debug, Error)]
#[error("no data and no errors reported in response: {response}")]
pub struct InputError {
    /// The offending response, serialized for reporting.
    pub response: String,
}

/// User input for a filter field could not be parsed.
///
/// No network request is made when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid input for '{field}' ({value:?}): {reason}")]
pub struct ParseError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// A returned resource lacks every one of a set of alternative fields.
///
/// Only that resource is rejected, not the page it came with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entry '{id}' has none of the properties {}", .missing.join(", "))]
pub struct ResourceShapeError {
    pub id: String,
    pub missing: Vec<&'static str>,
}

/// Errors listing providers and their databases.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no provider registry could be fetched and no cached copy exists")]
    NoRegistry,
    #[error("'{id}' has no base URL")]
    MissingBaseUrl { id: String },
    #[error("no supported OPTIMADE version could be negotiated for {base_url}")]
    UnsupportedVersion { base_url: String },
    #[error("{message}")]
    Query {
        message: String,
        statuses: BTreeSet<u16>,
        /// Whether the provider or database should be dropped for the rest of
        /// the session.
        remove_target: bool,
    },
    #[error("provider '{provider}' is disabled")]
    Disabled { provider: String },
    #[error("provider '{provider}' was found to be incompatible earlier in this session: {reason}")]
    Disqualified { provider: String, reason: String },
    #[error(transparent)]
    Protocol(#[from] InputError),
}

impl CatalogError {
    /// Whether this error shows the target is fundamentally incompatible.
    pub fn disqualifies(&self) -> bool {
        match self {
            CatalogError::NoRegistry | CatalogError::Disabled { .. } => false,
            CatalogError::MissingBaseUrl { .. }
            | CatalogError::UnsupportedVersion { .. }
            | CatalogError::Disqualified { .. }
            | CatalogError::Protocol(_) => true,
            CatalogError::Query { remove_target, .. } => *remove_target,
        }
    }
}

/// Errors reading or writing the provider registry snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot location '{0}' has no parent directory")]
    InvalidLocation(PathBuf),
    #[error("couldn't create cache directory")]
    CreateDir(#[source] std::io::Error),
    #[error("couldn't open temporary snapshot file")]
    OpenTmpFile(#[source] std::io::Error),
    #[error("couldn't write temporary snapshot file")]
    WriteTmpFile(#[source] serde_json::Error),
    #[error("couldn't rename temporary snapshot file")]
    RenameTmpFile(#[source] tempfile::PersistError),
    #[error("couldn't read snapshot")]
    Read(#[source] std::io::Error),
    #[error("couldn't parse snapshot")]
    Parse(#[source] serde_json::Error),
    #[error("couldn't remove snapshot")]
    Remove(#[source] std::io::Error),
}

/// Common error type for client and session operations.
#[derive(Debug, Error)]
pub enum OptimadeClientError {
    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),
    #[error(transparent)]
    Filter(#[from] ParseError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("invalid response from database")]
    Protocol(#[from] InputError),
    #[error("{message}")]
    Query {
        message: String,
        statuses: BTreeSet<u16>,
    },
    #[error("no database selected")]
    NoDatabase,
    #[error("no result with index {0}")]
    NoSuchResult(usize),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// A structure could not be converted to the requested format.
#[derive(Debug, Error)]
#[error("cannot convert structure '{id}' to '{format}': {reason}")]
pub struct ConversionError {
    pub id: String,
    pub format: String,
    pub reason: String,
}
