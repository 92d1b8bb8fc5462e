use std::fmt;
use std::io;

/// Unified error type for the collection engine.
///
/// Every variant names the collection, field or view it concerns so that the
/// resource layer can report it without re-deriving context. The taxonomy kind
/// is available through [`SyncError::kind`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Two claimants of one physical column disagree on its storage type
    #[error("Schema conflict on {collection}.{column}: {reason}")]
    SchemaConflict {
        collection: String,
        column: String,
        reason: String,
    },

    /// A relationship points at a collection that is not registered
    #[error("Relationship target '{target}' of field {collection}.{field} is not registered")]
    TargetNotFound {
        collection: String,
        field: String,
        target: String,
    },

    /// The requested view does not exist in the given namespace
    #[error("View '{view}' not found{suffix}", suffix = namespace_suffix(.namespace))]
    ViewNotFound {
        view: String,
        namespace: Option<String>,
    },

    /// Sort assignment could not acquire its per-scope guard in time
    #[error("Timed out after {waited_ms}ms waiting for sort scope lock '{scope}'")]
    ScopeLockTimeout { scope: String, waited_ms: u64 },

    /// The storage dialect does not offer the requested capability
    #[error("Dialect '{dialect}' does not support {feature}")]
    UnsupportedDialectFeature { dialect: String, feature: String },

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Field '{field}' not found on collection '{collection}'")]
    FieldNotFound { collection: String, field: String },

    #[error("Collection '{0}' already exists")]
    DuplicateCollection(String),

    #[error("Field '{field}' already exists on collection '{collection}'")]
    DuplicateField { collection: String, field: String },

    #[error("Invalid field {collection}.{field}: {reason}")]
    InvalidField {
        collection: String,
        field: String,
        reason: String,
    },

    #[error("Invalid record for '{collection}': {reason}")]
    InvalidRecord { collection: String, reason: String },

    /// Writes against a view collection
    #[error("Collection '{0}' is a read-only view")]
    ReadOnlyCollection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn namespace_suffix(namespace: &Option<String>) -> String {
    match namespace {
        Some(ns) => format!(" in schema '{}'", ns),
        None => String::new(),
    }
}

/// Coarse classification of [`SyncError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SchemaConflict,
    TargetNotFound,
    ViewNotFound,
    ScopeLockTimeout,
    UnsupportedDialectFeature,
    NotFound,
    Duplicate,
    Invalid,
    ReadOnly,
    Storage,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SchemaConflict => "SchemaConflictError",
            Self::TargetNotFound => "TargetNotFoundError",
            Self::ViewNotFound => "ViewNotFoundError",
            Self::ScopeLockTimeout => "ScopeLockTimeoutError",
            Self::UnsupportedDialectFeature => "UnsupportedDialectFeatureError",
            Self::NotFound => "NotFoundError",
            Self::Duplicate => "DuplicateError",
            Self::Invalid => "InvalidError",
            Self::ReadOnly => "ReadOnlyError",
            Self::Storage => "StorageError",
            Self::Config => "ConfigError",
        };
        f.write_str(name)
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SchemaConflict { .. } => ErrorKind::SchemaConflict,
            Self::TargetNotFound { .. } => ErrorKind::TargetNotFound,
            Self::ViewNotFound { .. } => ErrorKind::ViewNotFound,
            Self::ScopeLockTimeout { .. } => ErrorKind::ScopeLockTimeout,
            Self::UnsupportedDialectFeature { .. } => ErrorKind::UnsupportedDialectFeature,
            Self::CollectionNotFound(_) | Self::FieldNotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateCollection(_) | Self::DuplicateField { .. } => ErrorKind::Duplicate,
            Self::InvalidField { .. } | Self::InvalidRecord { .. } => ErrorKind::Invalid,
            Self::ReadOnlyCollection(_) => ErrorKind::ReadOnly,
            Self::Database(_) | Self::Serialization(_) | Self::Io(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn invalid_field(collection: &str, field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            collection: collection.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn field_not_found(collection: &str, field: &str) -> Self {
        Self::FieldNotFound {
            collection: collection.to_string(),
            field: field.to_string(),
        }
    }
}

/// Conversion from sled::Error to SyncError
impl From<sled::Error> for SyncError {
    fn from(error: sled::Error) -> Self {
        SyncError::Database(error.to_string())
    }
}

/// Conversion from serde_json::Error to SyncError
impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

/// Conversion from toml::de::Error to SyncError
impl From<toml::de::Error> for SyncError {
    fn from(error: toml::de::Error) -> Self {
        SyncError::Config(error.to_string())
    }
}

/// Result type alias for operations that can result in a SyncError
pub type SyncResult<T> = Result<T, SyncError>;
