//! Names shared across the engine.

/// Bootstrap collection holding one row per registered collection
pub const COLLECTIONS_COLLECTION: &str = "collections";
/// Bootstrap collection holding one row per registered field
pub const FIELDS_COLLECTION: &str = "fields";

/// Logical name of the auto-generated primary key
pub const PRIMARY_KEY_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const CREATED_BY_ID_FIELD: &str = "createdById";
pub const UPDATED_BY_ID_FIELD: &str = "updatedById";

/// Default schema namespace for dialects that support namespaces
pub const DEFAULT_NAMESPACE: &str = "public";

/// Length of generated uid values (without prefix)
pub const UID_LENGTH: usize = 11;

pub const DEFAULT_SORT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_VIEW_SAMPLE_SIZE: usize = 20;
