//! # Collection Sync
//!
//! Runtime collection and field metadata engine. Collections and fields are
//! declared at runtime, persisted as rows of bootstrap collections, and kept
//! in sync with the physical relational schema.
//!
//! ## Core Components
//!
//! * `naming` - Logical field name to physical column resolution
//! * `schema` - Collections, field kinds and the field-type registry
//! * `registry` - Authoritative in-memory collection map and schema locks
//! * `sync` - Additive reconciliation of declared and live table shapes
//! * `relation` - Relationship defaults, foreign keys and cascades
//! * `sort` - Per-scope sequence assignment for sort fields
//! * `view` - Field inference for database views
//! * `records` - Logical record create/update hooks
//! * `metadata` - Persistence of collections and fields as rows
//! * `storage` - Storage collaborator trait and its sled implementation
//! * `engine` - The [`CollectionEngine`] tying everything together
//!
//! ## Architecture
//!
//! Every operation goes through an explicit [`CollectionEngine`]; there is no
//! global registry. Schema changes lock the collections they touch, update
//! the registry, reconcile storage, and restore the registry when DDL fails.

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod naming;
pub mod records;
pub mod registry;
pub mod relation;
pub mod schema;
pub mod sort;
pub mod storage;
pub mod sync;
pub mod view;

// Re-export main types for convenience
pub use config::{load_engine_config, EngineConfig, SortConfig};
pub use engine::{CollectionEngine, CollectionPatch, DestroyReport, FieldPatch};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use naming::NamingMode;
pub use records::{record, Record};
pub use schema::{Collection, DataType, Field, FieldRecord, FieldTypeRegistry, RelationKind};
pub use sort::SortGuardMode;
pub use storage::{Dialect, SledStorage, Storage, TableRef};
pub use sync::SyncReport;
pub use view::{InferredFields, ViewFieldDescriptor};
