pub mod collection;
pub mod data_type;
pub mod field;
pub mod field_types;
pub mod record;

pub use collection::{Collection, ImplicitColumn};
pub use data_type::{DataType, TypeFamily};
pub use field::{Field, FieldKind, RelationField, RelationKind, ScalarField, SortField};
pub use field_types::{
    generate_uid, FieldType, FieldTypeRegistry, RelationType, ScalarType, SortType, UidType,
    UuidType,
};
pub use record::{CollectionOptions, CollectionRecord, FieldOptions, FieldRecord};
