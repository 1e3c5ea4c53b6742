//! Table-driven list/get/create/update/delete for the simple record types.
//!
//! Every record editor shares one repository; a record type is described by an
//! [`EntitySchema`] (columns, sortable and searchable columns, dependents).

pub mod repo;
pub mod schema;

pub use repo::{create, delete, dependents, get, list, update, FieldValue, ListQuery};
pub use schema::{schema, EntitySchema, FieldKind, FieldSpec, ENTITIES};
