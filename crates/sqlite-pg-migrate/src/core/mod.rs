//! Core abstractions shared by the migration components.
//!
//! - [`schema`]: column and table metadata, target types
//! - [`value`]: owned SQL values moved between source and target
//! - [`identifier`]: quoting and collision-free identifier sanitization
//! - [`traits`]: source reader, target writer and table load traits

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use identifier::IdentifierSanitizer;
pub use schema::{ColumnDescriptor, ForeignKey, TableDescriptor, TargetColumnSpec, TargetType};
pub use traits::{Batch, Cursor, ReadOptions, Row, SourceReader, TableLoad, TargetWriter};
pub use value::SqlValue;
