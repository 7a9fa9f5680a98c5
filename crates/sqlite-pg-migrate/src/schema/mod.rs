//! Schema translation: source introspection and target table creation.

mod builder;
mod introspect;

pub use builder::SchemaBuilder;
pub use introspect::SchemaIntrospector;
