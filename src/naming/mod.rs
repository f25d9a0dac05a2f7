//! Schema-qualified names and schema-scoped catalog lookups.

pub mod introspection;
pub mod qualifier;

pub use introspection::{
    ForeignKeyAction, ForeignKeyDefinition, IndexDefinition, PgCatalogIntrospection, SchemaFilter,
    SchemaIntrospection, ShardIntrospector,
};
pub use qualifier::{NameQualifier, QualificationMode, QualifiedName, quote_ident};
