use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{DbError, Result};
use crate::shard::Shard;
use super::introspection::SchemaFilter;

/// How shards are told apart in SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualificationMode {
    /// One shard per database: identical SQL everywhere, only the connection differs.
    #[default]
    Unqualified,
    /// Shards share a database and are separated by schema, which SQL must name.
    Qualified,
}

/// Quotes one identifier for PostgreSQL. The only place identifiers get escaped.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A table (or column) name, optionally prefixed by the schema it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    schema: Option<String>,
    identifier: String,
}

impl QualifiedName {
    pub fn new(schema: Option<&str>, identifier: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            identifier: identifier.to_string(),
        }
    }

    /// Splits `schema.table`, honouring double quotes (`"my.schema"."t"`).
    pub fn parse(name: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut was_quoted = false;
        let mut chars = name.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '"' if quoted && chars.peek() == Some(&'"') => {
                    chars.next();
                    current.push('"');
                }
                '"' => {
                    quoted = !quoted;
                    was_quoted = true;
                }
                '.' if !quoted => {
                    parts.push(Self::finish_part(&mut current, &mut was_quoted, name)?);
                }
                c => current.push(c),
            }
        }
        if quoted {
            return Err(DbError::ParseError(format!("unterminated quote in name '{}'", name)));
        }
        parts.push(Self::finish_part(&mut current, &mut was_quoted, name)?);

        match parts.as_slice() {
            [identifier] => Ok(Self::new(None, identifier)),
            [schema, identifier] => Ok(Self::new(Some(schema), identifier)),
            _ => Err(DbError::ParseError(format!("too many name parts in '{}'", name))),
        }
    }

    fn finish_part(current: &mut String, was_quoted: &mut bool, name: &str) -> Result<String> {
        let part = std::mem::take(current);
        let part = if *was_quoted { part } else { part.trim().to_string() };
        *was_quoted = false;
        if part.is_empty() {
            return Err(DbError::ParseError(format!("empty name part in '{}'", name)));
        }
        Ok(part)
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_qualified(&self) -> bool {
        self.schema.is_some()
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    /// `"schema"."identifier"`, or just `"identifier"` when unqualified.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.identifier)),
            None => quote_ident(&self.identifier),
        }
    }

    /// The identifier alone, never qualified (database-level objects).
    pub fn quoted_local(&self) -> String {
        quote_ident(&self.identifier)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.quoted())
    }
}

/// Attaches the active shard's schema to bare names in qualified mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NameQualifier {
    mode: QualificationMode,
}

impl NameQualifier {
    pub fn new(mode: QualificationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> QualificationMode {
        self.mode
    }

    /// The schema SQL must name for `shard`, if any.
    pub fn shard_schema<'a>(&self, shard: &'a Shard) -> Result<Option<&'a str>> {
        match self.mode {
            QualificationMode::Unqualified => Ok(None),
            QualificationMode::Qualified => shard.schema().map(Some).ok_or_else(|| {
                DbError::Configuration(format!(
                    "shard {} has no schema but qualified names are enabled",
                    shard.id()
                ))
            }),
        }
    }

    pub fn qualify(&self, name: &str, shard: &Shard) -> Result<QualifiedName> {
        self.qualify_name(QualifiedName::parse(name)?, shard)
    }

    /// Names that already carry a schema are left untouched.
    pub fn qualify_name(&self, name: QualifiedName, shard: &Shard) -> Result<QualifiedName> {
        if name.is_qualified() {
            return Ok(name);
        }
        Ok(match self.shard_schema(shard)? {
            Some(schema) => name.with_schema(schema),
            None => name,
        })
    }

    /// Schema restriction for catalog lookups on `shard`.
    pub fn schema_filter(&self, shard: &Shard) -> Result<SchemaFilter> {
        Ok(match self.shard_schema(shard)? {
            Some(schema) => SchemaFilter::Exact(schema.to_string()),
            None => SchemaFilter::SearchPath,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardLocator;

    fn shard() -> Shard {
        Shard::new(3, ShardLocator::new("localhost", "app").schema("tenant_3"))
    }

    #[test]
    fn test_parse_names() {
        let name = QualifiedName::parse("users").unwrap();
        assert_eq!(name.schema(), None);
        assert_eq!(name.identifier(), "users");

        let name = QualifiedName::parse("public.users").unwrap();
        assert_eq!(name.schema(), Some("public"));

        let name = QualifiedName::parse("\"odd.schema\".\"Say \"\"hi\"\"\"").unwrap();
        assert_eq!(name.schema(), Some("odd.schema"));
        assert_eq!(name.identifier(), "Say \"hi\"");
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        assert!(QualifiedName::parse("").is_err());
        assert!(QualifiedName::parse("a..b").is_err());
        assert!(QualifiedName::parse("a.b.c").is_err());
        assert!(QualifiedName::parse("\"open").is_err());
    }

    #[test]
    fn test_quoting_escapes() {
        let name = QualifiedName::new(Some("s"), "we\"ird");
        assert_eq!(name.quoted(), "\"s\".\"we\"\"ird\"");
        assert_eq!(name.quoted_local(), "\"we\"\"ird\"");
        assert_eq!(QualifiedName::parse(&name.quoted()).unwrap(), name);
    }

    #[test]
    fn test_qualify_modes() {
        let shard = shard();
        let qualified = NameQualifier::new(QualificationMode::Qualified);
        let unqualified = NameQualifier::new(QualificationMode::Unqualified);

        assert_eq!(qualified.qualify("users", &shard).unwrap().quoted(), "\"tenant_3\".\"users\"");
        assert_eq!(qualified.qualify("other.users", &shard).unwrap().quoted(), "\"other\".\"users\"");
        assert_eq!(unqualified.qualify("users", &shard).unwrap().quoted(), "\"users\"");
    }

    #[test]
    fn test_schema_filter() {
        let shard = shard();
        assert_eq!(
            NameQualifier::new(QualificationMode::Qualified).schema_filter(&shard).unwrap(),
            SchemaFilter::Exact("tenant_3".to_string())
        );
        assert_eq!(NameQualifier::default().schema_filter(&shard).unwrap(), SchemaFilter::SearchPath);
    }

    #[test]
    fn test_qualified_mode_requires_schema() {
        let bare = Shard::new(4, ShardLocator::new("localhost", "app"));
        let qualified = NameQualifier::new(QualificationMode::Qualified);
        assert!(matches!(qualified.qualify("users", &bare), Err(DbError::Configuration(_))));
    }
}
