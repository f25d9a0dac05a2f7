use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

use crate::connection::ShardConnection;
use crate::core::{Result, Value};
use crate::shard::Shard;
use super::qualifier::{NameQualifier, QualificationMode, QualifiedName};

lazy_static! {
    static ref DESC_COLUMN: Regex = Regex::new(r#"("?[\w]+"?) DESC"#).unwrap();
    static ref USING_METHOD: Regex = Regex::new(r"USING (\w+)").unwrap();
    static ref WHERE_CLAUSE: Regex = Regex::new(r"WHERE (.+)$").unwrap();
    static ref COLUMN_LIST: Regex = Regex::new(r"USING \w+ \((.+?)\)(?: INCLUDE| WHERE|$)").unwrap();
}

/// Which schemas a catalog lookup may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaFilter {
    /// Exactly the shard's schema.
    Exact(String),
    /// Whatever the connection's search path resolves to.
    SearchPath,
}

impl SchemaFilter {
    /// Renders a condition on `column`. The schema travels as a bind value.
    pub fn to_sql(&self, column: &str, binds: &mut Vec<Value>) -> String {
        match self {
            Self::Exact(schema) => {
                binds.push(Value::Text(schema.clone()));
                format!("{} = ${}", column, binds.len())
            }
            Self::SearchPath => format!("{} = ANY (current_schemas(false))", column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub table: String,
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
    pub descending: Vec<String>,
    pub predicate: Option<String>,
    pub using: Option<String>,
}

impl IndexDefinition {
    /// Builds a definition from the text `pg_get_indexdef` returns.
    pub fn from_indexdef(table: &str, name: &str, indexdef: &str) -> Self {
        let columns = COLUMN_LIST
            .captures(indexdef)
            .map(|caps| {
                caps[1]
                    .split(',')
                    .map(|col| col.trim().trim_end_matches(" DESC").trim_matches('"').to_string())
                    .collect()
            })
            .unwrap_or_default();
        let descending = DESC_COLUMN
            .captures_iter(indexdef)
            .map(|caps| caps[1].trim_matches('"').to_string())
            .collect();

        Self {
            table: table.to_string(),
            name: name.to_string(),
            unique: indexdef.starts_with("CREATE UNIQUE INDEX"),
            columns,
            descending,
            predicate: WHERE_CLAUSE.captures(indexdef).map(|caps| caps[1].to_string()),
            using: USING_METHOD.captures(indexdef).map(|caps| caps[1].to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    /// Decodes `pg_constraint.confupdtype` / `confdeltype`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "a" => Some(Self::NoAction),
            "r" => Some(Self::Restrict),
            "c" => Some(Self::Cascade),
            "n" => Some(Self::SetNull),
            "d" => Some(Self::SetDefault),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDefinition {
    pub from_table: String,
    pub to_table: String,
    pub column: String,
    pub primary_key: String,
    pub name: String,
    pub on_update: Option<ForeignKeyAction>,
    pub on_delete: Option<ForeignKeyAction>,
}

/// Catalog queries, supplied by the database driver layer.
#[async_trait]
pub trait SchemaIntrospection: Send + Sync {
    async fn list_tables(&self, shard: &Shard, filter: &SchemaFilter) -> Result<Vec<String>>;

    async fn list_indexes(
        &self,
        shard: &Shard,
        table: &str,
        filter: &SchemaFilter,
    ) -> Result<Vec<IndexDefinition>>;

    async fn list_foreign_keys(
        &self,
        shard: &Shard,
        table: &str,
        filter: &SchemaFilter,
    ) -> Result<Vec<ForeignKeyDefinition>>;
}

/// Runs catalog lookups restricted to the schema of the shard being inspected,
/// so shards sharing a database never see each other's tables.
pub struct ShardIntrospector<I> {
    inner: I,
    qualifier: NameQualifier,
}

impl<I: SchemaIntrospection> ShardIntrospector<I> {
    pub fn new(inner: I, mode: QualificationMode) -> Self {
        Self {
            inner,
            qualifier: NameQualifier::new(mode),
        }
    }

    pub async fn tables(&self, shard: &Shard) -> Result<Vec<String>> {
        let filter = self.qualifier.schema_filter(shard)?;
        self.inner.list_tables(shard, &filter).await
    }

    /// An explicit schema in `name` wins over the shard's own schema.
    pub async fn table_exists(&self, shard: &Shard, name: &str) -> Result<bool> {
        let name = self.qualifier.qualify(name, shard)?;
        let filter = match name.schema() {
            Some(schema) => SchemaFilter::Exact(schema.to_string()),
            None => SchemaFilter::SearchPath,
        };
        let tables = self.inner.list_tables(shard, &filter).await?;
        Ok(tables.iter().any(|table| table == name.identifier()))
    }

    pub async fn indexes(&self, shard: &Shard, table: &str) -> Result<Vec<IndexDefinition>> {
        let filter = self.qualifier.schema_filter(shard)?;
        self.inner.list_indexes(shard, table, &filter).await
    }

    /// Referenced tables inside the shard's own schema are reported unqualified.
    pub async fn foreign_keys(&self, shard: &Shard, table: &str) -> Result<Vec<ForeignKeyDefinition>> {
        let filter = self.qualifier.schema_filter(shard)?;
        let own_schema = self.qualifier.shard_schema(shard)?;
        let mut keys = self.inner.list_foreign_keys(shard, table, &filter).await?;

        if let Some(own_schema) = own_schema {
            for key in &mut keys {
                if let Ok(target) = QualifiedName::parse(&key.to_table) {
                    if target.schema() == Some(own_schema) {
                        key.to_table = target.identifier().to_string();
                    }
                }
            }
        }
        Ok(keys)
    }
}

/// [`SchemaIntrospection`] over PostgreSQL's system catalogs.
pub struct PgCatalogIntrospection<C> {
    connection: Arc<C>,
}

impl<C: ShardConnection> PgCatalogIntrospection<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self { connection }
    }
}

fn text_at(row: &[Value], index: usize) -> String {
    row.get(index).map(|value| value.to_string()).unwrap_or_default()
}

#[async_trait]
impl<C: ShardConnection> SchemaIntrospection for PgCatalogIntrospection<C> {
    async fn list_tables(&self, shard: &Shard, filter: &SchemaFilter) -> Result<Vec<String>> {
        let mut binds = Vec::new();
        let sql = format!(
            "SELECT tablename FROM pg_tables WHERE {}",
            filter.to_sql("schemaname", &mut binds)
        );
        let result = self.connection.execute(shard, &sql, &binds).await?;
        Ok(result.rows.iter().map(|row| text_at(row, 0)).collect())
    }

    async fn list_indexes(
        &self,
        shard: &Shard,
        table: &str,
        filter: &SchemaFilter,
    ) -> Result<Vec<IndexDefinition>> {
        let mut binds = vec![Value::Text(table.to_string())];
        let sql = format!(
            "SELECT i.relname, pg_get_indexdef(d.indexrelid) \
             FROM pg_class t \
             INNER JOIN pg_index d ON t.oid = d.indrelid \
             INNER JOIN pg_class i ON d.indexrelid = i.oid \
             INNER JOIN pg_namespace n ON i.relnamespace = n.oid \
             WHERE i.relkind = 'i' AND d.indisprimary = 'f' AND t.relname = $1 AND {} \
             ORDER BY i.relname",
            filter.to_sql("n.nspname", &mut binds)
        );
        let result = self.connection.execute(shard, &sql, &binds).await?;
        Ok(result
            .rows
            .iter()
            .map(|row| IndexDefinition::from_indexdef(table, &text_at(row, 0), &text_at(row, 1)))
            .collect())
    }

    async fn list_foreign_keys(
        &self,
        shard: &Shard,
        table: &str,
        filter: &SchemaFilter,
    ) -> Result<Vec<ForeignKeyDefinition>> {
        let mut binds = vec![Value::Text(table.to_string())];
        let sql = format!(
            "SELECT t2.oid::regclass::text AS to_table, a1.attname AS column, a2.attname AS primary_key, \
             c.conname AS name, c.confupdtype AS on_update, c.confdeltype AS on_delete \
             FROM pg_constraint c \
             JOIN pg_class t1 ON c.conrelid = t1.oid \
             JOIN pg_class t2 ON c.confrelid = t2.oid \
             JOIN pg_attribute a1 ON a1.attnum = c.conkey[1] AND a1.attrelid = t1.oid \
             JOIN pg_attribute a2 ON a2.attnum = c.confkey[1] AND a2.attrelid = t2.oid \
             JOIN pg_namespace t3 ON c.connamespace = t3.oid \
             WHERE c.contype = 'f' AND t1.relname = $1 AND {} \
             ORDER BY c.conname",
            filter.to_sql("t3.nspname", &mut binds)
        );
        let result = self.connection.execute(shard, &sql, &binds).await?;
        Ok(result
            .rows
            .iter()
            .map(|row| ForeignKeyDefinition {
                from_table: table.to_string(),
                to_table: text_at(row, 0),
                column: text_at(row, 1),
                primary_key: text_at(row, 2),
                name: text_at(row, 3),
                on_update: ForeignKeyAction::from_code(&text_at(row, 4)),
                on_delete: ForeignKeyAction::from_code(&text_at(row, 5)),
            })
            .collect())
    }
}
