use std::collections::HashSet;
use std::ops::ControlFlow;

use sqlparser::ast::{Ident, ObjectNamePart, Query, Statement, Visit, Visitor, visit_relations_mut};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::cache::StatementKind;
use crate::core::{DbError, Result, ShardId, Value};
use crate::naming::QualificationMode;
use super::bind_map::BindMap;

/// A query as the application writes it: shard-agnostic SQL plus a
/// description of its placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryShape {
    sql: String,
    bind_map: BindMap,
}

impl QueryShape {
    pub fn new(sql: &str, bind_map: BindMap) -> Self {
        Self {
            sql: sql.trim().to_string(),
            bind_map,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bind_map(&self) -> &BindMap {
        &self.bind_map
    }
}

/// Identity of a cached template. Unqualified templates carry no shard
/// because their SQL is the same on every shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub shape: QueryShape,
    pub mode: QualificationMode,
    pub shard: Option<ShardId>,
}

/// A parsed, shard-ready statement. Immutable once built.
#[derive(Debug, Clone)]
pub struct StatementTemplate {
    key: TemplateKey,
    sql: String,
    kind: StatementKind,
}

impl StatementTemplate {
    /// Parses `shape` and, when `schema` is given, qualifies every bare
    /// relation name with it.
    pub fn build(key: TemplateKey, schema: Option<&str>) -> Result<Self> {
        key.shape.bind_map.check_placeholders(&key.shape.sql)?;

        let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, &key.shape.sql)?;
        let mut statement = match statements.len() {
            1 => statements.remove(0),
            n => {
                return Err(DbError::ParseError(format!(
                    "a query shape must hold exactly one statement, found {}",
                    n
                )));
            }
        };

        let sql = match schema {
            Some(schema) => {
                qualify_relations(&mut statement, schema);
                statement.to_string()
            }
            None => key.shape.sql.clone(),
        };
        let kind = StatementKind::classify(&sql);

        Ok(Self { key, sql, kind })
    }

    pub fn key(&self) -> &TemplateKey {
        &self.key
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bind_map(&self) -> &BindMap {
        self.key.shape.bind_map()
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn is_write(&self) -> bool {
        self.kind.is_write()
    }

    /// Checks `binds` fit the template's placeholders.
    pub fn check_binds(&self, binds: &[Value]) -> Result<()> {
        if binds.len() != self.bind_map().len() {
            return Err(DbError::ExecutionError(format!(
                "template expects {} bind values, got {}",
                self.bind_map().len(),
                binds.len()
            )));
        }
        Ok(())
    }
}

/// Collects the names introduced by `WITH` clauses anywhere in a statement.
#[derive(Default)]
struct CteNames(HashSet<String>);

impl Visitor for CteNames {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.0.insert(cte.alias.name.value.clone());
            }
        }
        ControlFlow::Continue(())
    }
}

fn qualify_relations(statement: &mut Statement, schema: &str) {
    let mut ctes = CteNames::default();
    let _ = statement.visit(&mut ctes);

    let _ = visit_relations_mut(statement, |name| {
        if let [ObjectNamePart::Identifier(ident)] = name.0.as_slice() {
            if !ctes.0.contains(&ident.value) {
                name.0.insert(0, ObjectNamePart::Identifier(Ident::with_quote('"', schema)));
            }
        }
        ControlFlow::<()>::Continue(())
    });
}
