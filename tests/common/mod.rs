//! In-memory stand-in for a fleet of PostgreSQL shards.
//!
//! Understands just the SQL the engine emits: `SELECT * FROM <table> [WHERE
//! <key conditions joined by AND>]`, `INSERT INTO <table> VALUES (...)`,
//! `UPDATE <table> SET <col> = $n WHERE ...`, `DELETE FROM <table> WHERE ...`,
//! plus the search-path and `pg_tables` catalog queries.

#![allow(dead_code)]

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use shardwise::{
    ActivationContext, DbError, QueryResult, RegistryHandle, Result, Row, Shard, ShardConnection, ShardId,
    ShardLocator, ShardRegistry, Value, PRIMARY_CATEGORY,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

lazy_static! {
    static ref TABLE_NAME: Regex = Regex::new(r#"^(?:"?([\w]+)"?\.)?"?([\w]+)"?$"#).unwrap();
    static ref SELECT: Regex = Regex::new(r"(?is)^SELECT \* FROM (\S+)(?: WHERE (.+))?$").unwrap();
    static ref INSERT: Regex = Regex::new(r"(?is)^INSERT INTO (\S+) VALUES \((.+)\)$").unwrap();
    static ref UPDATE: Regex = Regex::new(r"(?is)^UPDATE (\S+) SET (\S+) = \$(\d+)(?: WHERE (.+))?$").unwrap();
    static ref DELETE: Regex = Regex::new(r"(?is)^DELETE FROM (\S+)(?: WHERE (.+))?$").unwrap();
    static ref CONDITION: Regex = Regex::new(r"(?i)^(\S+) (=|<>|IN|NOT IN) (.+)$").unwrap();
    static ref LEADING_COMMENTS: Regex = Regex::new(r"(?s)^(?:\s*/\*.*?\*/|\s*--[^\n]*\n)*\s*").unwrap();
    static ref PLACEHOLDER: Regex = Regex::new(r"\$(\d+)").unwrap();
}

/// One statement as it reached the fake database.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub shard: ShardId,
    /// Shard active for the primary category while the statement ran.
    pub active: Option<ShardId>,
    pub sql: String,
    pub binds: Vec<Value>,
}

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Default)]
pub struct FakeShards {
    tables: Mutex<HashMap<(ShardId, String), Table>>,
    log: Mutex<Vec<Dispatch>>,
    writes: AtomicUsize,
    delay_ms: AtomicUsize,
    /// Delay after the statement has been applied, before the reply.
    reply_delay_ms: AtomicUsize,
    transaction: AtomicBool,
}

impl FakeShards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, shard: i64, table: &str, columns: &[&str]) {
        self.tables.lock().unwrap().insert(
            (ShardId(shard), table.to_string()),
            Table {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
    }

    pub fn insert(&self, shard: i64, table: &str, row: Vec<Value>) {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.get_mut(&(ShardId(shard), table.to_string())).expect("table exists");
        assert_eq!(table.columns.len(), row.len());
        table.rows.push(row);
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.log.lock().unwrap().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        self.reply_delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_in_transaction(&self, open: bool) {
        self.transaction.store(open, Ordering::SeqCst);
    }

    /// Resolves a possibly schema-qualified table name on `shard`. A schema
    /// other than the shard's own is an error, which is how tests catch SQL
    /// qualified for the wrong shard.
    fn resolve_table(shard: &Shard, name: &str) -> Result<String> {
        let caps = TABLE_NAME
            .captures(name)
            .ok_or_else(|| DbError::ExecutionError(format!("bad table name {}", name)))?;
        if let Some(schema) = caps.get(1) {
            if Some(schema.as_str()) != shard.schema() {
                return Err(DbError::ExecutionError(format!(
                    "schema {} is not visible on shard {}",
                    schema.as_str(),
                    shard.id()
                )));
            }
        }
        Ok(caps[2].to_string())
    }

    fn table_mut<'a>(tables: &'a mut HashMap<(ShardId, String), Table>, shard: &Shard, name: &str) -> Result<&'a mut Table> {
        let name = Self::resolve_table(shard, name)?;
        tables
            .get_mut(&(shard.id(), name.clone()))
            .ok_or_else(|| DbError::ExecutionError(format!("relation {} does not exist", name)))
    }

    fn bind(binds: &[Value], placeholder: &str) -> Result<Value> {
        let index: usize = PLACEHOLDER
            .captures(placeholder)
            .and_then(|caps| caps[1].parse().ok())
            .ok_or_else(|| DbError::ExecutionError(format!("expected placeholder, got {}", placeholder)))?;
        binds
            .get(index - 1)
            .cloned()
            .ok_or_else(|| DbError::ExecutionError(format!("missing bind ${}", index)))
    }

    fn matches(table: &Table, row: &Row, conditions: Option<&str>, binds: &[Value]) -> Result<bool> {
        let Some(conditions) = conditions else { return Ok(true) };
        for condition in conditions.split(" AND ") {
            let condition = condition.trim();
            let keep = match condition {
                "1 = 0" => false,
                "1 = 1" => true,
                _ => {
                    let caps = CONDITION
                        .captures(condition)
                        .ok_or_else(|| DbError::ExecutionError(format!("unsupported condition {}", condition)))?;
                    let column = caps[1].trim_matches('"');
                    let position = table
                        .columns
                        .iter()
                        .position(|c| c == column)
                        .ok_or_else(|| DbError::ExecutionError(format!("no column {}", column)))?;
                    let cell = &row[position];
                    let values = PLACEHOLDER
                        .find_iter(&caps[3])
                        .map(|m| Self::bind(binds, m.as_str()))
                        .collect::<Result<Vec<_>>>()?;
                    // SQL semantics: comparisons with NULL never hold.
                    let hit = values.iter().any(|v| !v.is_null() && v == cell);
                    match caps[2].to_ascii_uppercase().as_str() {
                        "=" | "IN" => hit,
                        _ => !hit && values.iter().all(|v| !v.is_null()),
                    }
                }
            };
            if !keep {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn run(&self, shard: &Shard, sql: &str, binds: &[Value]) -> Result<QueryResult> {
        let stripped = LEADING_COMMENTS.replace(sql, "");
        let sql: &str = &stripped;
        if sql.contains("current_schemas(false)") && sql.contains("unnest") {
            let schema = shard.schema().unwrap_or("public").to_string();
            return Ok(QueryResult::new(vec!["schema".into()], vec![vec![Value::Text(schema)]]));
        }

        if sql.contains("FROM pg_tables") {
            let visible = match binds.first() {
                Some(Value::Text(schema)) => Some(schema.as_str()) == shard.schema(),
                _ => true,
            };
            let tables = self.tables.lock().unwrap();
            let mut names: Vec<String> = tables
                .keys()
                .filter(|(id, _)| visible && *id == shard.id())
                .map(|(_, name)| name.clone())
                .collect();
            names.sort();
            return Ok(QueryResult::new(
                vec!["tablename".into()],
                names.into_iter().map(|n| vec![Value::Text(n)]).collect(),
            ));
        }

        let mut tables = self.tables.lock().unwrap();
        let tables = &mut *tables;

        if let Some(caps) = SELECT.captures(sql) {
            let table = Self::table_mut(tables, shard, &caps[1])?;
            let mut rows = Vec::new();
            for row in &table.rows {
                if Self::matches(table, row, caps.get(2).map(|m| m.as_str()), binds)? {
                    rows.push(row.clone());
                }
            }
            return Ok(QueryResult::new(table.columns.clone(), rows));
        }

        if let Some(caps) = INSERT.captures(sql) {
            let table = Self::table_mut(tables, shard, &caps[1])?;
            let row = caps[2]
                .split(',')
                .map(|p| Self::bind(binds, p.trim()))
                .collect::<Result<Row>>()?;
            table.rows.push(row);
            self.writes.fetch_add(1, Ordering::SeqCst);
            return Ok(QueryResult::empty());
        }

        if let Some(caps) = UPDATE.captures(sql) {
            let table = Self::table_mut(tables, shard, &caps[1])?;
            let column = caps[2].trim_matches('"').to_string();
            let value = Self::bind(binds, &format!("${}", &caps[3]))?;
            let position = table
                .columns
                .iter()
                .position(|c| *c == column)
                .ok_or_else(|| DbError::ExecutionError(format!("no column {}", column)))?;
            let snapshot = table.clone();
            for row in table.rows.iter_mut() {
                if Self::matches(&snapshot, row, caps.get(4).map(|m| m.as_str()), binds)? {
                    row[position] = value.clone();
                }
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            return Ok(QueryResult::empty());
        }

        if let Some(caps) = DELETE.captures(sql) {
            let table = Self::table_mut(tables, shard, &caps[1])?;
            let snapshot = table.clone();
            let mut kept = Vec::new();
            for row in table.rows.drain(..) {
                if !Self::matches(&snapshot, &row, caps.get(2).map(|m| m.as_str()), binds)? {
                    kept.push(row);
                }
            }
            table.rows = kept;
            self.writes.fetch_add(1, Ordering::SeqCst);
            return Ok(QueryResult::empty());
        }

        Err(DbError::ExecutionError(format!("unsupported statement: {}", sql)))
    }
}

#[async_trait]
impl ShardConnection for FakeShards {
    async fn execute(&self, shard: &Shard, sql: &str, binds: &[Value]) -> Result<QueryResult> {
        self.log.lock().unwrap().push(Dispatch {
            shard: shard.id(),
            active: ActivationContext::current().shard_for(PRIMARY_CATEGORY),
            sql: sql.to_string(),
            binds: binds.to_vec(),
        });

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        let result = self.run(shard, sql, binds);

        let reply_delay = self.reply_delay_ms.load(Ordering::SeqCst);
        if reply_delay > 0 {
            tokio::time::sleep(Duration::from_millis(reply_delay as u64)).await;
        }
        result
    }

    fn in_transaction(&self) -> bool {
        self.transaction.load(Ordering::SeqCst)
    }
}

/// Shards 1..=count, shard 1 the default. Each lives in database `app` under
/// schema `tenant_<id>`.
pub fn registry(count: i64) -> RegistryHandle {
    let registry = ShardRegistry::new();
    for id in 1..=count {
        let locator = ShardLocator::from_url(&format!("postgres://db.local/app?schema=tenant_{}", id)).unwrap();
        let mut shard = Shard::new(id, locator);
        if id == 1 {
            shard = shard.as_default();
        }
        registry.register(shard).unwrap();
    }
    registry.into_handle()
}

/// A `users (id, name)` table on every shard.
pub fn with_users(fake: &FakeShards, shards: i64) {
    for id in 1..=shards {
        fake.create_table(id, "users", &["id", "name"]);
    }
}
