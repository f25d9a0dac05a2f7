use crate::core::Row;

/// Rows returned by a shard, or the concatenation of several shards' rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Appends another shard's rows, keeping the first non-empty column list.
    pub fn append(&mut self, other: QueryResult) {
        if self.columns.is_empty() {
            self.columns = other.columns;
        }
        self.rows.extend(other.rows);
    }

    /// Concatenates per-shard results in the order given.
    pub fn concat(results: impl IntoIterator<Item = QueryResult>) -> Self {
        let mut merged = Self::empty();
        for result in results {
            merged.append(result);
        }
        merged
    }
}
