use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LEADING_KEYWORD: Regex = Regex::new(r"^\s*(?:\(\s*)*([A-Za-z]+)").unwrap();
    static ref LOCKING_CLAUSE: Regex =
        Regex::new(r"(?i)\bFOR\s+(?:UPDATE|SHARE|NO\s+KEY\s+UPDATE|KEY\s+SHARE)\b").unwrap();
    static ref DATA_MODIFYING: Regex = Regex::new(r"(?i)\b(?:INSERT|UPDATE|DELETE|MERGE)\b").unwrap();
    static ref STRING_LITERAL: Regex = Regex::new(r"'(?:[^']|'')*'").unwrap();
    static ref COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/|--[^\n]*").unwrap();
}

/// What a statement does to the shard it runs on, as far as caching cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Read,
    /// `SELECT ... FOR UPDATE` and friends: reads that must see the live rows.
    LockingRead,
    Write,
    /// Session and transaction control; neither cached nor invalidating.
    Other,
}

impl StatementKind {
    pub fn classify(sql: &str) -> Self {
        // Keywords inside string literals and comments must not count.
        let sql = STRING_LITERAL.replace_all(sql, "''");
        let sql = COMMENT.replace_all(&sql, " ");
        let Some(keyword) = LEADING_KEYWORD.captures(&sql).map(|caps| caps[1].to_ascii_uppercase()) else {
            return Self::Other;
        };

        match keyword.as_str() {
            "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "TRUNCATE" | "UPSERT" | "REPLACE" | "CREATE"
            | "ALTER" | "DROP" => Self::Write,
            "WITH" if DATA_MODIFYING.is_match(&sql) => Self::Write,
            "SELECT" | "WITH" | "VALUES" | "TABLE" | "SHOW" | "EXPLAIN" => {
                if LOCKING_CLAUSE.is_match(&sql) {
                    Self::LockingRead
                } else {
                    Self::Read
                }
            }
            _ => Self::Other,
        }
    }

    pub fn is_write(self) -> bool {
        self == Self::Write
    }

    pub fn is_cacheable(self) -> bool {
        self == Self::Read
    }
}
