use lazy_static::lazy_static;
use regex::Regex;

use crate::core::{DbError, Result, ShardId, Value};
use crate::identity::GlobalIdCodec;
use crate::routing::KeyKind;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\$(\d+)").unwrap();
    static ref STRING_LITERAL: Regex = Regex::new(r"'(?:[^']|'')*'").unwrap();
}

/// How one `$n` placeholder is treated when a template is replayed on another shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindSlot {
    pub kind: KeyKind,
    pub integral: bool,
}

/// Placeholder classification of a query shape, `$1` first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BindMap {
    slots: Vec<BindSlot>,
}

impl BindMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primary(self) -> Self {
        self.slot(KeyKind::Primary, true)
    }

    pub fn foreign(self, category: &str) -> Self {
        self.slot(KeyKind::foreign(category), true)
    }

    pub fn plain(self) -> Self {
        self.slot(KeyKind::Plain, false)
    }

    pub fn slot(mut self, kind: KeyKind, integral: bool) -> Self {
        self.slots.push(BindSlot { kind, integral });
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[BindSlot] {
        &self.slots
    }

    /// Position of the first primary-key placeholder.
    pub fn primary_position(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.kind == KeyKind::Primary)
    }

    /// Checks that `sql` uses exactly the placeholders `$1..=$len`.
    pub fn check_placeholders(&self, sql: &str) -> Result<()> {
        let sql = STRING_LITERAL.replace_all(sql, "''");
        let highest = PLACEHOLDER
            .captures_iter(&sql)
            .filter_map(|caps| caps[1].parse::<usize>().ok())
            .max()
            .unwrap_or(0);
        if highest != self.slots.len() {
            return Err(DbError::ParseError(format!(
                "statement uses {} placeholders but {} are described",
                highest,
                self.slots.len()
            )));
        }
        Ok(())
    }

    /// Rewrites integral key parameters, read relative to the shard
    /// `source_of` names for their key space, into the form `target` expects.
    /// Plain and opaque parameters pass through; malformed ones become NULL.
    pub fn translate<S>(
        &self,
        params: &[Value],
        codec: &GlobalIdCodec,
        mut source_of: S,
        target: ShardId,
    ) -> Result<Vec<Value>>
    where
        S: FnMut(&KeyKind) -> Result<ShardId>,
    {
        if params.len() != self.slots.len() {
            return Err(DbError::ExecutionError(format!(
                "expected {} bind values, got {}",
                self.slots.len(),
                params.len()
            )));
        }

        self.slots
            .iter()
            .zip(params)
            .map(|(slot, value)| {
                if !slot.kind.is_key() || !slot.integral {
                    return Ok(value.clone());
                }
                let source = source_of(&slot.kind)?;
                let id = codec.classify(value, true);
                Ok(codec.relative(&id, source, target).to_value())
            })
            .collect()
    }
}
