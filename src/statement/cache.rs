use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::debug;

use crate::core::{DbError, Result};
use crate::naming::{NameQualifier, QualificationMode};
use crate::shard::Shard;
use super::template::{QueryShape, StatementTemplate, TemplateKey};

/// Memoizes parsed statement templates, one per shape in unqualified mode
/// and one per `(shape, shard)` in qualified mode.
///
/// Templates depend only on the schema, never on data, so nothing here is
/// invalidated by writes. [`clear`](Self::clear) exists for schema changes.
#[derive(Debug, Default)]
pub struct StatementCache {
    templates: RwLock<HashMap<TemplateKey, Arc<StatementTemplate>>>,
    builds: AtomicU64,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template_for(
        &self,
        shape: &QueryShape,
        mode: QualificationMode,
        shard: Option<&Shard>,
    ) -> Result<Arc<StatementTemplate>> {
        let (key, schema) = match mode {
            QualificationMode::Unqualified => (
                TemplateKey {
                    shape: shape.clone(),
                    mode,
                    shard: None,
                },
                None,
            ),
            QualificationMode::Qualified => {
                let shard = shard.ok_or_else(|| {
                    DbError::Configuration("qualified templates need a target shard".to_string())
                })?;
                let schema = NameQualifier::new(mode).shard_schema(shard)?;
                (
                    TemplateKey {
                        shape: shape.clone(),
                        mode,
                        shard: Some(shard.id()),
                    },
                    schema,
                )
            }
        };

        if let Some(template) = self.templates.read()?.get(&key) {
            return Ok(Arc::clone(template));
        }

        // Built outside the write lock; a racing builder's template wins and
        // ours is dropped, so readers only ever see complete entries.
        let built = Arc::new(StatementTemplate::build(key.clone(), schema)?);
        self.builds.fetch_add(1, Ordering::Relaxed);
        debug!("built statement template for shard {:?}: {}", key.shard, built.sql());

        let mut templates = self.templates.write()?;
        Ok(Arc::clone(templates.entry(key).or_insert(built)))
    }

    pub fn len(&self) -> usize {
        self.templates.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many templates have been parsed so far.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn clear(&self) -> Result<()> {
        self.templates.write()?.clear();
        Ok(())
    }
}
