use std::sync::Arc;

use futures::future::try_join_all;
use log::debug;
use tracing::Instrument;

use crate::cache::QueryCache;
use crate::connection::{CachingConnection, EngineConfig, ShardConnection};
use crate::core::{DbError, PRIMARY_CATEGORY, Result, ShardId, Value};
use crate::identity::{DecodedId, GlobalIdCodec, IdentifierValue};
use crate::naming::{
    NameQualifier, PgCatalogIntrospection, QualificationMode, QualifiedName, ShardIntrospector,
};
use crate::result::QueryResult;
use crate::routing::{KeyKind, RoutingPlan, RoutingRequest, ShardRouter};
use crate::shard::{RegistryHandle, Shard};
use crate::statement::{BindMap, QueryShape, StatementCache};

/// Entry point of the sharding layer.
///
/// Routes each query to its shards, replays one parsed template per shard
/// with the key values rewritten for it, and concatenates the per-shard
/// rows in shard-set order. Writes are not made atomic across shards.
pub struct ShardedEngine<C> {
    config: EngineConfig,
    registry: RegistryHandle,
    router: ShardRouter,
    statements: StatementCache,
    connection: Arc<C>,
}

impl<C: ShardConnection> ShardedEngine<C> {
    pub fn new(config: EngineConfig, registry: RegistryHandle, connection: C) -> Result<Self> {
        config.validate().map_err(DbError::Configuration)?;
        let codec = GlobalIdCodec::new(config.ids_per_shard)?;
        registry.default_shard()?;

        for shard in registry.all()? {
            if shard.id().get() > codec.max_shard_id() {
                return Err(DbError::InvalidShardId(shard.id().get()));
            }
            if config.qualification_mode == QualificationMode::Qualified && shard.schema().is_none() {
                return Err(DbError::Configuration(format!(
                    "shard {} has no schema but qualified names are enabled",
                    shard.id()
                )));
            }
        }

        Ok(Self {
            router: ShardRouter::new(Arc::clone(&registry), codec),
            config,
            registry,
            statements: StatementCache::new(),
            connection: Arc::new(connection),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn codec(&self) -> &GlobalIdCodec {
        self.router.codec()
    }

    pub fn statements(&self) -> &StatementCache {
        &self.statements
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn infer_shards(&self, request: &RoutingRequest) -> Result<RoutingPlan> {
        self.router.infer(request)
    }

    /// Qualifies `name` for the shard currently active for the primary category.
    pub fn qualify(&self, name: &str) -> Result<QualifiedName> {
        let shard = self.registry.current(PRIMARY_CATEGORY)?;
        NameQualifier::new(self.config.qualification_mode).qualify(name, &shard)
    }

    /// Catalog lookups scoped to each shard's own schema.
    pub fn introspector(&self) -> ShardIntrospector<PgCatalogIntrospection<C>> {
        ShardIntrospector::new(
            PgCatalogIntrospection::new(Arc::clone(&self.connection)),
            self.config.qualification_mode,
        )
    }

    /// `SELECT *` from `table` on every shard the request routes to.
    ///
    /// Only the `SELECT * FROM <table>` prefix goes through the statement
    /// cache; the key conditions hold no relation names and are appended per
    /// shard, so varying IN-list lengths never add templates.
    pub async fn select(&self, table: &str, request: &RoutingRequest) -> Result<QueryResult> {
        let plan = self.router.infer(request)?;
        let table = QualifiedName::parse(table)?.quoted();
        let prefix = QueryShape::new(&format!("SELECT * FROM {}", table), BindMap::new());

        let queries = plan.targets().iter().map(|target| {
            // Values are already rewritten for this shard.
            let mut binds = Vec::new();
            let conditions = target.where_clause(&mut binds);
            let shard = Arc::clone(&target.shard);
            let category = request.category.as_str();
            let prefix = &prefix;

            async move {
                let template = self
                    .statements
                    .template_for(prefix, self.config.qualification_mode, Some(&*shard))?;
                let sql = match conditions {
                    Some(conditions) => format!("{} WHERE {}", template.sql(), conditions),
                    None => template.sql().to_string(),
                };
                self.dispatch(&shard, category, &sql, &binds).await
            }
        });

        Ok(QueryResult::concat(try_join_all(queries).await?))
    }

    /// Runs a template on the shard its primary-key parameter belongs to,
    /// or on the current shard when that parameter is local or absent.
    pub async fn execute_template(&self, shape: &QueryShape, category: &str, params: &[Value]) -> Result<QueryResult> {
        let current = self.registry.current(category)?.id();
        let target = match shape.bind_map().primary_position().and_then(|i| params.get(i)) {
            Some(value) => self.home_shard(value).unwrap_or(current),
            None => current,
        };
        let shard = self.registry.lookup(target)?;

        let binds = shape.bind_map().translate(
            params,
            self.codec(),
            |kind| self.source_shard(kind, category, current),
            target,
        )?;
        let template = self
            .statements
            .template_for(shape, self.config.qualification_mode, Some(&*shard))?;
        template.check_binds(&binds)?;
        debug!("template routed to shard {} (current {})", target, current);

        self.dispatch(&shard, category, template.sql(), &binds).await
    }

    /// Runs raw SQL on one shard, activating it for `category`.
    pub async fn execute_on(&self, shard: ShardId, category: &str, sql: &str, binds: &[Value]) -> Result<QueryResult> {
        let shard = self.registry.lookup(shard)?;
        self.dispatch(&shard, category, sql, binds).await
    }

    fn home_shard(&self, value: &Value) -> Option<ShardId> {
        match self.codec().classify(value, true) {
            IdentifierValue::Global(global) => match self.codec().decode(global.get()) {
                DecodedId::Global { shard, .. } if self.registry.contains(shard) => Some(shard),
                _ => None,
            },
            _ => None,
        }
    }

    fn source_shard(&self, kind: &KeyKind, category: &str, current: ShardId) -> Result<ShardId> {
        match kind {
            KeyKind::Foreign { category: other } if other != category => {
                Ok(self.registry.current(other)?.id())
            }
            _ => Ok(current),
        }
    }

    async fn dispatch(&self, shard: &Arc<Shard>, category: &str, sql: &str, binds: &[Value]) -> Result<QueryResult> {
        let id = shard.id();
        let span = tracing::info_span!("shard_query", shard = id.get(), category = category);
        let timeout = self.config.timeout();

        let (result, cached) = self
            .registry
            .activate(id, category, async {
                let query = self.connection.execute_cached(shard, sql, binds);
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, query).await.map_err(|_| DbError::Timeout {
                        shard: id,
                        millis: limit.as_millis() as u64,
                    })?,
                    None => query.await,
                }
            })
            .instrument(span)
            .await?;

        if cached {
            debug!("shard {} served {} rows from cache", id, result.row_count());
        }
        Ok(result)
    }
}

impl<C: ShardConnection> ShardedEngine<CachingConnection<C>> {
    /// Wraps `connection` in a result cache sized by `config`.
    pub fn with_query_cache(config: EngineConfig, registry: RegistryHandle, connection: C) -> Result<Self> {
        let mut cache = QueryCache::new(config.query_cache_capacity);
        if let Some(ttl) = config.cache_ttl() {
            cache = cache.with_ttl(ttl);
        }
        cache.set_enabled(config.query_cache_enabled);
        Self::new(config, registry, CachingConnection::new(connection, Arc::new(cache)))
    }

    pub fn query_cache(&self) -> &Arc<QueryCache> {
        self.connection.cache()
    }
}
