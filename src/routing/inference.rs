use std::sync::Arc;

use log::debug;

use crate::core::{DbError, PRIMARY_CATEGORY, Result, ShardId, Value};
use crate::identity::{DecodedId, GlobalIdCodec, IdentifierValue};
use crate::shard::{RegistryHandle, Shard};
use super::predicate::{BoundPredicate, KeyKind, PredicateOperator, QueryPredicate};
use super::shard_set::{ShardHint, ShardSet, ShardSource};

/// A query's key predicates plus where the caller wants it to run.
#[derive(Debug, Clone)]
pub struct RoutingRequest {
    pub category: String,
    pub predicates: Vec<QueryPredicate>,
    pub hint: ShardHint,
    /// Shard the relation was already scoped to by an enclosing scope. Local
    /// ids are read relative to it, and it leads the shard order.
    pub within: Option<ShardId>,
}

impl RoutingRequest {
    pub fn new() -> Self {
        Self::for_category(PRIMARY_CATEGORY)
    }

    pub fn for_category(category: &str) -> Self {
        Self {
            category: category.to_string(),
            predicates: Vec::new(),
            hint: ShardHint::Current,
            within: None,
        }
    }

    pub fn predicate(mut self, predicate: QueryPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn hint(mut self, hint: ShardHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn within(mut self, shard: ShardId) -> Self {
        self.within = Some(shard);
        self
    }
}

impl Default for RoutingRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// The predicates to run on one target shard.
#[derive(Debug, Clone)]
pub struct RoutedShard {
    pub shard: Arc<Shard>,
    pub predicates: Vec<BoundPredicate>,
}

impl RoutedShard {
    /// `AND`-joined conditions, or `None` when nothing filters the query.
    pub fn where_clause(&self, binds: &mut Vec<Value>) -> Option<String> {
        if self.predicates.is_empty() {
            return None;
        }
        let parts: Vec<String> = self.predicates.iter().map(|p| p.to_sql(binds)).collect();
        Some(parts.join(" AND "))
    }
}

#[derive(Debug, Clone)]
pub struct RoutingPlan {
    shards: ShardSet,
    targets: Vec<RoutedShard>,
}

impl RoutingPlan {
    pub fn shard_set(&self) -> &ShardSet {
        &self.shards
    }

    /// Per-shard rewrites, in shard-set order.
    pub fn targets(&self) -> &[RoutedShard] {
        &self.targets
    }

    pub fn for_shard(&self, id: ShardId) -> Option<&RoutedShard> {
        self.targets.iter().find(|t| t.shard.id() == id)
    }
}

/// A predicate whose values have been classified and tied to the shard they
/// were read relative to.
struct ClassifiedPredicate<'a> {
    predicate: &'a QueryPredicate,
    source: Option<ShardId>,
    values: Vec<IdentifierValue>,
}

/// Decides which shards a query runs on and rewrites key values for each.
pub struct ShardRouter {
    registry: RegistryHandle,
    codec: GlobalIdCodec,
}

impl ShardRouter {
    pub fn new(registry: RegistryHandle, codec: GlobalIdCodec) -> Self {
        Self { registry, codec }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn codec(&self) -> &GlobalIdCodec {
        &self.codec
    }

    pub fn infer(&self, request: &RoutingRequest) -> Result<RoutingPlan> {
        let explicit = self.explicit_set(request)?;
        let origin = self.origin(request, explicit.as_ref())?;

        let classified = request
            .predicates
            .iter()
            .map(|predicate| self.classify(predicate, request, origin, explicit.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let shards = match explicit {
            Some(set) => set,
            None => self.inferred_set(request, &classified, origin)?,
        };
        debug!(
            "routed {} query to shards {:?} ({:?})",
            request.category,
            shards.ids(),
            shards.source()
        );

        let targets = shards
            .iter()
            .map(|shard| RoutedShard {
                shard: Arc::clone(shard),
                predicates: classified.iter().map(|c| self.rewrite(c, shard.id())).collect(),
            })
            .collect();

        Ok(RoutingPlan { shards, targets })
    }

    fn explicit_set(&self, request: &RoutingRequest) -> Result<Option<ShardSet>> {
        let shards = match &request.hint {
            ShardHint::Current => return Ok(None),
            ShardHint::Shards(ids) => ids
                .iter()
                .map(|id| self.registry.lookup(*id))
                .collect::<Result<Vec<_>>>()?,
            ShardHint::Records(ids) => {
                let mut shards = Vec::with_capacity(ids.len());
                for id in ids {
                    let owner = match self.codec.decode(id.get()) {
                        DecodedId::Global { shard, .. } => shard,
                        DecodedId::Local(_) => self.relative_to(request)?,
                    };
                    shards.push(self.registry.lookup(owner)?);
                }
                shards
            }
            ShardHint::All => {
                let mut set = ShardSet::from_shards(self.registry.all()?, ShardSource::Explicit);
                if let Ok(default) = self.registry.default_shard() {
                    set.promote(default.id());
                }
                return Ok(Some(set));
            }
        };
        Ok(Some(ShardSet::from_shards(shards, ShardSource::Explicit)))
    }

    fn relative_to(&self, request: &RoutingRequest) -> Result<ShardId> {
        match request.within {
            Some(id) => Ok(id),
            None => Ok(self.registry.current(&request.category)?.id()),
        }
    }

    /// The shard local ids in the query are read relative to: the prior
    /// scope shard, else the first shard the caller named, else the current one.
    /// `All` names no shard in particular and keeps the current one.
    fn origin(&self, request: &RoutingRequest, explicit: Option<&ShardSet>) -> Result<ShardId> {
        if request.within.is_none() && matches!(request.hint, ShardHint::Shards(_) | ShardHint::Records(_)) {
            if let Some(first) = explicit.and_then(ShardSet::first) {
                return Ok(first.id());
            }
        }
        match self.relative_to(request) {
            Ok(id) => Ok(id),
            Err(err) => explicit
                .and_then(ShardSet::first)
                .map(|shard| shard.id())
                .ok_or(err),
        }
    }

    fn classify<'a>(
        &self,
        predicate: &'a QueryPredicate,
        request: &RoutingRequest,
        origin: ShardId,
        explicit: Option<&ShardSet>,
    ) -> Result<ClassifiedPredicate<'a>> {
        let source = match &predicate.column.kind {
            KeyKind::Plain => None,
            KeyKind::Primary => Some(origin),
            KeyKind::Foreign { category } if *category == request.category => Some(origin),
            KeyKind::Foreign { category } => match self.registry.current(category) {
                Ok(shard) => Some(shard.id()),
                Err(DbError::AmbiguousShardForCategory(_)) if explicit.is_some() => {
                    explicit.and_then(ShardSet::first).map(|shard| shard.id())
                }
                Err(err) => return Err(err),
            },
        };

        let integral = source.is_some() && predicate.column.integral;
        let values = predicate
            .values
            .iter()
            .map(|value| match self.codec.classify(value, integral) {
                // A global id of a shard we do not know cannot be translated.
                IdentifierValue::Global(global) if !self.owner_is_registered(global.get()) => {
                    IdentifierValue::Opaque(value.clone())
                }
                other => other,
            })
            .collect();

        Ok(ClassifiedPredicate {
            predicate,
            source,
            values,
        })
    }

    fn owner_is_registered(&self, id: i64) -> bool {
        match self.codec.decode(id) {
            DecodedId::Global { shard, .. } => self.registry.contains(shard),
            DecodedId::Local(_) => true,
        }
    }

    fn owner(&self, value: &IdentifierValue, source: ShardId) -> Option<ShardId> {
        match value {
            IdentifierValue::Local(_) => Some(source),
            IdentifierValue::Global(global) => match self.codec.decode(global.get()) {
                DecodedId::Global { shard, .. } => Some(shard),
                DecodedId::Local(_) => Some(source),
            },
            IdentifierValue::Opaque(Value::Integer(_)) => Some(source),
            IdentifierValue::Opaque(_) | IdentifierValue::Malformed(_) => None,
        }
    }

    fn inferred_set(
        &self,
        request: &RoutingRequest,
        classified: &[ClassifiedPredicate<'_>],
        origin: ShardId,
    ) -> Result<ShardSet> {
        let has_primary = classified
            .iter()
            .any(|c| c.predicate.is_shard_determining() && c.predicate.column.kind == KeyKind::Primary);
        let determining: Vec<&ClassifiedPredicate<'_>> = classified
            .iter()
            .filter(|c| c.predicate.is_shard_determining())
            .filter(|c| match &c.predicate.column.kind {
                KeyKind::Primary => true,
                KeyKind::Foreign { category } => !has_primary && *category == request.category,
                KeyKind::Plain => false,
            })
            .collect();

        let origin_shard = self.registry.lookup(origin)?;
        if determining.is_empty() {
            return Ok(ShardSet::from_shards([origin_shard], ShardSource::Implicit));
        }
        if determining.iter().any(|c| c.predicate.is_empty_inclusion()) {
            return Ok(ShardSet::from_shards([origin_shard], ShardSource::Inferred));
        }

        let mut set = ShardSet::new(ShardSource::Inferred);
        for candidate in &determining {
            let Some(source) = candidate.source else { continue };
            for value in &candidate.values {
                if let Some(owner) = self.owner(value, source) {
                    if !set.contains(owner) {
                        set.push(self.registry.lookup(owner)?);
                    }
                }
            }
        }
        if set.is_empty() {
            set.push(origin_shard);
        } else {
            set.promote(origin);
        }
        Ok(set)
    }

    fn rewrite(&self, classified: &ClassifiedPredicate<'_>, target: ShardId) -> BoundPredicate {
        let values = match classified.source {
            Some(source) => classified
                .values
                .iter()
                .map(|value| self.codec.relative(value, source, target))
                .collect(),
            None => classified.values.clone(),
        };
        BoundPredicate {
            column: classified.predicate.column.name.clone(),
            operator: classified.predicate.operator,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GlobalId;
    use crate::routing::predicate::KeyColumn;
    use crate::shard::{ShardLocator, ShardRegistry};

    fn router() -> ShardRouter {
        let registry = ShardRegistry::new();
        for id in 1..=3 {
            let mut shard = Shard::new(id, ShardLocator::new("localhost", &format!("db{}", id)));
            if id == 1 {
                shard = shard.as_default();
            }
            registry.register(shard).unwrap();
        }
        ShardRouter::new(registry.into_handle(), GlobalIdCodec::default())
    }

    fn global(router: &ShardRouter, shard: i64, local: i64) -> i64 {
        router.codec().encode(ShardId(shard), local).unwrap().get()
    }

    #[test]
    fn test_no_predicates_is_implicit_current() {
        let router = router();
        let plan = router.infer(&RoutingRequest::new()).unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(1)]);
        assert_eq!(plan.shard_set().source(), ShardSource::Implicit);
    }

    #[test]
    fn test_local_ids_stay_on_current_shard() {
        let router = router();
        let request = RoutingRequest::new().predicate(QueryPredicate::eq(KeyColumn::primary("id"), 5));
        let plan = router.infer(&request).unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(1)]);
        assert_eq!(plan.targets()[0].predicates[0].values, vec![IdentifierValue::Local(5)]);
    }

    #[test]
    fn test_global_id_routes_to_owner_as_local() {
        let router = router();
        let id = global(&router, 2, 9);
        let request = RoutingRequest::new().predicate(QueryPredicate::eq(KeyColumn::primary("id"), id));
        let plan = router.infer(&request).unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(2)]);
        assert_eq!(plan.shard_set().source(), ShardSource::Inferred);
        assert_eq!(plan.targets()[0].predicates[0].values, vec![IdentifierValue::Local(9)]);
    }

    #[test]
    fn test_prior_shard_leads_the_order() {
        let router = router();
        let (b, a) = (global(&router, 3, 1), global(&router, 2, 1));
        let request = RoutingRequest::new()
            .within(ShardId(2))
            .predicate(QueryPredicate::in_list(KeyColumn::primary("id"), [b, a]));
        let plan = router.infer(&request).unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(2), ShardId(3)]);

        // On shard 2 its own id is local and shard 3's stays global.
        let on_two = plan.for_shard(ShardId(2)).unwrap();
        assert_eq!(
            on_two.predicates[0].values,
            vec![IdentifierValue::Global(GlobalId(b)), IdentifierValue::Local(1)]
        );
    }

    #[test]
    fn test_encounter_order_without_prior_shard() {
        let router = router();
        let (b, a) = (global(&router, 3, 1), global(&router, 2, 1));
        let request = RoutingRequest::new().predicate(QueryPredicate::in_list(KeyColumn::primary("id"), [b, a]));
        let plan = router.infer(&request).unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(3), ShardId(2)]);
    }

    #[test]
    fn test_empty_inclusion_targets_current_and_matches_nothing() {
        let router = router();
        let request = RoutingRequest::new()
            .predicate(QueryPredicate::in_list(KeyColumn::primary("id"), Vec::<i64>::new()));
        let plan = router.infer(&request).unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(1)]);

        let mut binds = Vec::new();
        assert_eq!(plan.targets()[0].where_clause(&mut binds).unwrap(), "1 = 0");
    }

    #[test]
    fn test_explicit_hints() {
        let router = router();
        let plan = router
            .infer(&RoutingRequest::new().hint(ShardHint::Shards(vec![ShardId(3), ShardId(2), ShardId(3)])))
            .unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(3), ShardId(2)]);
        assert!(plan.shard_set().is_explicit());

        let plan = router.infer(&RoutingRequest::new().hint(ShardHint::All)).unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(1), ShardId(2), ShardId(3)]);

        let record = GlobalId(global(&router, 3, 8));
        let plan = router.infer(&RoutingRequest::new().hint(ShardHint::Records(vec![record]))).unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(3)]);

        let unknown = RoutingRequest::new().hint(ShardHint::Shards(vec![ShardId(7)]));
        assert!(matches!(router.infer(&unknown), Err(DbError::UnknownShard(ShardId(7)))));
    }

    #[test]
    fn test_local_ids_follow_the_named_shard() {
        let router = router();
        let request = RoutingRequest::new()
            .hint(ShardHint::Shards(vec![ShardId(2), ShardId(3)]))
            .predicate(QueryPredicate::eq(KeyColumn::primary("id"), 5));
        let plan = router.infer(&request).unwrap();

        assert_eq!(plan.for_shard(ShardId(2)).unwrap().predicates[0].values, vec![IdentifierValue::Local(5)]);
        assert_eq!(
            plan.for_shard(ShardId(3)).unwrap().predicates[0].values,
            vec![IdentifierValue::Global(GlobalId(global(&router, 2, 5)))]
        );

        // A prior scope shard still wins, and `All` keeps the current shard.
        let plan = router.infer(&request.clone().within(ShardId(3))).unwrap();
        assert_eq!(plan.for_shard(ShardId(3)).unwrap().predicates[0].values, vec![IdentifierValue::Local(5)]);
        let all = RoutingRequest::new()
            .hint(ShardHint::All)
            .predicate(QueryPredicate::eq(KeyColumn::primary("id"), 5));
        let plan = router.infer(&all).unwrap();
        assert_eq!(plan.for_shard(ShardId(1)).unwrap().predicates[0].values, vec![IdentifierValue::Local(5)]);
    }

    #[test]
    fn test_foreign_key_of_unresolvable_category() {
        let router = router();
        let request = RoutingRequest::new()
            .predicate(QueryPredicate::eq(KeyColumn::foreign("account_id", "billing"), 4));
        assert!(matches!(
            router.infer(&request),
            Err(DbError::AmbiguousShardForCategory(c)) if c == "billing"
        ));

        // With explicit shards the values are read relative to the first one.
        let request = request.hint(ShardHint::Shards(vec![ShardId(2)]));
        let plan = router.infer(&request).unwrap();
        assert_eq!(plan.targets()[0].predicates[0].values, vec![IdentifierValue::Local(4)]);
    }

    #[test]
    fn test_foreign_key_routes_when_no_primary_key() {
        let router = router();
        let owner = global(&router, 3, 2);
        let request = RoutingRequest::new()
            .predicate(QueryPredicate::eq(KeyColumn::references("user_id"), owner))
            .predicate(QueryPredicate::eq(KeyColumn::plain("state"), "active"));
        let plan = router.infer(&request).unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(3)]);
        let predicates = &plan.targets()[0].predicates;
        assert_eq!(predicates[0].values, vec![IdentifierValue::Local(2)]);
        assert_eq!(predicates[1].values, vec![IdentifierValue::Opaque(Value::Text("active".into()))]);
    }

    #[test]
    fn test_malformed_and_unknown_owner_values() {
        let router = router();
        let request = RoutingRequest::new().predicate(QueryPredicate::eq(KeyColumn::primary("id"), "garbage"));
        let plan = router.infer(&request).unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(1)]);
        assert_eq!(plan.shard_set().source(), ShardSource::Inferred);

        let foreign = global(&router, 42, 1);
        let request = RoutingRequest::new().predicate(QueryPredicate::eq(KeyColumn::primary("id"), foreign));
        let plan = router.infer(&request).unwrap();
        assert_eq!(plan.shard_set().ids(), vec![ShardId(1)]);
        assert_eq!(
            plan.targets()[0].predicates[0].values,
            vec![IdentifierValue::Opaque(Value::Integer(foreign))]
        );
    }
}
