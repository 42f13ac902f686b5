//! Relationship filters.
//!
//! `has(relation, op, n)` keeps parent rows with `op n` related rows. The
//! plain existence cases (`>= 1` and `< 1`) compile to `[not] exists (...)`;
//! every other comparison compiles to `(select count(*) ...) op ?`.

use std::sync::Arc;

use relq_core::{Boolean, Executor, QueryBuilder, RelqError, Result, SQL, Selection, Value, Where};

use super::{ModelQuery, MorphConstraint};
use crate::relation::{ExistenceQuery, MorphTo, Relation, morph_to_existence};

/// One-shot constraint on a relation sub-query.
pub(crate) type Callback<'a> = Box<dyn FnOnce(ModelQuery) -> ModelQuery + 'a>;

/// A wildcard morph filter waiting for the distinct discriminator values.
#[derive(Clone)]
pub(crate) struct PendingMorph {
    /// Position of the placeholder predicate in the parent's where list.
    index: usize,
    relation: String,
    operator: String,
    count: i64,
    boolean: Boolean,
    callback: Option<MorphConstraint>,
}

pub(crate) fn unresolved_wildcard() -> RelqError {
    RelqError::Query(
        "wildcard morph types are resolved against a connection; run the query or call \
         resolve_morph_types first"
            .to_string(),
    )
}

/// Whether `op count` is a plain existence test.
fn uses_exists(operator: &str, count: i64) -> bool {
    (operator == ">=" || operator == "<") && count == 1
}

/// Value of `0 op count`, for filters over an empty set of types.
fn zero_satisfies(operator: &str, count: i64) -> bool {
    match operator {
        "=" => count == 0,
        "!=" | "<>" => count != 0,
        "<" => 0 < count,
        "<=" => 0 <= count,
        ">" => 0 > count,
        ">=" => 0 >= count,
        _ => false,
    }
}

fn constant(truth: bool, boolean: Boolean) -> Where {
    Where::Raw {
        sql: SQL::raw(if truth { "1 = 1" } else { "0 = 1" }),
        boolean,
    }
}

/// Appends the existence or count comparison of `sub` to `query`.
fn push_existence(
    query: &mut QueryBuilder,
    mut sub: QueryBuilder,
    operator: &str,
    count: i64,
    boolean: Boolean,
) {
    sub.orders.clear();
    if uses_exists(operator, count) {
        sub.columns = vec![Selection::Column("*".into())];
        query.add_exists(sub, operator == "<", boolean);
    } else {
        sub.columns.clear();
        let sub = sub.select_raw("count(*)", Vec::new());
        query.add_sub_compare(sub, operator, Value::Integer(count), boolean);
    }
}

impl ModelQuery {
    /// Applies `callback` to an existence query on behalf of `related`,
    /// then qualifies what it added and closes the query.
    pub(crate) fn constrain(
        &self,
        mut existence: ExistenceQuery,
        related: Arc<crate::model::ModelDef>,
        callback: Option<Callback<'_>>,
        needs_related: bool,
    ) -> Result<QueryBuilder> {
        let start = existence.query.wheres.len();
        if let Some(callback) = callback {
            let base = std::mem::replace(&mut existence.query, QueryBuilder::new(self.dialect()));
            let child = callback(ModelQuery::from_parts(
                self.registry.clone(),
                related,
                base,
                self.aliases.clone(),
            ));
            if !child.pending_morphs.is_empty() {
                return Err(unresolved_wildcard());
            }
            existence.query = child.query;
            existence.query.isolate_wheres_from(start);
        }
        Ok(existence.finish(start, needs_related))
    }

    /// Existence sub-query of `relation` against this query, constrained by
    /// `callback`. Also returns the qualifier of the related table.
    pub(crate) fn relation_subquery(
        &mut self,
        relation: &Relation,
        callback: Option<Callback<'_>>,
        needs_related: bool,
    ) -> Result<(QueryBuilder, String)> {
        let existence = relation.existence_query(
            self.dialect(),
            self.model.table_name(),
            &self.qualifier(),
            &self.aliases,
        )?;
        let related = relation
            .related()
            .cloned()
            .ok_or_else(|| RelqError::RelationMisuse {
                relation: relation.name().to_string(),
                operation: "plain relationship filters; use the morph variants",
            })?;
        let qualifier = existence.qualifier.clone();
        let query = self.constrain(existence, related, callback, needs_related)?;
        Ok((query, qualifier))
    }

    pub(crate) fn add_has(
        mut self,
        path: &str,
        operator: &str,
        count: i64,
        boolean: Boolean,
        callback: Option<Callback<'_>>,
    ) -> Self {
        if let Some((first, rest)) = path.split_once('.') {
            // Outer segments only test existence; the comparison and the
            // callback apply to the innermost segment.
            let doesnt_have = operator == "<" && count == 1;
            let (inner_operator, inner_count) = if doesnt_have {
                (">=".to_string(), 1)
            } else {
                (operator.to_string(), count)
            };
            let rest = rest.to_string();
            let nested: Callback<'_> = Box::new(move |q: ModelQuery| {
                q.add_has(&rest, &inner_operator, inner_count, Boolean::And, callback)
            });
            let outer = if doesnt_have { "<" } else { ">=" };
            return self.add_has(first, outer, 1, boolean, Some(nested));
        }

        let result = self
            .relation(path)
            .and_then(|relation| self.relation_subquery(&relation, callback, false));
        match result {
            Ok((sub, _)) => push_existence(&mut self.query, sub, operator, count, boolean),
            Err(err) => self.query.fail(err),
        }
        self
    }

    // ==================== has / doesn't have ====================

    /// Parents with `operator count` related rows. `relation` may be a dot
    /// path (`posts.comments`).
    pub fn has(self, relation: &str, operator: &str, count: i64) -> Self {
        self.add_has(relation, operator, count, Boolean::And, None)
    }

    pub fn or_has(self, relation: &str, operator: &str, count: i64) -> Self {
        self.add_has(relation, operator, count, Boolean::Or, None)
    }

    pub fn doesnt_have(self, relation: &str) -> Self {
        self.add_has(relation, "<", 1, Boolean::And, None)
    }

    pub fn or_doesnt_have(self, relation: &str) -> Self {
        self.add_has(relation, "<", 1, Boolean::Or, None)
    }

    /// Parents with at least one related row matching `callback`.
    pub fn where_has(self, relation: &str, callback: impl FnOnce(ModelQuery) -> ModelQuery) -> Self {
        self.add_has(relation, ">=", 1, Boolean::And, Some(Box::new(callback)))
    }

    pub fn or_where_has(
        self,
        relation: &str,
        callback: impl FnOnce(ModelQuery) -> ModelQuery,
    ) -> Self {
        self.add_has(relation, ">=", 1, Boolean::Or, Some(Box::new(callback)))
    }

    /// Parents with `operator count` related rows matching `callback`.
    pub fn where_has_count(
        self,
        relation: &str,
        callback: impl FnOnce(ModelQuery) -> ModelQuery,
        operator: &str,
        count: i64,
    ) -> Self {
        self.add_has(relation, operator, count, Boolean::And, Some(Box::new(callback)))
    }

    pub fn where_doesnt_have(
        self,
        relation: &str,
        callback: impl FnOnce(ModelQuery) -> ModelQuery,
    ) -> Self {
        self.add_has(relation, "<", 1, Boolean::And, Some(Box::new(callback)))
    }

    pub fn or_where_doesnt_have(
        self,
        relation: &str,
        callback: impl FnOnce(ModelQuery) -> ModelQuery,
    ) -> Self {
        self.add_has(relation, "<", 1, Boolean::Or, Some(Box::new(callback)))
    }

    /// Parents with a related row where `column operator value`.
    pub fn where_relation(
        self,
        relation: &str,
        column: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Self {
        let value = value.into();
        self.where_has(relation, |q| q.r#where(column, operator, value))
    }

    pub fn or_where_relation(
        self,
        relation: &str,
        column: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Self {
        let value = value.into();
        self.or_where_has(relation, |q| q.r#where(column, operator, value))
    }

    // ==================== polymorphic ====================

    /// Parents whose morph-to `relation` points at one of `types` with
    /// `operator count` matching rows.
    ///
    /// `types` are model names or morph aliases; `["*"]` means every type
    /// present in the table, looked up when the query runs.
    pub fn has_morph(self, relation: &str, types: &[&str], operator: &str, count: i64) -> Self {
        self.add_has_morph(relation, types, operator, count, Boolean::And, None)
    }

    pub fn where_has_morph(
        self,
        relation: &str,
        types: &[&str],
        callback: impl Fn(ModelQuery, &str) -> ModelQuery + 'static,
    ) -> Self {
        self.add_has_morph(relation, types, ">=", 1, Boolean::And, Some(Arc::new(callback)))
    }

    pub fn doesnt_have_morph(self, relation: &str, types: &[&str]) -> Self {
        self.add_has_morph(relation, types, "<", 1, Boolean::And, None)
    }

    pub fn where_doesnt_have_morph(
        self,
        relation: &str,
        types: &[&str],
        callback: impl Fn(ModelQuery, &str) -> ModelQuery + 'static,
    ) -> Self {
        self.add_has_morph(relation, types, "<", 1, Boolean::And, Some(Arc::new(callback)))
    }

    fn add_has_morph(
        mut self,
        relation: &str,
        types: &[&str],
        operator: &str,
        count: i64,
        boolean: Boolean,
        callback: Option<MorphConstraint>,
    ) -> Self {
        let morph = match self.morph_relation(relation) {
            Ok(morph) => morph,
            Err(err) => {
                self.query.fail(err);
                return self;
            }
        };

        if types == ["*"] {
            self.pending_morphs.push(PendingMorph {
                index: self.query.wheres.len(),
                relation: relation.to_string(),
                operator: operator.to_string(),
                count,
                boolean,
                callback,
            });
            self.query.add_where(constant(true, boolean));
            return self;
        }

        let types: Vec<String> = types.iter().map(|t| (*t).to_string()).collect();
        match self.morph_filter(&morph, &types, operator, count, boolean, callback.as_ref()) {
            Ok(predicate) => self.query.add_where(predicate),
            Err(err) => self.query.fail(err),
        }
        self
    }

    fn morph_relation(&mut self, name: &str) -> Result<MorphTo> {
        let relation = self.relation(name)?;
        relation
            .as_morph_to()
            .cloned()
            .ok_or_else(|| RelqError::RelationMisuse {
                relation: name.to_string(),
                operation: "polymorphic filters",
            })
    }

    /// `(type = a and exists (...)) or (type = b and exists (...))`.
    fn morph_filter(
        &mut self,
        morph: &MorphTo,
        types: &[String],
        operator: &str,
        count: i64,
        boolean: Boolean,
        callback: Option<&MorphConstraint>,
    ) -> Result<Where> {
        if types.is_empty() {
            return Ok(constant(zero_satisfies(operator, count), boolean));
        }
        let qualifier = self.qualifier();
        let mut group = self.query.new_query();
        for ty in types {
            let target = self.registry.morph_model(ty)?;
            let class = self.registry.morph_class(&target);
            let existence = morph_to_existence(
                morph,
                &target,
                self.dialect(),
                self.model.table_name(),
                &qualifier,
                &self.aliases,
            );
            let name = target.name().to_string();
            let constraint: Option<Callback<'_>> = callback.map(|callback| {
                let callback = callback.clone();
                Box::new(move |q: ModelQuery| callback(q, &name)) as Callback<'_>
            });
            let sub = self.constrain(existence, target, constraint, false)?;

            let mut branch = self
                .query
                .new_query()
                .r#where(&format!("{qualifier}.{}", morph.morph_type), "=", class);
            push_existence(&mut branch, sub, operator, count, Boolean::And);
            group.add_nested_where(branch, Boolean::Or);
        }
        if let Some(err) = group.error() {
            return Err(err.clone());
        }
        Ok(Where::Nested {
            query: Box::new(group),
            boolean,
        })
    }

    /// Replaces every wildcard morph filter with one over the discriminator
    /// values currently stored in the parent table.
    pub fn resolve_morph_types<E: Executor + ?Sized>(mut self, executor: &mut E) -> Result<Self> {
        for pending in std::mem::take(&mut self.pending_morphs) {
            let morph = self.morph_relation(&pending.relation)?;
            let table = self.model.table_name().to_string();
            let stored = QueryBuilder::table(self.dialect(), &table)
                .distinct()
                .where_not_null(&morph.morph_type)
                .pluck(executor, &morph.morph_type)?;
            let types: Vec<String> = stored
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            let predicate = self.morph_filter(
                &morph,
                &types,
                &pending.operator,
                pending.count,
                pending.boolean,
                pending.callback.as_ref(),
            )?;
            if let Some(slot) = self.query.wheres.get_mut(pending.index) {
                *slot = predicate;
            }
        }
        Ok(self)
    }
}
