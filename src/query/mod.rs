//! Relation-aware queries.
//!
//! [`ModelQuery`] wraps a [`QueryBuilder`] for one model and layers the
//! relationship features on top of it: relationship filters (`has`
//! module), aggregate sub-selects (`aggregate`), eager loading (`eager`) and
//! cursor pagination (`pagination`). Everything else is forwarded to the
//! underlying builder unchanged.

mod aggregate;
mod cursor;
mod eager;
mod has;
mod pagination;

pub use cursor::Cursor;
pub use pagination::CursorPage;

use std::sync::Arc;

use hashbrown::HashMap;
use relq_core::{Boolean, Dialect, Executor, QueryBuilder, RelqError, Result, Row, Value};

use crate::model::{ModelDef, Record, Registry};
use crate::relation::{AliasCounter, Relation};

use eager::EagerLoad;
use has::PendingMorph;

/// Constraint applied to the query of an eager-loaded relation.
pub type Constraint = Arc<dyn Fn(ModelQuery) -> ModelQuery>;

/// Constraint of a polymorphic filter; also receives the target model name.
pub type MorphConstraint = Arc<dyn Fn(ModelQuery, &str) -> ModelQuery>;

/// Forwards builder methods that only touch the wrapped [`QueryBuilder`].
macro_rules! forward {
    ($($(#[$meta:meta])* fn $name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            $(#[$meta])*
            pub fn $name(mut self, $($arg: $ty),*) -> Self {
                self.query = self.query.$name($($arg),*);
                self
            }
        )*
    };
}

/// A query against one model's table.
#[derive(Clone)]
pub struct ModelQuery {
    registry: Arc<Registry>,
    model: Arc<ModelDef>,
    query: QueryBuilder,
    eager: Vec<EagerLoad>,
    relations: HashMap<String, Arc<Relation>>,
    aliases: AliasCounter,
    pending_morphs: Vec<PendingMorph>,
}

impl std::fmt::Debug for ModelQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelQuery")
            .field("model", &self.model.name())
            .field("query", &self.query)
            .field(
                "eager",
                &self.eager.iter().map(|e| e.path.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ModelQuery {
    /// Starts a query selecting from `model`'s table.
    pub fn new(registry: Arc<Registry>, model: &str, dialect: Dialect) -> Result<Self> {
        let model = registry.model(model)?;
        let query = QueryBuilder::table(dialect, model.table_name());
        Ok(Self::from_parts(registry, model, query, AliasCounter::default()))
    }

    pub(crate) fn from_parts(
        registry: Arc<Registry>,
        model: Arc<ModelDef>,
        query: QueryBuilder,
        aliases: AliasCounter,
    ) -> Self {
        Self {
            registry,
            model,
            query,
            eager: Vec::new(),
            relations: HashMap::new(),
            aliases,
            pending_morphs: Vec::new(),
        }
    }

    /// A sibling query on the same model sharing the alias counter, used for
    /// nested groups.
    fn fork(&self, query: QueryBuilder) -> Self {
        Self {
            registry: self.registry.clone(),
            model: self.model.clone(),
            query,
            eager: Vec::new(),
            relations: self.relations.clone(),
            aliases: self.aliases.clone(),
            pending_morphs: Vec::new(),
        }
    }

    #[inline]
    pub fn model(&self) -> &ModelDef {
        &self.model
    }

    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[inline]
    pub fn dialect(&self) -> Dialect {
        self.query.dialect
    }

    /// The wrapped builder.
    #[inline]
    pub fn query(&self) -> &QueryBuilder {
        &self.query
    }

    pub fn into_query(self) -> QueryBuilder {
        self.query
    }

    /// Mutates the wrapped builder in place.
    pub fn tap(mut self, f: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.query = f(self.query);
        self
    }

    /// Table the parent columns of relation sub-queries are qualified with.
    fn qualifier(&self) -> String {
        self.query
            .from_qualifier()
            .unwrap_or(self.model.table_name())
            .to_string()
    }

    /// Resolves `name` on this model, once per query.
    fn relation(&mut self, name: &str) -> Result<Arc<Relation>> {
        if let Some(relation) = self.relations.get(name) {
            return Ok(relation.clone());
        }
        let relation = Arc::new(self.model.declared_relation(name)?.resolve(
            name,
            &self.model,
            &self.registry,
        )?);
        self.relations.insert(name.to_string(), relation.clone());
        Ok(relation)
    }

    forward! {
        fn select(columns: &[&str]);
        fn add_select(columns: &[&str]);
        fn select_raw(expression: &str, bindings: Vec<Value>);
        fn select_sub(query: QueryBuilder, alias: &str);
        fn distinct();
        fn join(table: &str, first: &str, operator: &str, second: &str);
        fn left_join(table: &str, first: &str, operator: &str, second: &str);
        fn right_join(table: &str, first: &str, operator: &str, second: &str);
        fn cross_join(table: &str);
        fn join_where(table: &str, first: &str, operator: &str, value: impl Into<Value>);
        fn r#where(column: &str, operator: &str, value: impl Into<Value>);
        fn or_where(column: &str, operator: &str, value: impl Into<Value>);
        fn where_eq(column: &str, value: impl Into<Value>);
        fn where_column(first: &str, operator: &str, second: &str);
        fn or_where_column(first: &str, operator: &str, second: &str);
        fn where_raw(sql: &str, bindings: Vec<Value>);
        fn or_where_raw(sql: &str, bindings: Vec<Value>);
        fn where_in(column: &str, values: impl IntoIterator<Item = impl Into<Value>>);
        fn or_where_in(column: &str, values: impl IntoIterator<Item = impl Into<Value>>);
        fn where_not_in(column: &str, values: impl IntoIterator<Item = impl Into<Value>>);
        fn where_in_sub(column: &str, query: QueryBuilder);
        fn where_null(column: &str);
        fn or_where_null(column: &str);
        fn where_not_null(column: &str);
        fn where_between(column: &str, low: impl Into<Value>, high: impl Into<Value>);
        fn where_exists(query: QueryBuilder);
        fn where_not_exists(query: QueryBuilder);
        fn group_by(columns: &[&str]);
        fn having(column: &str, operator: &str, value: impl Into<Value>);
        fn having_raw(sql: &str, bindings: Vec<Value>);
        fn order_by(column: &str, direction: &str);
        fn order_by_desc(column: &str);
        fn order_by_raw(sql: &str, bindings: Vec<Value>);
        fn latest(column: &str);
        fn oldest(column: &str);
        fn reorder();
        fn limit(limit: u64);
        fn offset(offset: u64);
        fn for_page(page: u64, per_page: u64);
    }

    /// Parenthesized group whose predicates, relationship filters included,
    /// are built on a sibling query.
    pub fn where_nested(self, build: impl FnOnce(ModelQuery) -> ModelQuery) -> Self {
        self.push_nested(build, Boolean::And)
    }

    pub fn or_where_nested(self, build: impl FnOnce(ModelQuery) -> ModelQuery) -> Self {
        self.push_nested(build, Boolean::Or)
    }

    fn push_nested(mut self, build: impl FnOnce(ModelQuery) -> ModelQuery, boolean: Boolean) -> Self {
        let mut seed = self.query.new_query();
        seed.from = self.query.from.clone();
        let nested = build(self.fork(seed));
        if !nested.pending_morphs.is_empty() {
            self.query.fail(has::unresolved_wildcard());
        }
        self.relations.extend(nested.relations);
        self.query.add_nested_where(nested.query, boolean);
        self
    }

    /// Applies the scope registered as `name` for this model.
    pub fn scope(mut self, name: &str, args: &[Value]) -> Self {
        match self.registry.lookup_scope(self.model.name(), name) {
            Ok(scope) => scope(self, args),
            Err(err) => {
                self.query.fail(err);
                self
            }
        }
    }

    // ==================== compilation ====================

    fn ensure_compilable(&self) -> Result<()> {
        if self.pending_morphs.is_empty() {
            Ok(())
        } else {
            Err(has::unresolved_wildcard())
        }
    }

    /// Compiled SQL text.
    ///
    /// Fails while wildcard morph filters are unresolved; see
    /// [`resolve_morph_types`](Self::resolve_morph_types).
    pub fn to_sql(&self) -> Result<String> {
        self.ensure_compilable()?;
        self.query.to_sql()
    }

    pub fn bindings(&self) -> Result<Vec<Value>> {
        self.ensure_compilable()?;
        self.query.bindings()
    }

    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        self.ensure_compilable()?;
        self.query.build()
    }

    // ==================== execution ====================

    /// Runs the query and eager loads every planned relation.
    pub fn get<E: Executor + ?Sized>(self, executor: &mut E) -> Result<Vec<Record>> {
        let mut this = self.resolve_morph_types(executor)?;
        let rows = this.query.get(executor)?;
        let mut records: Vec<Record> = rows.into_iter().map(Record::new).collect();
        this.eager_load(&mut records, executor)?;
        Ok(records)
    }

    pub fn first<E: Executor + ?Sized>(self, executor: &mut E) -> Result<Option<Record>> {
        Ok(self.limit(1).get(executor)?.into_iter().next())
    }

    /// The record whose key equals `id`.
    pub fn find<E: Executor + ?Sized>(
        self,
        executor: &mut E,
        id: impl Into<Value>,
    ) -> Result<Option<Record>> {
        let key = self.model.qualified_key();
        self.r#where(&key, "=", id).first(executor)
    }

    pub fn find_or_fail<E: Executor + ?Sized>(
        self,
        executor: &mut E,
        id: impl Into<Value>,
    ) -> Result<Record> {
        self.find(executor, id)?.ok_or(RelqError::NotFound)
    }

    pub fn count<E: Executor + ?Sized>(self, executor: &mut E) -> Result<i64> {
        self.resolve_morph_types(executor)?.query.count(executor)
    }

    pub fn exists<E: Executor + ?Sized>(self, executor: &mut E) -> Result<bool> {
        self.resolve_morph_types(executor)?.query.exists(executor)
    }

    pub fn aggregate<E: Executor + ?Sized>(
        self,
        executor: &mut E,
        function: &str,
        column: &str,
    ) -> Result<Value> {
        self.resolve_morph_types(executor)?
            .query
            .aggregate(executor, function, column)
    }

    pub fn pluck<E: Executor + ?Sized>(self, executor: &mut E, column: &str) -> Result<Vec<Value>> {
        self.resolve_morph_types(executor)?
            .query
            .pluck(executor, column)
    }

    /// Streams raw rows through the executor's cursor until `each` returns
    /// `false`. Eager loads are not applied.
    pub fn each_row<E: Executor + ?Sized>(
        self,
        executor: &mut E,
        mut each: impl FnMut(Row) -> bool,
    ) -> Result<()> {
        let this = self.resolve_morph_types(executor)?;
        let (sql, bindings) = this.query.build()?;
        executor.cursor(&sql, &bindings, &mut each)
    }

    /// Walks the result in pages of `count` records ordered by `column`,
    /// keyed on the last value seen instead of an offset.
    ///
    /// `column` defaults to the model's qualified key. Returns `Ok(false)`
    /// when `each` stopped the walk by returning `Ok(false)`.
    pub fn chunk_by_id<E, F>(
        self,
        executor: &mut E,
        count: u64,
        column: Option<&str>,
        mut each: F,
    ) -> Result<bool>
    where
        E: Executor + ?Sized,
        F: FnMut(Vec<Record>) -> Result<bool>,
    {
        if count == 0 {
            return Ok(true);
        }
        let column = column.map_or_else(|| self.model.qualified_key(), str::to_string);
        let key = column.rsplit('.').next().unwrap_or(&column).to_string();
        let mut this = self.resolve_morph_types(executor)?;
        this.query.isolate_wheres();

        let mut last: Option<Value> = None;
        loop {
            let mut page = this.clone();
            page.query
                .orders
                .retain(|order| !pagination::orders_by(order, &column));
            if let Some(last) = &last {
                page = page.r#where(&column, ">", last.clone());
            }
            let records = page.order_by(&column, "asc").limit(count).get(executor)?;
            let fetched = records.len() as u64;
            if fetched == 0 {
                return Ok(true);
            }
            last = records.last().and_then(|r| r.get(&key)).cloned();
            if !each(records)? {
                return Ok(false);
            }
            if fetched < count || last.is_none() {
                return Ok(true);
            }
        }
    }
}
