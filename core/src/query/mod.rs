//! Fluent query builder.
//!
//! [`QueryBuilder`] accumulates a structured request (selection, predicate tree,
//! joins, grouping, ordering, limit/offset) and compiles it through
//! [`Grammar`] into a single [`SQL`] fragment. Every binding lives next to its
//! placeholder inside that fragment, so the bindings returned by
//! [`QueryBuilder::bindings`] always line up with the placeholders in
//! [`QueryBuilder::to_sql`].

mod grammar;
mod join;
mod predicate;

pub use grammar::Grammar;
pub use join::{JoinClause, JoinKind};
pub use predicate::{Boolean, Where, normalize_operator};

use compact_str::CompactString;

use crate::dialect::Dialect;
use crate::error::{RelqError, Result};
use crate::executor::Executor;
use crate::row::Row;
use crate::sql::SQL;
use crate::value::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(direction: &str) -> Result<Self> {
        if direction.eq_ignore_ascii_case("asc") {
            Ok(Direction::Asc)
        } else if direction.eq_ignore_ascii_case("desc") {
            Ok(Direction::Desc)
        } else {
            Err(RelqError::Query(format!(
                "Order direction must be \"asc\" or \"desc\", got \"{direction}\""
            )))
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// One entry of the select list.
#[derive(Debug, Clone)]
pub enum Selection {
    Column(CompactString),
    Raw(SQL),
    Sub {
        query: Box<QueryBuilder>,
        alias: CompactString,
    },
}

/// One entry of the ORDER BY list.
#[derive(Debug, Clone)]
pub enum Order {
    Column {
        column: CompactString,
        direction: Direction,
    },
    Raw(SQL),
}

/// Structured SELECT request.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    pub dialect: Dialect,
    pub distinct: bool,
    pub columns: Vec<Selection>,
    pub from: Option<CompactString>,
    pub joins: Vec<JoinClause>,
    pub wheres: Vec<Where>,
    pub groups: Vec<CompactString>,
    pub havings: Vec<Where>,
    pub orders: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    error: Option<RelqError>,
}

impl QueryBuilder {
    /// Creates a new empty builder for `dialect`.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            distinct: false,
            columns: Vec::new(),
            from: None,
            joins: Vec::new(),
            wheres: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            error: None,
        }
    }

    /// Creates a builder selecting from `table`.
    pub fn table(dialect: Dialect, table: &str) -> Self {
        Self::new(dialect).from(table)
    }

    /// A fresh builder for the same dialect, used for sub-queries.
    pub fn new_query(&self) -> Self {
        Self::new(self.dialect)
    }

    /// Records a builder misuse; only the first one is kept.
    pub fn fail(&mut self, err: RelqError) {
        self.error.get_or_insert(err);
    }

    /// The first recorded builder misuse, if any.
    pub fn error(&self) -> Option<&RelqError> {
        self.error.as_ref()
    }

    fn absorb(&mut self, other: &QueryBuilder) {
        if let Some(err) = &other.error {
            self.fail(err.clone());
        }
    }

    // ==================== selection ====================

    /// Replaces the select list.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = columns
            .iter()
            .map(|c| Selection::Column((*c).into()))
            .collect();
        self
    }

    pub fn add_select(mut self, columns: &[&str]) -> Self {
        self.columns
            .extend(columns.iter().map(|c| Selection::Column((*c).into())));
        self
    }

    /// Adds a raw select expression with its own bindings.
    pub fn select_raw(mut self, expression: &str, bindings: Vec<Value>) -> Self {
        match SQL::raw_with_bindings(expression, bindings) {
            Ok(sql) => self.columns.push(Selection::Raw(sql)),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Adds `(sub-query) as alias` to the select list.
    pub fn select_sub(mut self, query: QueryBuilder, alias: &str) -> Self {
        self.absorb(&query);
        self.columns.push(Selection::Sub {
            query: Box::new(query),
            alias: alias.into(),
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn from(mut self, table: &str) -> Self {
        self.from = Some(table.into());
        self
    }

    pub fn from_as(self, table: &str, alias: &str) -> Self {
        self.from(&format!("{table} as {alias}"))
    }

    /// The table name without any alias.
    pub fn from_table(&self) -> Option<&str> {
        let from = self.from.as_deref()?;
        Some(crate::sql::split_alias(from).map_or(from, |(table, _)| table))
    }

    /// The name columns of the FROM table are qualified with (its alias when set).
    pub fn from_qualifier(&self) -> Option<&str> {
        let from = self.from.as_deref()?;
        Some(crate::sql::split_alias(from).map_or(from, |(_, alias)| alias))
    }

    // ==================== joins ====================

    pub fn join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.join_with(JoinKind::Inner, table, |j| j.on(first, operator, second))
    }

    pub fn left_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.join_with(JoinKind::Left, table, |j| j.on(first, operator, second))
    }

    pub fn right_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.join_with(JoinKind::Right, table, |j| j.on(first, operator, second))
    }

    pub fn cross_join(mut self, table: &str) -> Self {
        self.joins.push(JoinClause::new(JoinKind::Cross, table));
        self
    }

    /// Inner join whose single condition binds a value: `first <op> ?`.
    pub fn join_where(
        self,
        table: &str,
        first: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Self {
        let value = value.into();
        self.join_with(JoinKind::Inner, table, |j| j.r#where(first, operator, value))
    }

    /// Adds a join whose conditions are built by `build`.
    pub fn join_with(
        mut self,
        kind: JoinKind,
        table: &str,
        build: impl FnOnce(JoinClause) -> JoinClause,
    ) -> Self {
        let mut clause = build(JoinClause::new(kind, table));
        if let Some(err) = clause.error.take() {
            self.fail(err);
        }
        self.joins.push(clause);
        self
    }

    /// Whether a join against `table` is already present.
    pub fn has_join(&self, table: &str) -> bool {
        self.joins.iter().any(|j| j.table == table)
    }

    // ==================== where ====================

    /// Adds a basic `column <op> ?` predicate joined with AND.
    ///
    /// A NULL value with `=` or `!=`/`<>` compiles to `is null` / `is not null`.
    pub fn r#where(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.push_basic(column, operator, value.into(), Boolean::And)
    }

    pub fn or_where(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.push_basic(column, operator, value.into(), Boolean::Or)
    }

    /// Shorthand for `r#where(column, "=", value)`.
    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.r#where(column, "=", value)
    }

    fn push_basic(mut self, column: &str, operator: &str, value: Value, boolean: Boolean) -> Self {
        let operator = match normalize_operator(operator) {
            Ok(op) => op,
            Err(err) => {
                self.fail(err);
                return self;
            }
        };
        if value.is_null() && matches!(operator.as_str(), "=" | "!=" | "<>") {
            self.wheres.push(Where::Null {
                column: column.into(),
                not: operator != "=",
                boolean,
            });
            return self;
        }
        self.wheres.push(Where::Basic {
            column: column.into(),
            operator,
            value,
            boolean,
        });
        self
    }

    /// Compares two columns: `first <op> second`.
    pub fn where_column(self, first: &str, operator: &str, second: &str) -> Self {
        self.push_column(first, operator, second, Boolean::And)
    }

    pub fn or_where_column(self, first: &str, operator: &str, second: &str) -> Self {
        self.push_column(first, operator, second, Boolean::Or)
    }

    fn push_column(mut self, first: &str, operator: &str, second: &str, boolean: Boolean) -> Self {
        match normalize_operator(operator) {
            Ok(operator) => self.wheres.push(Where::Column {
                first: first.into(),
                operator,
                second: second.into(),
                boolean,
            }),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Adds a raw predicate. `?` placeholders in `sql` are bound to `bindings`
    /// in order; a count mismatch is recorded as an error.
    pub fn where_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push_raw(sql, bindings, Boolean::And)
    }

    pub fn or_where_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push_raw(sql, bindings, Boolean::Or)
    }

    fn push_raw(mut self, sql: &str, bindings: Vec<Value>, boolean: Boolean) -> Self {
        match SQL::raw_with_bindings(sql, bindings) {
            Ok(sql) => self.wheres.push(Where::Raw { sql, boolean }),
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_in(column, values, false, Boolean::And)
    }

    pub fn or_where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_in(column, values, false, Boolean::Or)
    }

    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_in(column, values, true, Boolean::And)
    }

    fn push_in<I, V>(mut self, column: &str, values: I, not: bool, boolean: Boolean) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.wheres.push(Where::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            not,
            boolean,
        });
        self
    }

    /// `column in (select ...)`.
    pub fn where_in_sub(mut self, column: &str, query: QueryBuilder) -> Self {
        self.absorb(&query);
        self.wheres.push(Where::InSub {
            column: column.into(),
            query: Box::new(query),
            not: false,
            boolean: Boolean::And,
        });
        self
    }

    pub fn where_null(self, column: &str) -> Self {
        self.push_null(column, false, Boolean::And)
    }

    pub fn or_where_null(self, column: &str) -> Self {
        self.push_null(column, false, Boolean::Or)
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.push_null(column, true, Boolean::And)
    }

    fn push_null(mut self, column: &str, not: bool, boolean: Boolean) -> Self {
        self.wheres.push(Where::Null {
            column: column.into(),
            not,
            boolean,
        });
        self
    }

    pub fn where_between(
        mut self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.wheres.push(Where::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
            not: false,
            boolean: Boolean::And,
        });
        self
    }

    /// Adds a parenthesized group built by `build` on a fresh sub-builder.
    ///
    /// An empty group is dropped.
    pub fn where_nested(self, build: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.push_nested(build, Boolean::And)
    }

    pub fn or_where_nested(self, build: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.push_nested(build, Boolean::Or)
    }

    fn push_nested(
        mut self,
        build: impl FnOnce(QueryBuilder) -> QueryBuilder,
        boolean: Boolean,
    ) -> Self {
        let mut seed = self.new_query();
        seed.from = self.from.clone();
        let nested = build(seed);
        self.add_nested_where(nested, boolean);
        self
    }

    /// Appends `query`'s predicates as a parenthesized group.
    pub fn add_nested_where(&mut self, query: QueryBuilder, boolean: Boolean) {
        self.absorb(&query);
        if query.wheres.is_empty() {
            return;
        }
        self.wheres.push(Where::Nested {
            query: Box::new(query),
            boolean,
        });
    }

    pub fn where_exists(mut self, query: QueryBuilder) -> Self {
        self.add_exists(query, false, Boolean::And);
        self
    }

    pub fn or_where_exists(mut self, query: QueryBuilder) -> Self {
        self.add_exists(query, false, Boolean::Or);
        self
    }

    pub fn where_not_exists(mut self, query: QueryBuilder) -> Self {
        self.add_exists(query, true, Boolean::And);
        self
    }

    /// Appends `[not] exists (query)`.
    pub fn add_exists(&mut self, query: QueryBuilder, not: bool, boolean: Boolean) {
        self.absorb(&query);
        self.wheres.push(Where::Exists {
            query: Box::new(query),
            not,
            boolean,
        });
    }

    /// Appends `(query) <op> ?`.
    pub fn add_sub_compare(
        &mut self,
        query: QueryBuilder,
        operator: &str,
        value: Value,
        boolean: Boolean,
    ) {
        self.absorb(&query);
        match normalize_operator(operator) {
            Ok(operator) => self.wheres.push(Where::SubCompare {
                query: Box::new(query),
                operator,
                value,
                boolean,
            }),
            Err(err) => self.fail(err),
        }
    }

    /// Appends a predicate node as-is.
    pub fn add_where(&mut self, predicate: Where) {
        self.wheres.push(predicate);
    }

    /// Appends predicates taken from another builder, keeping their connectors.
    pub fn merge_wheres(&mut self, other: QueryBuilder) {
        self.absorb(&other);
        self.wheres.extend(other.wheres);
    }

    /// Wraps the current predicates in one AND group when any of them is
    /// joined with OR, so predicates added afterwards bind to the whole set.
    pub fn isolate_wheres(&mut self) {
        self.isolate_wheres_from(0);
    }

    /// Like [`isolate_wheres`](Self::isolate_wheres) for the predicates at
    /// `start..`, leaving the ones before them outside the group.
    pub fn isolate_wheres_from(&mut self, start: usize) {
        let connected = start.max(1);
        if start >= self.wheres.len()
            || !self
                .wheres
                .iter()
                .skip(connected)
                .any(|w| w.boolean() == Boolean::Or)
        {
            return;
        }
        let mut group = self.new_query();
        group.from = self.from.clone();
        group.wheres = self.wheres.split_off(start);
        self.wheres.push(Where::Nested {
            query: Box::new(group),
            boolean: Boolean::And,
        });
    }

    /// Qualifies unqualified columns of the predicates at `start..`.
    pub fn qualify_wheres_from(&mut self, start: usize, qualifier: &str) {
        for predicate in self.wheres.iter_mut().skip(start) {
            predicate.qualify(qualifier);
        }
    }

    /// Whether every predicate at `start..` only touches columns of `table`.
    pub fn wheres_confined_to(&self, start: usize, table: &str) -> bool {
        self.wheres
            .iter()
            .skip(start)
            .all(|predicate| predicate.is_confined_to(table))
    }

    // ==================== grouping / ordering ====================

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.groups.extend(columns.iter().map(|c| CompactString::from(*c)));
        self
    }

    pub fn having(mut self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        match normalize_operator(operator) {
            Ok(operator) => self.havings.push(Where::Basic {
                column: column.into(),
                operator,
                value: value.into(),
                boolean: Boolean::And,
            }),
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn having_raw(mut self, sql: &str, bindings: Vec<Value>) -> Self {
        match SQL::raw_with_bindings(sql, bindings) {
            Ok(sql) => self.havings.push(Where::Raw {
                sql,
                boolean: Boolean::And,
            }),
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn order_by(mut self, column: &str, direction: &str) -> Self {
        match Direction::parse(direction) {
            Ok(direction) => self.orders.push(Order::Column {
                column: column.into(),
                direction,
            }),
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column, "desc")
    }

    pub fn order_by_raw(mut self, sql: &str, bindings: Vec<Value>) -> Self {
        match SQL::raw_with_bindings(sql, bindings) {
            Ok(sql) => self.orders.push(Order::Raw(sql)),
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn latest(self, column: &str) -> Self {
        self.order_by(column, "desc")
    }

    pub fn oldest(self, column: &str) -> Self {
        self.order_by(column, "asc")
    }

    /// Drops every existing ORDER BY entry.
    pub fn reorder(mut self) -> Self {
        self.orders.clear();
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Limits the query to the 1-based `page` of `per_page` rows.
    pub fn for_page(self, page: u64, per_page: u64) -> Self {
        self.offset(page.saturating_sub(1).saturating_mul(per_page))
            .limit(per_page)
    }

    // ==================== compilation ====================

    /// Compiles the SELECT into a single fragment.
    pub fn compile(&self) -> Result<SQL> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        Ok(Grammar::new(self.dialect).compile_select(self))
    }

    /// Compiled SQL text and its bindings in placeholder order.
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        Ok(self.compile()?.build(self.dialect))
    }

    pub fn to_sql(&self) -> Result<String> {
        Ok(self.build()?.0)
    }

    pub fn bindings(&self) -> Result<Vec<Value>> {
        Ok(self.build()?.1)
    }

    // ==================== execution ====================

    pub fn get<E: Executor + ?Sized>(&self, executor: &mut E) -> Result<Vec<Row>> {
        let (sql, bindings) = self.build()?;
        executor.select(&sql, &bindings)
    }

    pub fn first<E: Executor + ?Sized>(&self, executor: &mut E) -> Result<Option<Row>> {
        let rows = self.clone().limit(1).get(executor)?;
        Ok(rows.into_iter().next())
    }

    /// Runs `function(column)` over the query, returning the raw aggregate value.
    pub fn aggregate<E: Executor + ?Sized>(
        &self,
        executor: &mut E,
        function: &str,
        column: &str,
    ) -> Result<Value> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let sql = Grammar::new(self.dialect).compile_aggregate(self, function, column);
        let (sql, bindings) = sql.build(self.dialect);
        let rows = executor.select(&sql, &bindings)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("aggregate"))
            .unwrap_or(Value::Null))
    }

    pub fn count<E: Executor + ?Sized>(&self, executor: &mut E) -> Result<i64> {
        let value = self.aggregate(executor, "count", "*")?;
        Ok(value.as_i64().unwrap_or(0))
    }

    pub fn exists<E: Executor + ?Sized>(&self, executor: &mut E) -> Result<bool> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let (sql, bindings) = Grammar::new(self.dialect)
            .compile_exists(self)
            .build(self.dialect);
        let rows = executor.select(&sql, &bindings)?;
        Ok(rows
            .first()
            .and_then(|row| row.get("exists"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Values of a single column across the result set.
    pub fn pluck<E: Executor + ?Sized>(&self, executor: &mut E, column: &str) -> Result<Vec<Value>> {
        let rows = self.clone().select(&[column]).get(executor)?;
        let key = column.rsplit('.').next().unwrap_or(column);
        Ok(rows
            .into_iter()
            .map(|mut row| row.remove(key).unwrap_or(Value::Null))
            .collect())
    }

    pub fn insert<E: Executor + ?Sized>(&self, executor: &mut E, rows: &[Row]) -> Result<u64> {
        let table = self.require_table()?;
        let (sql, bindings) = Grammar::new(self.dialect)
            .compile_insert(table, rows)
            .build(self.dialect);
        executor.affecting_statement(&sql, &bindings)
    }

    /// Inserts one row and returns the generated key.
    pub fn insert_get_id<E: Executor + ?Sized>(
        &self,
        executor: &mut E,
        row: &Row,
        key: &str,
    ) -> Result<Value> {
        let table = self.require_table()?;
        let grammar = Grammar::new(self.dialect);
        if self.dialect == Dialect::PostgreSQL {
            let (sql, bindings) = grammar
                .compile_insert_returning(table, row, key)
                .build(self.dialect);
            let rows = executor.select(&sql, &bindings)?;
            return rows
                .into_iter()
                .next()
                .and_then(|mut row| row.remove(key))
                .ok_or(RelqError::NotFound);
        }
        let (sql, bindings) = grammar
            .compile_insert(table, std::slice::from_ref(row))
            .build(self.dialect);
        executor.affecting_statement(&sql, &bindings)?;
        Ok(executor.last_insert_id()?.map(Value::Integer).unwrap_or(Value::Null))
    }

    /// Inserts rows, updating `update` columns when a row collides on `unique_by`.
    pub fn upsert<E: Executor + ?Sized>(
        &self,
        executor: &mut E,
        rows: &[Row],
        unique_by: &[&str],
        update: &[&str],
    ) -> Result<u64> {
        let table = self.require_table()?;
        let (sql, bindings) = Grammar::new(self.dialect)
            .compile_upsert(table, rows, unique_by, update)
            .build(self.dialect);
        executor.affecting_statement(&sql, &bindings)
    }

    pub fn update<E: Executor + ?Sized>(&self, executor: &mut E, values: &Row) -> Result<u64> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let (sql, bindings) = Grammar::new(self.dialect)
            .compile_update(self, values)?
            .build(self.dialect);
        executor.affecting_statement(&sql, &bindings)
    }

    pub fn delete<E: Executor + ?Sized>(&self, executor: &mut E) -> Result<u64> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let (sql, bindings) = Grammar::new(self.dialect)
            .compile_delete(self)?
            .build(self.dialect);
        executor.affecting_statement(&sql, &bindings)
    }

    fn require_table(&self) -> Result<&str> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        self.from_table()
            .ok_or_else(|| RelqError::Query("no table set on query".to_string()))
    }
}
