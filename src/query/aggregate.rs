//! Per-relation aggregate columns (`with_count`, `with_sum`, ...).

use heck::ToSnakeCase;
use relq_core::{RelqError, SQL, Selection, quote_identifier};

use super::ModelQuery;
use super::has::Callback;
use crate::relation::RelationKeys;

const FUNCTIONS: &[&str] = &["count", "exists", "sum", "avg", "min", "max"];

/// Splits `"posts as post_total"` into the relation and an explicit alias.
fn split_alias(expression: &str) -> (&str, Option<&str>) {
    let lower = expression.to_ascii_lowercase();
    match lower.find(" as ") {
        Some(index) => (expression[..index].trim(), Some(expression[index + 4..].trim())),
        None => (expression.trim(), None),
    }
}

/// `posts` + `sum` + `votes` → `posts_sum_votes`; `count(*)` → `posts_count`.
fn default_alias(relation: &str, function: &str, column: &str) -> String {
    let column = if column == "*" { "" } else { column };
    let raw = format!("{relation} {function} {column}");
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();
    cleaned.trim().to_snake_case()
}

impl ModelQuery {
    /// Adds `(select function(column) ...) as alias` for the relation named
    /// in `expression`, which may carry `as alias`.
    fn add_aggregate(
        mut self,
        expression: &str,
        column: &str,
        function: &str,
        callback: Option<Callback<'_>>,
    ) -> Self {
        if !FUNCTIONS.contains(&function) {
            self.query.fail(RelqError::Query(format!(
                "unsupported relation aggregate [{function}]"
            )));
            return self;
        }
        let (name, alias) = split_alias(expression);
        let relation = match self.relation(name) {
            Ok(relation) => relation,
            Err(err) => {
                self.query.fail(err);
                return self;
            }
        };

        if self.query.columns.is_empty() {
            let all = format!("{}.*", self.qualifier());
            self.query = self.query.select(&[all.as_str()]);
        }

        // A many-to-many aggregate over a related column needs the join the
        // bare pivot query leaves out.
        let needs_related = column != "*"
            && relation
                .pivot()
                .is_some_and(|pivot| column.split_once('.').is_none_or(|(t, _)| t != pivot.table));

        let (mut sub, qualifier) = match self.relation_subquery(&relation, callback, needs_related) {
            Ok(parts) => parts,
            Err(err) => {
                self.query.fail(err);
                return self;
            }
        };
        sub.orders.clear();

        let dialect = self.dialect();
        let target = if column == "*" {
            "*".to_string()
        } else if column.contains('.') {
            quote_identifier(dialect, column)
        } else {
            quote_identifier(dialect, &format!("{qualifier}.{column}"))
        };
        let alias = alias
            .map(str::to_string)
            .unwrap_or_else(|| default_alias(name, function, column));

        if function == "exists" {
            sub.columns = vec![Selection::Column("*".into())];
            match sub.compile() {
                Ok(compiled) => {
                    let expression = SQL::raw("exists(")
                        .with(compiled)
                        .text(") as ")
                        .with(SQL::ident(alias));
                    self.query.columns.push(Selection::Raw(expression));
                }
                Err(err) => self.query.fail(err),
            }
        } else {
            sub.columns = vec![Selection::Raw(SQL::raw(format!("{function}({target})")))];
            self.query = self.query.select_sub(sub, &alias);
        }
        self
    }

    /// Adds a `<relation>_count` column per relation; each entry may be
    /// `"relation as alias"`.
    pub fn with_count(mut self, relations: &[&str]) -> Self {
        for relation in relations {
            self = self.add_aggregate(relation, "*", "count", None);
        }
        self
    }

    /// Counts only the related rows matching `callback`.
    pub fn with_count_where(
        self,
        relation: &str,
        callback: impl FnOnce(ModelQuery) -> ModelQuery,
    ) -> Self {
        self.add_aggregate(relation, "*", "count", Some(Box::new(callback)))
    }

    /// Adds a boolean `<relation>_exists` column per relation.
    pub fn with_exists(mut self, relations: &[&str]) -> Self {
        for relation in relations {
            self = self.add_aggregate(relation, "*", "exists", None);
        }
        self
    }

    pub fn with_sum(self, relation: &str, column: &str) -> Self {
        self.add_aggregate(relation, column, "sum", None)
    }

    pub fn with_avg(self, relation: &str, column: &str) -> Self {
        self.add_aggregate(relation, column, "avg", None)
    }

    pub fn with_min(self, relation: &str, column: &str) -> Self {
        self.add_aggregate(relation, column, "min", None)
    }

    pub fn with_max(self, relation: &str, column: &str) -> Self {
        self.add_aggregate(relation, column, "max", None)
    }

    /// Any of `count`, `exists`, `sum`, `avg`, `min` or `max` over `column`.
    pub fn with_aggregate(self, relation: &str, column: &str, function: &str) -> Self {
        let function = function.to_ascii_lowercase();
        self.add_aggregate(relation, column, &function, None)
    }
}
