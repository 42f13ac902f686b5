//! Planning and running eager loads.
//!
//! Each planned path costs one query per relation level, however many
//! parents the outer query returned. Morph-to relations cost one query per
//! distinct target type.

use std::sync::Arc;

use relq_core::{Executor, QueryBuilder, RelqError, Result, Selection};

use super::{Constraint, ModelQuery};
use crate::model::{ModelDef, Record};
use crate::relation::{AliasCounter, MorphGroup, MorphTo};

/// One relation path to load after the parent query runs.
#[derive(Clone)]
pub(crate) struct EagerLoad {
    pub path: String,
    pub constraint: Option<Constraint>,
}

/// `"a.b.c"` → `["a", "a.b", "a.b.c"]`.
fn prefixes(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('.')
        .map(|(index, _)| &path[..index])
        .chain(std::iter::once(path))
}

/// Puts `columns` back on the select list after a constraint replaced it.
fn keep_selected(query: &mut QueryBuilder, columns: &[String]) {
    if columns.is_empty() {
        return;
    }
    if query.columns.is_empty() {
        if let Some(table) = query.from_table().map(|table| format!("{table}.*")) {
            query.columns.push(Selection::Column(table.into()));
        }
    }
    for column in columns {
        let selected = query
            .columns
            .iter()
            .any(|s| matches!(s, Selection::Column(c) if c.as_str() == column));
        if !selected {
            query.columns.push(Selection::Column(column.as_str().into()));
        }
    }
}

impl ModelQuery {
    fn plan(&mut self, path: &str, constraint: Option<Constraint>) {
        for prefix in prefixes(path) {
            if !self.eager.iter().any(|load| load.path == prefix) {
                self.eager.push(EagerLoad {
                    path: prefix.to_string(),
                    constraint: None,
                });
            }
        }
        if let Some(constraint) = constraint {
            if let Some(load) = self.eager.iter_mut().find(|load| load.path == path) {
                load.constraint = Some(constraint);
            }
        }
    }

    /// Loads the given relations, dot paths included, with the results.
    /// Planning `"posts.comments"` also plans `"posts"`.
    pub fn with(mut self, paths: &[&str]) -> Self {
        for path in paths {
            self.plan(path.trim(), None);
        }
        self
    }

    /// Loads `path` with `constraint` applied to its query.
    pub fn with_constrained(
        mut self,
        path: &str,
        constraint: impl Fn(ModelQuery) -> ModelQuery + 'static,
    ) -> Self {
        self.plan(path.trim(), Some(Arc::new(constraint)));
        self
    }

    /// Drops planned loads, together with the paths nested under them.
    pub fn without(mut self, paths: &[&str]) -> Self {
        for path in paths {
            let nested = format!("{path}.");
            self.eager
                .retain(|load| load.path != *path && !load.path.starts_with(&nested));
        }
        self
    }

    /// Paths currently planned, in planning order.
    pub fn eager_paths(&self) -> Vec<&str> {
        self.eager.iter().map(|load| load.path.as_str()).collect()
    }

    /// Runs every planned top-level load against `records`, handing deeper
    /// paths down to the related queries.
    pub(super) fn eager_load<E: Executor + ?Sized>(
        &mut self,
        records: &mut [Record],
        executor: &mut E,
    ) -> Result<()> {
        if records.is_empty() || self.eager.is_empty() {
            return Ok(());
        }
        let loads = std::mem::take(&mut self.eager);
        let outcome = loads
            .iter()
            .filter(|load| !load.path.contains('.'))
            .try_for_each(|load| {
                let prefix = format!("{}.", load.path);
                let nested = loads
                    .iter()
                    .filter_map(|deeper| {
                        deeper.path.strip_prefix(&prefix).map(|rest| EagerLoad {
                            path: rest.to_string(),
                            constraint: deeper.constraint.clone(),
                        })
                    })
                    .collect();
                self.load_relation(load, nested, records, executor)
            });
        self.eager = loads;
        outcome
    }

    fn load_relation<E: Executor + ?Sized>(
        &mut self,
        load: &EagerLoad,
        nested: Vec<EagerLoad>,
        records: &mut [Record],
        executor: &mut E,
    ) -> Result<()> {
        let relation = self.relation(&load.path)?;
        if let Some(morph) = relation.as_morph_to() {
            return self.load_morph_to(morph, load, nested, records, executor);
        }

        let keys = relation.parent_keys(records);
        if keys.is_empty() {
            relation.match_eager(&load.path, records, Vec::new());
            return Ok(());
        }
        let related = relation
            .related()
            .cloned()
            .ok_or_else(|| RelqError::UnknownRelation {
                model: self.model.name().to_string(),
                relation: load.path.clone(),
            })?;
        let query = relation.eager_query(self.dialect(), keys)?;
        let mut related = self.related_query(related, query, load, nested, executor)?;
        keep_selected(&mut related.query, &relation.eager_key_columns());
        let children = related.get(executor)?;
        relation.match_eager(&load.path, records, children);
        Ok(())
    }

    fn load_morph_to<E: Executor + ?Sized>(
        &self,
        morph: &MorphTo,
        load: &EagerLoad,
        nested: Vec<EagerLoad>,
        records: &mut [Record],
        executor: &mut E,
    ) -> Result<()> {
        morph.init_eager(&load.path, records);
        for MorphGroup { class, keys } in morph.eager_groups(records) {
            if keys.is_empty() {
                continue;
            }
            let target = self.registry.morph_model(&class)?;
            let owner_key = morph.owner_key_for(&target).to_string();
            let table = target.table_name();
            let query = QueryBuilder::table(self.dialect(), table)
                .where_in(&format!("{table}.{owner_key}"), keys);
            let children = self
                .related_query(target.clone(), query, load, nested.clone(), executor)?
                .get(executor)?;
            morph.match_eager(&load.path, records, &class, &owner_key, children);
        }
        Ok(())
    }

    /// The related query for one load. Constraints are grouped apart from
    /// the key predicate so an OR inside them cannot reach other parents.
    fn related_query<E: Executor + ?Sized>(
        &self,
        model: Arc<ModelDef>,
        query: QueryBuilder,
        load: &EagerLoad,
        nested: Vec<EagerLoad>,
        executor: &mut E,
    ) -> Result<ModelQuery> {
        let mut related = ModelQuery::from_parts(
            self.registry.clone(),
            model,
            query,
            AliasCounter::default(),
        );
        if let Some(constraint) = &load.constraint {
            let start = related.query.wheres.len();
            related = constraint(related).resolve_morph_types(executor)?;
            related.query.isolate_wheres_from(start);
        }
        related.eager = nested;
        Ok(related)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::users;
    use super::*;

    #[test]
    fn dot_paths_plan_every_prefix() {
        assert_eq!(prefixes("a.b.c").collect::<Vec<_>>(), vec!["a", "a.b", "a.b.c"]);
        let q = users().with(&["posts.comments", "roles", "posts"]);
        assert_eq!(q.eager_paths(), vec!["posts", "posts.comments", "roles"]);
    }

    #[test]
    fn constraints_attach_to_the_full_path() {
        let q = users()
            .with(&["posts"])
            .with_constrained("posts.comments", |q| q.r#where("approved", "=", true));
        assert!(q.eager.iter().find(|l| l.path == "posts").unwrap().constraint.is_none());
        assert!(
            q.eager
                .iter()
                .find(|l| l.path == "posts.comments")
                .unwrap()
                .constraint
                .is_some()
        );
    }

    #[test]
    fn without_drops_nested_paths() {
        let q = users()
            .with(&["posts.comments", "postsmeta", "roles"])
            .without(&["posts"]);
        assert_eq!(q.eager_paths(), vec!["postsmeta", "roles"]);
    }

    #[test]
    fn replaced_selects_get_their_key_columns_back() {
        let keys = vec!["role_user.user_id as pivot_user_id".to_string()];
        let mut query = QueryBuilder::table(relq_core::Dialect::SQLite, "roles")
            .select(&["roles.name"]);
        keep_selected(&mut query, &keys);
        keep_selected(&mut query, &keys);
        assert_eq!(
            query.to_sql().unwrap(),
            r#"select "roles"."name", "role_user"."user_id" as "pivot_user_id" from "roles""#
        );

        let mut bare = QueryBuilder::table(relq_core::Dialect::SQLite, "roles");
        keep_selected(&mut bare, &keys);
        assert_eq!(
            bare.to_sql().unwrap(),
            r#"select "roles".*, "role_user"."user_id" as "pivot_user_id" from "roles""#
        );
    }

    #[test]
    fn eager_plans_do_not_change_the_parent_sql() {
        let q = users().with(&["posts"]).r#where("id", "=", 1);
        assert_eq!(q.to_sql().unwrap(), r#"select * from "users" where "id" = ?"#);
    }
}
