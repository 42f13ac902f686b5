//! Relations as existence sub-queries.
//!
//! An existence query selects the related rows belonging to whatever row the
//! parent query is looking at, by correlating on the parent's qualifier. It is
//! wrapped in `exists (...)` for relationship filters and in a counting or
//! aggregating sub-select otherwise.

use relq_core::{Dialect, QueryBuilder, RelqError, Result};

use super::{AliasCounter, MorphTo, Relation};
use crate::model::ModelDef;

/// Join to the related table that a many-to-many existence query only adds
/// when something references the related table.
#[derive(Debug, Clone)]
struct DeferredJoin {
    table: String,
    first: String,
    second: String,
    pivot: String,
}

/// A correlated sub-query for one relation, before constraints are applied.
#[derive(Debug, Clone)]
pub(crate) struct ExistenceQuery {
    pub query: QueryBuilder,
    /// Name unqualified columns of constraints are qualified with.
    pub qualifier: String,
    deferred_join: Option<DeferredJoin>,
}

/// Table reference for `table`, aliased when it would collide with the parent.
fn reference(table: &str, parent_table: &str, aliases: &AliasCounter) -> (String, String) {
    if table == parent_table {
        let alias = aliases.next();
        (format!("{table} as {alias}"), alias)
    } else {
        (table.to_string(), table.to_string())
    }
}

impl Relation {
    /// Correlated query for this relation against a parent whose table is
    /// `parent_table`, referenced in the outer query as `parent_qualifier`.
    ///
    /// Morph-to has no single related table; use [`morph_to_existence`].
    pub(crate) fn existence_query(
        &self,
        dialect: Dialect,
        parent_table: &str,
        parent_qualifier: &str,
        aliases: &AliasCounter,
    ) -> Result<ExistenceQuery> {
        let parent = |column: &str| format!("{parent_qualifier}.{column}");

        let existence = match self {
            Relation::BelongsTo(r) => {
                let (from, q) = reference(r.related.table_name(), parent_table, aliases);
                ExistenceQuery {
                    query: QueryBuilder::table(dialect, &from).where_column(
                        &parent(&r.foreign_key),
                        "=",
                        &format!("{q}.{}", r.owner_key),
                    ),
                    qualifier: q,
                    deferred_join: None,
                }
            }
            Relation::HasOne(r) | Relation::HasMany(r) => {
                let (from, q) = reference(r.related.table_name(), parent_table, aliases);
                ExistenceQuery {
                    query: QueryBuilder::table(dialect, &from).where_column(
                        &parent(&r.local_key),
                        "=",
                        &format!("{q}.{}", r.foreign_key),
                    ),
                    qualifier: q,
                    deferred_join: None,
                }
            }
            Relation::MorphOne(r) | Relation::MorphMany(r) => {
                let (from, q) = reference(r.related.table_name(), parent_table, aliases);
                ExistenceQuery {
                    query: QueryBuilder::table(dialect, &from)
                        .where_column(
                            &parent(&r.local_key),
                            "=",
                            &format!("{q}.{}", r.morph_id),
                        )
                        .r#where(
                            &format!("{q}.{}", r.morph_type),
                            "=",
                            r.morph_class.as_str(),
                        ),
                    qualifier: q,
                    deferred_join: None,
                }
            }
            Relation::BelongsToMany(r) | Relation::MorphToMany(r) | Relation::MorphedByMany(r) => {
                let (from, q) = reference(r.related.table_name(), parent_table, aliases);
                let pivot = &r.table;
                let mut query = QueryBuilder::table(dialect, pivot).where_column(
                    &parent(&r.parent_key),
                    "=",
                    &format!("{pivot}.{}", r.foreign_pivot_key),
                );
                if let Some(morph) = &r.morph {
                    query = query.r#where(
                        &format!("{pivot}.{}", morph.type_column),
                        "=",
                        morph.class.as_str(),
                    );
                }
                ExistenceQuery {
                    query,
                    deferred_join: Some(DeferredJoin {
                        table: from,
                        first: format!("{q}.{}", r.related_key),
                        second: format!("{pivot}.{}", r.related_pivot_key),
                        pivot: pivot.clone(),
                    }),
                    qualifier: q,
                }
            }
            Relation::MorphTo(r) => {
                return Err(RelqError::RelationMisuse {
                    relation: r.name.clone(),
                    operation: "plain relationship filters; use the morph variants",
                });
            }
            Relation::HasManyThrough(r) | Relation::HasOneThrough(r) => {
                let (from, q) = reference(r.related.table_name(), parent_table, aliases);
                let (through, t) = reference(r.through.table_name(), parent_table, aliases);
                let query = QueryBuilder::table(dialect, &from)
                    .join(
                        &through,
                        &format!("{t}.{}", r.second_local_key),
                        "=",
                        &format!("{q}.{}", r.second_key),
                    )
                    .where_column(&parent(&r.local_key), "=", &format!("{t}.{}", r.first_key));
                ExistenceQuery {
                    query,
                    qualifier: q,
                    deferred_join: None,
                }
            }
        };
        Ok(existence)
    }
}

/// Correlated query for one concrete target of a morph-to relation.
pub(crate) fn morph_to_existence(
    relation: &MorphTo,
    target: &ModelDef,
    dialect: Dialect,
    parent_table: &str,
    parent_qualifier: &str,
    aliases: &AliasCounter,
) -> ExistenceQuery {
    let (from, q) = reference(target.table_name(), parent_table, aliases);
    ExistenceQuery {
        query: QueryBuilder::table(dialect, &from).where_column(
            &format!("{parent_qualifier}.{}", relation.morph_id),
            "=",
            &format!("{q}.{}", relation.owner_key_for(target)),
        ),
        qualifier: q,
        deferred_join: None,
    }
}

impl ExistenceQuery {
    /// Qualifies the constraint predicates added from `start` on and adds
    /// the deferred related-table join when they reach past the pivot, or
    /// when `needs_related` says the selection will.
    pub fn finish(self, start: usize, needs_related: bool) -> QueryBuilder {
        let ExistenceQuery {
            mut query,
            qualifier,
            deferred_join,
        } = self;
        query.qualify_wheres_from(start, &qualifier);
        if let Some(join) = deferred_join {
            if needs_related || !query.wheres_confined_to(start, &join.pivot) {
                query = query.join(&join.table, &join.first, "=", &join.second);
            }
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use relq_core::RelqError;

    use super::*;
    use crate::model::{ModelDef, Registry};

    fn registry() -> Registry {
        Registry::new()
            .register(
                ModelDef::new("User")
                    .has_many("posts", "Post")
                    .belongs_to("manager", "User")
                    .belongs_to_many("roles", "Role"),
            )
            .register(ModelDef::new("Post"))
            .register(ModelDef::new("Role"))
            .register(ModelDef::new("Comment").morph_to("commentable"))
    }

    fn relation(model: &str, name: &str) -> Relation {
        let registry = registry();
        let parent = registry.model(model).unwrap();
        parent
            .declared_relation(name)
            .unwrap()
            .resolve(name, &parent, &registry)
            .unwrap()
    }

    #[test]
    fn has_many_correlates_on_parent_key() {
        let existence = relation("User", "posts")
            .existence_query(Dialect::SQLite, "users", "users", &AliasCounter::default())
            .unwrap();
        let query = existence.finish(1, false).select(&["*"]);
        assert_eq!(
            query.to_sql().unwrap(),
            r#"select * from "posts" where "users"."id" = "posts"."user_id""#
        );
    }

    #[test]
    fn self_relation_is_aliased() {
        let aliases = AliasCounter::default();
        let existence = relation("User", "manager")
            .existence_query(Dialect::SQLite, "users", "users", &aliases)
            .unwrap();
        assert_eq!(existence.qualifier, "relq_reserved_0");
        let query = existence.finish(1, false).select(&["*"]);
        assert_eq!(
            query.to_sql().unwrap(),
            r#"select * from "users" as "relq_reserved_0" where "users"."manager_id" = "relq_reserved_0"."id""#
        );
        assert_eq!(aliases.next(), "relq_reserved_1");
    }

    #[test]
    fn pivot_join_is_added_only_when_needed() {
        let roles = relation("User", "roles");
        let aliases = AliasCounter::default();

        let bare = roles
            .existence_query(Dialect::SQLite, "users", "users", &aliases)
            .unwrap()
            .finish(1, false);
        assert!(bare.joins.is_empty());

        let mut constrained = roles
            .existence_query(Dialect::SQLite, "users", "users", &aliases)
            .unwrap();
        constrained.query = constrained.query.r#where("name", "=", "admin");
        let query = constrained.finish(1, false).select(&["*"]);
        assert_eq!(
            query.to_sql().unwrap(),
            concat!(
                r#"select * from "role_user" inner join "roles" on "roles"."id" = "role_user"."role_id" "#,
                r#"where "users"."id" = "role_user"."user_id" and "roles"."name" = ?"#
            )
        );

        let mut pivot_only = roles
            .existence_query(Dialect::SQLite, "users", "users", &aliases)
            .unwrap();
        pivot_only.query = pivot_only.query.r#where("role_user.active", "=", 1);
        assert!(pivot_only.finish(1, false).joins.is_empty());
    }

    #[test]
    fn morph_to_rejects_plain_filters() {
        let err = relation("Comment", "commentable")
            .existence_query(Dialect::SQLite, "comments", "comments", &AliasCounter::default())
            .unwrap_err();
        assert!(matches!(err, RelqError::RelationMisuse { .. }));
    }
}
