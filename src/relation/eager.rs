//! Batched eager loading: one query per relation for a whole set of parents.

use hashbrown::HashMap;
use relq_core::{Dialect, QueryBuilder, RelqError, Result, Value};

use super::{MorphTo, Relation, RelationKeys};
use crate::model::{Record, Related};

/// Column carrying the intermediate key of a through relation.
const THROUGH_KEY: &str = "relq_through_key";

/// Prefix of pivot columns selected for many-to-many relations.
const PIVOT_PREFIX: &str = "pivot_";

/// Parents of a morph-to relation that point at one target type.
#[derive(Debug, Clone)]
pub(crate) struct MorphGroup {
    pub class: String,
    pub keys: Vec<Value>,
}

/// Distinct, non-null values of `column` across `parents`, in first-seen order.
fn distinct_keys<'a>(parents: impl IntoIterator<Item = &'a Record>, column: &str) -> Vec<Value> {
    let mut seen = hashbrown::HashSet::new();
    let mut keys = Vec::new();
    for parent in parents {
        let Some(value) = parent.get(column) else {
            continue;
        };
        if let Some(key) = value.dictionary_key() {
            if seen.insert(key) {
                keys.push(value.clone());
            }
        }
    }
    keys
}

impl Relation {
    /// Column on parent rows whose values select the related rows.
    fn parent_key_column(&self) -> &str {
        match self {
            Relation::BelongsTo(r) => &r.foreign_key,
            _ => self.local_key(),
        }
    }

    /// Keys the eager query for these parents is constrained to.
    pub(crate) fn parent_keys(&self, parents: &[Record]) -> Vec<Value> {
        distinct_keys(parents, self.parent_key_column())
    }

    /// Aliased columns the eager query selects for matching children back to
    /// their parents: the pivot columns, or the through key.
    pub(crate) fn eager_key_columns(&self) -> Vec<String> {
        match self {
            Relation::BelongsToMany(r) | Relation::MorphToMany(r) | Relation::MorphedByMany(r) => {
                let pivot = &r.table;
                [&r.foreign_pivot_key, &r.related_pivot_key]
                    .into_iter()
                    .chain(&r.pivot_columns)
                    .map(|column| format!("{pivot}.{column} as {PIVOT_PREFIX}{column}"))
                    .collect()
            }
            Relation::HasManyThrough(r) | Relation::HasOneThrough(r) => {
                let through = r.through.table_name();
                vec![format!("{through}.{} as {THROUGH_KEY}", r.first_key)]
            }
            _ => Vec::new(),
        }
    }

    /// Query for every related row of the parents owning `keys`.
    ///
    /// Morph-to is loaded per target type; see [`MorphTo::eager_groups`].
    pub(crate) fn eager_query(&self, dialect: Dialect, keys: Vec<Value>) -> Result<QueryBuilder> {
        let query = match self {
            Relation::BelongsTo(r) => {
                let table = r.related.table_name();
                QueryBuilder::table(dialect, table)
                    .where_in(&format!("{table}.{}", r.owner_key), keys)
            }
            Relation::HasOne(r) | Relation::HasMany(r) => {
                let table = r.related.table_name();
                QueryBuilder::table(dialect, table)
                    .where_in(&format!("{table}.{}", r.foreign_key), keys)
            }
            Relation::MorphOne(r) | Relation::MorphMany(r) => {
                let table = r.related.table_name();
                QueryBuilder::table(dialect, table)
                    .where_in(&format!("{table}.{}", r.morph_id), keys)
                    .r#where(
                        &format!("{table}.{}", r.morph_type),
                        "=",
                        r.morph_class.as_str(),
                    )
            }
            Relation::BelongsToMany(r) | Relation::MorphToMany(r) | Relation::MorphedByMany(r) => {
                let table = r.related.table_name();
                let pivot = &r.table;
                let mut columns = vec![format!("{table}.*")];
                columns.extend(self.eager_key_columns());
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                let mut query = QueryBuilder::table(dialect, table)
                    .select(&columns)
                    .join(
                        pivot,
                        &format!("{table}.{}", r.related_key),
                        "=",
                        &format!("{pivot}.{}", r.related_pivot_key),
                    )
                    .where_in(&format!("{pivot}.{}", r.foreign_pivot_key), keys);
                if let Some(morph) = &r.morph {
                    query = query.r#where(
                        &format!("{pivot}.{}", morph.type_column),
                        "=",
                        morph.class.as_str(),
                    );
                }
                query
            }
            Relation::HasManyThrough(r) | Relation::HasOneThrough(r) => {
                let table = r.related.table_name();
                let through = r.through.table_name();
                let first_key = format!("{through}.{}", r.first_key);
                let mut columns = vec![format!("{table}.*")];
                columns.extend(self.eager_key_columns());
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                QueryBuilder::table(dialect, table)
                    .select(&columns)
                    .join(
                        through,
                        &format!("{through}.{}", r.second_local_key),
                        "=",
                        &format!("{table}.{}", r.second_key),
                    )
                    .where_in(&first_key, keys)
            }
            Relation::MorphTo(r) => {
                return Err(RelqError::RelationMisuse {
                    relation: r.name.clone(),
                    operation: "a single eager query",
                });
            }
        };
        Ok(query)
    }

    /// Attaches `children` to the parents they belong to under `name`.
    ///
    /// Every parent gets an entry, empty when nothing matched.
    pub(crate) fn match_eager(&self, name: &str, parents: &mut [Record], children: Vec<Record>) {
        let mut dictionary: HashMap<String, Vec<Record>> = HashMap::new();
        for mut child in children {
            let key = match self {
                Relation::BelongsTo(r) => child.get(&r.owner_key).cloned(),
                Relation::HasOne(r) | Relation::HasMany(r) => child.get(&r.foreign_key).cloned(),
                Relation::MorphOne(r) | Relation::MorphMany(r) => child.get(&r.morph_id).cloned(),
                Relation::BelongsToMany(r)
                | Relation::MorphToMany(r)
                | Relation::MorphedByMany(r) => {
                    let pivot = child.row.split_prefixed(PIVOT_PREFIX);
                    let key = pivot.get(&r.foreign_pivot_key).cloned();
                    child.pivot = Some(pivot);
                    key
                }
                Relation::HasManyThrough(_) | Relation::HasOneThrough(_) => {
                    child.row.remove(THROUGH_KEY)
                }
                Relation::MorphTo(_) => None,
            };
            if let Some(key) = key.as_ref().and_then(Value::dictionary_key) {
                dictionary.entry(key).or_default().push(child);
            }
        }

        let column = self.parent_key_column().to_string();
        let single = self.kind().is_single();
        for parent in parents.iter_mut() {
            let matched = parent
                .get(&column)
                .and_then(Value::dictionary_key)
                .and_then(|key| dictionary.get(&key));
            let related = if single {
                Related::One(matched.and_then(|m| m.first()).cloned().map(Box::new))
            } else {
                Related::Many(matched.cloned().unwrap_or_default())
            };
            parent.set_relation(name, related);
        }
    }
}

impl MorphTo {
    /// Parents grouped by the target type they point at, in first-seen order.
    pub(crate) fn eager_groups(&self, parents: &[Record]) -> Vec<MorphGroup> {
        let mut groups: Vec<MorphGroup> = Vec::new();
        let mut by_class: HashMap<String, Vec<&Record>> = HashMap::new();
        for parent in parents {
            let Some(class) = parent.get(&self.morph_type).and_then(Value::as_str) else {
                continue;
            };
            if !by_class.contains_key(class) {
                groups.push(MorphGroup {
                    class: class.to_string(),
                    keys: Vec::new(),
                });
            }
            by_class.entry(class.to_string()).or_default().push(parent);
        }
        for group in &mut groups {
            if let Some(members) = by_class.get(&group.class) {
                group.keys = distinct_keys(members.iter().copied(), &self.morph_id);
            }
        }
        groups
    }

    /// Attaches the `children` loaded for target type `class`, keyed by
    /// `owner_key`, to the parents pointing at them.
    pub(crate) fn match_eager(
        &self,
        name: &str,
        parents: &mut [Record],
        class: &str,
        owner_key: &str,
        children: Vec<Record>,
    ) {
        let mut dictionary: HashMap<String, Record> = HashMap::new();
        for child in children {
            if let Some(key) = child.get(owner_key).and_then(Value::dictionary_key) {
                dictionary.entry(key).or_insert(child);
            }
        }
        for parent in parents.iter_mut() {
            if parent.get(&self.morph_type).and_then(Value::as_str) != Some(class) {
                continue;
            }
            let matched = parent
                .get(&self.morph_id)
                .and_then(Value::dictionary_key)
                .and_then(|key| dictionary.get(&key))
                .cloned()
                .map(Box::new);
            parent.set_relation(name, Related::One(matched));
        }
    }

    /// Marks every parent as having no target, before groups are matched.
    pub(crate) fn init_eager(&self, name: &str, parents: &mut [Record]) {
        for parent in parents.iter_mut() {
            parent.set_relation(name, Related::One(None));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelDef, Registry};

    fn registry() -> Registry {
        Registry::new()
            .register(
                ModelDef::new("User")
                    .has_many("posts", "Post")
                    .belongs_to("team", "Team")
                    .belongs_to_many("roles", "Role"),
            )
            .register(ModelDef::new("Team").has_many_through("posts", "Post", "User"))
            .register(ModelDef::new("Post"))
            .register(ModelDef::new("Role"))
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

    fn record(pairs: &[(&str, Value)]) -> Record {
        Record::new(pairs.iter().cloned().collect())
    }

    #[test]
    fn keys_are_distinct_and_skip_null() {
        let parents = vec![
            record(&[("id", 1.into()), ("team_id", 7.into())]),
            record(&[("id", 2.into()), ("team_id", 7.into())]),
            record(&[("id", 3.into()), ("team_id", Value::Null)]),
        ];
        assert_eq!(relation("User", "team").parent_keys(&parents), vec![7.into()]);
        assert_eq!(
            relation("User", "posts").parent_keys(&parents),
            vec![1.into(), 2.into(), 3.into()]
        );
    }

    #[test]
    fn pivot_query_selects_prefixed_columns() {
        let query = relation("User", "roles").eager_query(Dialect::SQLite, vec![1.into(), 2.into()])
            .unwrap();
        assert_eq!(
            query.to_sql().unwrap(),
            concat!(
                r#"select "roles".*, "role_user"."user_id" as "pivot_user_id", "role_user"."role_id" as "pivot_role_id" "#,
                r#"from "roles" inner join "role_user" on "roles"."id" = "role_user"."role_id" "#,
                r#"where "role_user"."user_id" in (?, ?)"#
            )
        );
    }

    #[test]
    fn through_query_carries_intermediate_key() {
        let query = relation("Team", "posts").eager_query(Dialect::SQLite, vec![1.into()])
            .unwrap();
        assert_eq!(
            query.to_sql().unwrap(),
            concat!(
                r#"select "posts".*, "users"."team_id" as "relq_through_key" from "posts" "#,
                r#"inner join "users" on "users"."id" = "posts"."user_id" where "users"."team_id" in (?)"#
            )
        );
    }

    #[test]
    fn matching_partitions_children_by_key() {
        let mut parents = vec![record(&[("id", 1.into())]), record(&[("id", 2.into())])];
        let children = vec![
            record(&[("id", 10.into()), ("user_id", 1.into())]),
            record(&[("id", 11.into()), ("user_id", "1".into())]),
            record(&[("id", 12.into()), ("user_id", 9.into())]),
        ];
        relation("User", "posts").match_eager("posts", &mut parents, children);
        assert_eq!(parents[0].many("posts").len(), 2);
        assert!(parents[1].many("posts").is_empty());
        assert!(parents[1].relation("posts").is_some());
    }

    #[test]
    fn pivot_columns_move_off_the_row() {
        let mut parents = vec![record(&[("id", 1.into())])];
        let children = vec![record(&[
            ("id", 5.into()),
            ("name", "admin".into()),
            ("pivot_user_id", 1.into()),
            ("pivot_role_id", 5.into()),
        ])];
        relation("User", "roles").match_eager("roles", &mut parents, children);
        let role = &parents[0].many("roles")[0];
        assert!(!role.row.contains("pivot_user_id"));
        assert_eq!(
            role.pivot.as_ref().and_then(|p| p.get("role_id")),
            Some(&Value::Integer(5))
        );
    }
}
