//! Per-dialect SQL rendering for [`QueryBuilder`].

use crate::dialect::Dialect;
use crate::error::{RelqError, Result};
use crate::row::Row;
use crate::sql::SQL;
use crate::value::Value;

use super::join::JoinKind;
use super::predicate::Where;
use super::{Order, QueryBuilder, Selection};

/// Renders builder state into [`SQL`] for one dialect.
///
/// Keywords are emitted in lower case; identifiers are quoted when the
/// fragment is built.
#[derive(Debug, Clone, Copy)]
pub struct Grammar {
    dialect: Dialect,
}

impl Grammar {
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn compile_select(&self, query: &QueryBuilder) -> SQL {
        let mut sql = SQL::raw(if query.distinct {
            "select distinct "
        } else {
            "select "
        });
        sql.append(self.compile_columns(&query.columns));
        if let Some(from) = &query.from {
            sql.push_raw(" from ");
            sql.push_ident(from.clone());
        }
        for join in &query.joins {
            sql.push_raw(" ");
            sql.push_raw(join.kind.as_str());
            sql.push_raw(" ");
            sql.push_ident(join.table.clone());
            if join.kind != JoinKind::Cross && !join.conditions.is_empty() {
                sql.push_raw(" on ");
                sql.append(self.compile_conditions(&join.conditions));
            }
        }
        if !query.wheres.is_empty() {
            sql.push_raw(" where ");
            sql.append(self.compile_conditions(&query.wheres));
        }
        if !query.groups.is_empty() {
            sql.push_raw(" group by ");
            sql.append(SQL::join(
                query.groups.iter().map(|g| SQL::ident(g.clone())),
                ", ",
            ));
        }
        if !query.havings.is_empty() {
            sql.push_raw(" having ");
            sql.append(self.compile_conditions(&query.havings));
        }
        if !query.orders.is_empty() {
            sql.push_raw(" order by ");
            sql.append(self.compile_orders(&query.orders));
        }
        sql.append(self.compile_limit_offset(query.limit, query.offset));
        sql
    }

    fn compile_columns(&self, columns: &[Selection]) -> SQL {
        if columns.is_empty() {
            return SQL::raw("*");
        }
        SQL::join(
            columns.iter().map(|column| match column {
                Selection::Column(name) => SQL::ident(name.clone()),
                Selection::Raw(sql) => sql.clone(),
                Selection::Sub { query, alias } => {
                    let mut sql = self.compile_select(query).parens();
                    sql.push_raw(" as ");
                    sql.push_ident(alias.clone());
                    sql
                }
            }),
            ", ",
        )
    }

    fn compile_orders(&self, orders: &[Order]) -> SQL {
        SQL::join(
            orders.iter().map(|order| match order {
                Order::Column { column, direction } => {
                    SQL::ident(column.clone()).text(" ").text(direction.as_str())
                }
                Order::Raw(sql) => sql.clone(),
            }),
            ", ",
        )
    }

    fn compile_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> SQL {
        let mut sql = SQL::empty();
        match (limit, offset) {
            (Some(limit), _) => sql.push_raw(format!(" limit {limit}")),
            // SQLite and MySQL only accept OFFSET after a LIMIT.
            (None, Some(_)) => match self.dialect {
                Dialect::SQLite => sql.push_raw(" limit -1"),
                Dialect::MySQL => sql.push_raw(" limit 18446744073709551615"),
                Dialect::PostgreSQL => {}
            },
            (None, None) => {}
        }
        if let Some(offset) = offset {
            sql.push_raw(format!(" offset {offset}"));
        }
        sql
    }

    /// Predicates joined by the connector each one recorded.
    pub fn compile_conditions(&self, wheres: &[Where]) -> SQL {
        let mut sql = SQL::empty();
        for (i, predicate) in wheres.iter().enumerate() {
            if i > 0 {
                sql.push_raw(" ");
                sql.push_raw(predicate.boolean().as_str());
                sql.push_raw(" ");
            }
            sql.append(self.compile_where(predicate));
        }
        sql
    }

    pub fn compile_where(&self, predicate: &Where) -> SQL {
        match predicate {
            Where::Basic {
                column,
                operator,
                value,
                ..
            } => {
                let mut sql = SQL::ident(column.clone());
                sql.push_raw(format!(" {operator} "));
                sql.push_param(value.clone());
                sql
            }
            Where::Column {
                first,
                operator,
                second,
                ..
            } => {
                let mut sql = SQL::ident(first.clone());
                sql.push_raw(format!(" {operator} "));
                sql.push_ident(second.clone());
                sql
            }
            Where::Raw { sql, .. } => sql.clone(),
            Where::In {
                column,
                values,
                not,
                ..
            } => {
                if values.is_empty() {
                    return SQL::raw(if *not { "1 = 1" } else { "0 = 1" });
                }
                let mut sql = SQL::ident(column.clone());
                sql.push_raw(if *not { " not in (" } else { " in (" });
                sql.append(SQL::join(values.iter().cloned().map(SQL::param), ", "));
                sql.push_raw(")");
                sql
            }
            Where::InSub {
                column, query, not, ..
            } => {
                let mut sql = SQL::ident(column.clone());
                sql.push_raw(if *not { " not in " } else { " in " });
                sql.append(self.compile_select(query).parens());
                sql
            }
            Where::Null { column, not, .. } => {
                SQL::ident(column.clone()).text(if *not { " is not null" } else { " is null" })
            }
            Where::Between {
                column,
                low,
                high,
                not,
                ..
            } => {
                let mut sql = SQL::ident(column.clone());
                sql.push_raw(if *not { " not between " } else { " between " });
                sql.push_param(low.clone());
                sql.push_raw(" and ");
                sql.push_param(high.clone());
                sql
            }
            Where::Nested { query, .. } => self.compile_conditions(&query.wheres).parens(),
            Where::Exists { query, not, .. } => {
                let mut sql = SQL::raw(if *not { "not exists " } else { "exists " });
                sql.append(self.compile_select(query).parens());
                sql
            }
            Where::SubCompare {
                query,
                operator,
                value,
                ..
            } => {
                let mut sql = self.compile_select(query).parens();
                sql.push_raw(format!(" {operator} "));
                sql.push_param(value.clone());
                sql
            }
        }
    }

    /// `select exists(<query>) as "exists"`.
    pub fn compile_exists(&self, query: &QueryBuilder) -> SQL {
        let mut sql = SQL::raw("select exists");
        sql.append(self.compile_select(query).parens());
        sql.push_raw(" as ");
        sql.push_ident("exists");
        sql
    }

    /// `select <function>(<column>) as "aggregate" from ...`.
    ///
    /// Grouped or distinct queries are wrapped so the aggregate runs over the
    /// grouped rows.
    pub fn compile_aggregate(&self, query: &QueryBuilder, function: &str, column: &str) -> SQL {
        let expression = if column == "*" {
            SQL::raw(format!("{function}(*)"))
        } else {
            SQL::raw(format!("{function}(")).with(SQL::ident(column)).text(")")
        };
        let expression = expression.text(" as ").with(SQL::ident("aggregate"));

        if !query.groups.is_empty() || query.distinct {
            let mut sql = SQL::raw("select ").with(expression).text(" from ");
            sql.append(self.compile_select(query).parens());
            sql.push_raw(" as ");
            sql.push_ident("relq_aggregate_table");
            return sql;
        }

        let mut inner = query.clone();
        inner.columns = vec![Selection::Raw(expression)];
        inner.orders.clear();
        self.compile_select(&inner)
    }

    pub fn compile_insert(&self, table: &str, rows: &[Row]) -> SQL {
        let mut sql = SQL::raw("insert into ").with(SQL::ident(table));
        let Some(first) = rows.first() else {
            return sql.text(match self.dialect {
                Dialect::MySQL => " () values ()",
                Dialect::SQLite | Dialect::PostgreSQL => " default values",
            });
        };
        let columns: Vec<&str> = first.columns().collect();
        sql.push_raw(" ");
        sql.append(SQL::join(columns.iter().map(|c| SQL::ident(*c)), ", ").parens());
        sql.push_raw(" values ");
        sql.append(SQL::join(
            rows.iter().map(|row| {
                SQL::join(
                    columns
                        .iter()
                        .map(|c| SQL::param(row.get(c).cloned().unwrap_or(Value::Null))),
                    ", ",
                )
                .parens()
            }),
            ", ",
        ));
        sql
    }

    /// PostgreSQL insert that hands back the generated key.
    pub fn compile_insert_returning(&self, table: &str, row: &Row, key: &str) -> SQL {
        self.compile_insert(table, std::slice::from_ref(row))
            .text(" returning ")
            .with(SQL::ident(key))
    }

    pub fn compile_upsert(
        &self,
        table: &str,
        rows: &[Row],
        unique_by: &[&str],
        update: &[&str],
    ) -> SQL {
        let mut sql = self.compile_insert(table, rows);
        match self.dialect {
            Dialect::MySQL => {
                sql.push_raw(" on duplicate key update ");
                if update.is_empty() {
                    // No-op assignment so duplicates are skipped like `do nothing`.
                    let key = unique_by
                        .first()
                        .copied()
                        .or_else(|| rows.first().and_then(|row| row.columns().next()));
                    if let Some(key) = key {
                        sql.append(SQL::ident(key).text(" = ").with(SQL::ident(key)));
                    }
                    return sql;
                }
                sql.append(SQL::join(
                    update.iter().map(|c| {
                        SQL::ident(*c)
                            .text(" = values(")
                            .with(SQL::ident(*c))
                            .text(")")
                    }),
                    ", ",
                ));
            }
            Dialect::SQLite | Dialect::PostgreSQL => {
                sql.push_raw(" on conflict ");
                sql.append(SQL::join(unique_by.iter().map(|c| SQL::ident(*c)), ", ").parens());
                if update.is_empty() {
                    sql.push_raw(" do nothing");
                } else {
                    sql.push_raw(" do update set ");
                    sql.append(SQL::join(
                        update.iter().map(|c| {
                            SQL::ident(*c)
                                .text(" = ")
                                .with(SQL::ident(format!("excluded.{c}")))
                        }),
                        ", ",
                    ));
                }
            }
        }
        sql
    }

    pub fn compile_update(&self, query: &QueryBuilder, values: &Row) -> Result<SQL> {
        let table = query
            .from
            .clone()
            .ok_or_else(|| RelqError::Query("no table set on update".to_string()))?;
        if !query.joins.is_empty() {
            return Err(RelqError::Query(
                "update statements cannot carry joins".to_string(),
            ));
        }
        if values.is_empty() {
            return Err(RelqError::Query("update without values".to_string()));
        }
        let mut sql = SQL::raw("update ").with(SQL::ident(table)).text(" set ");
        sql.append(SQL::join(
            values
                .iter()
                .map(|(c, v)| SQL::ident(c).text(" = ").with(SQL::param(v.clone()))),
            ", ",
        ));
        if !query.wheres.is_empty() {
            sql.push_raw(" where ");
            sql.append(self.compile_conditions(&query.wheres));
        }
        Ok(sql)
    }

    pub fn compile_delete(&self, query: &QueryBuilder) -> Result<SQL> {
        let table = query
            .from
            .clone()
            .ok_or_else(|| RelqError::Query("no table set on delete".to_string()))?;
        if !query.joins.is_empty() {
            return Err(RelqError::Query(
                "delete statements cannot carry joins".to_string(),
            ));
        }
        let mut sql = SQL::raw("delete from ").with(SQL::ident(table));
        if !query.wheres.is_empty() {
            sql.push_raw(" where ");
            sql.append(self.compile_conditions(&query.wheres));
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn upsert_per_dialect() {
        let rows = [row(&[("email", "a@x".into()), ("name", "A".into())])];
        let sqlite = Grammar::new(Dialect::SQLite).compile_upsert("users", &rows, &["email"], &["name"]);
        assert_eq!(
            sqlite.sql(Dialect::SQLite),
            r#"insert into "users" ("email", "name") values (?, ?) on conflict ("email") do update set "name" = "excluded"."name""#
        );
        let mysql = Grammar::new(Dialect::MySQL).compile_upsert("users", &rows, &["email"], &["name"]);
        assert_eq!(
            mysql.sql(Dialect::MySQL),
            "insert into `users` (`email`, `name`) values (?, ?) on duplicate key update `name` = values(`name`)"
        );
    }

    #[test]
    fn upsert_without_updates_skips_duplicates() {
        let rows = [row(&[("email", "a@x".into()), ("name", "A".into())])];
        let mysql = Grammar::new(Dialect::MySQL).compile_upsert("users", &rows, &["email"], &[]);
        assert_eq!(
            mysql.sql(Dialect::MySQL),
            "insert into `users` (`email`, `name`) values (?, ?) on duplicate key update `email` = `email`"
        );
        let postgres =
            Grammar::new(Dialect::PostgreSQL).compile_upsert("users", &rows, &["email"], &[]);
        assert_eq!(
            postgres.sql(Dialect::PostgreSQL),
            r#"insert into "users" ("email", "name") values ($1, $2) on conflict ("email") do nothing"#
        );
    }

    #[test]
    fn insert_many_rows_keeps_column_order() {
        let rows = [
            row(&[("a", 1.into()), ("b", 2.into())]),
            row(&[("b", 4.into()), ("a", 3.into())]),
        ];
        let (sql, bindings) = Grammar::new(Dialect::PostgreSQL)
            .compile_insert("t", &rows)
            .build(Dialect::PostgreSQL);
        assert_eq!(sql, r#"insert into "t" ("a", "b") values ($1, $2), ($3, $4)"#);
        assert_eq!(bindings, vec![1.into(), 2.into(), 3.into(), 4.into()]);
    }

    #[test]
    fn update_and_delete() {
        let q = QueryBuilder::table(Dialect::SQLite, "users").r#where("id", "=", 3);
        let grammar = Grammar::new(Dialect::SQLite);
        let (sql, bindings) = grammar
            .compile_update(&q, &row(&[("name", "B".into())]))
            .unwrap()
            .build(Dialect::SQLite);
        assert_eq!(sql, r#"update "users" set "name" = ? where "id" = ?"#);
        assert_eq!(bindings, vec!["B".into(), 3.into()]);
        assert_eq!(
            grammar.compile_delete(&q).unwrap().sql(Dialect::SQLite),
            r#"delete from "users" where "id" = ?"#
        );
    }

    #[test]
    fn aggregate_wraps_grouped_queries() {
        let q = QueryBuilder::table(Dialect::SQLite, "posts").group_by(&["user_id"]);
        assert_eq!(
            Grammar::new(Dialect::SQLite)
                .compile_aggregate(&q, "count", "*")
                .sql(Dialect::SQLite),
            r#"select count(*) as "aggregate" from (select * from "posts" group by "user_id") as "relq_aggregate_table""#
        );
        let q = QueryBuilder::table(Dialect::SQLite, "posts").order_by("id", "asc");
        assert_eq!(
            Grammar::new(Dialect::SQLite)
                .compile_aggregate(&q, "max", "votes")
                .sql(Dialect::SQLite),
            r#"select max("votes") as "aggregate" from "posts""#
        );
    }
}
