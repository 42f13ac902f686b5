#![cfg(feature = "rusqlite")]

use relq::{ModelQuery, Record, Related, Value};

mod common;
use common::{ids, names, registry, setup_db};

fn query(model: &str) -> ModelQuery {
    registry().query(model, relq::Dialect::SQLite).unwrap()
}

fn titles(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get("title").and_then(Value::as_str).map(str::to_string))
        .collect()
}

#[test]
fn test_one_query_per_relation() {
    let mut db = setup_db();
    db.enable_query_log();

    let users = query("User")
        .with(&["posts", "country"])
        .order_by("id", "asc")
        .get(&mut db)
        .unwrap();

    assert_eq!(db.query_log().len(), 3);
    assert_eq!(titles(users[0].many("posts")), ["first", "second"]);
    assert_eq!(titles(users[1].many("posts")), ["third"]);
    assert!(users[3].many("posts").is_empty());
    assert!(matches!(users[3].relation("posts"), Some(Related::Many(m)) if m.is_empty()));

    assert_eq!(names(&[users[2].one("country").unwrap().clone()]), ["Chile"]);
    assert!(matches!(users[3].relation("country"), Some(Related::One(None))));
}

#[test]
fn test_query_count_does_not_grow_with_parents() {
    let mut db = setup_db();
    for id in 100..600 {
        db.insert(
            "insert into users (id, name) values (?, ?)",
            &[id.into(), format!("user{id}").into()],
        )
        .unwrap();
        db.insert(
            "insert into posts (user_id, title) values (?, 'bulk')",
            &[id.into()],
        )
        .unwrap();
    }
    db.enable_query_log();

    let users = query("User").with(&["posts"]).get(&mut db).unwrap();
    assert_eq!(users.len(), 504);
    assert_eq!(db.query_log().len(), 2);
    assert!(users.iter().skip(4).all(|u| u.many("posts").len() == 1));
}

#[test]
fn test_nested_paths_load_level_by_level() {
    let mut db = setup_db();
    db.enable_query_log();

    let users = query("User")
        .with(&["posts.comments"])
        .order_by("id", "asc")
        .get(&mut db)
        .unwrap();

    // users, posts, comments
    assert_eq!(db.query_log().len(), 3);
    let first = &users[0].many("posts")[0];
    assert_eq!(ids(first.many("comments")), [1, 2]);
    assert!(users[1].many("posts")[0].many("comments").is_empty());
}

#[test]
fn test_parents_without_keys_skip_the_query() {
    let mut db = setup_db();
    db.enable_query_log();

    let users = query("User")
        .where_null("manager_id")
        .with(&["manager"])
        .get(&mut db)
        .unwrap();

    assert_eq!(db.query_log().len(), 1);
    assert_eq!(names(&users), ["ann", "dee"]);
    assert!(users.iter().all(|u| matches!(u.relation("manager"), Some(Related::One(None)))));
}

#[test]
fn test_constrained_loads() {
    let mut db = setup_db();
    let users = query("User")
        .with_constrained("posts", |q| q.r#where("votes", ">", 5).order_by("votes", "asc"))
        .order_by("id", "asc")
        .get(&mut db)
        .unwrap();
    assert_eq!(titles(users[0].many("posts")), ["first"]);
    assert!(users[2].many("posts").is_empty());
}

#[test]
fn test_pivot_columns_are_split_off() {
    let mut db = setup_db();
    let users = query("User")
        .where_eq("id", 1)
        .with(&["roles"])
        .get(&mut db)
        .unwrap();
    let roles = users[0].many("roles");
    assert_eq!(names(roles), ["admin", "editor"]);
    let pivot = roles[0].pivot.as_ref().unwrap();
    assert_eq!(pivot.get("user_id"), Some(&Value::Integer(1)));
    assert_eq!(pivot.get("role_id"), Some(&Value::Integer(1)));
    assert!(!roles[0].row.contains("pivot_user_id"));
}

#[test]
fn test_polymorphic_many_to_many_both_ways() {
    let mut db = setup_db();
    let posts = query("Post").where_eq("id", 1).with(&["tags"]).get(&mut db).unwrap();
    assert_eq!(names(posts[0].many("tags")), ["rust", "sql"]);

    let tags = query("Tag")
        .with(&["posts"])
        .order_by("id", "asc")
        .get(&mut db)
        .unwrap();
    assert_eq!(titles(tags[1].many("posts")), ["first"]);
}

#[test]
fn test_through_relations_group_by_the_far_parent() {
    let mut db = setup_db();
    let countries = query("Country")
        .with(&["posts"])
        .order_by("id", "asc")
        .get(&mut db)
        .unwrap();
    assert_eq!(titles(countries[0].many("posts")), ["first", "second", "third"]);
    assert_eq!(titles(countries[1].many("posts")), ["fourth"]);
    assert!(!countries[0].many("posts")[0].row.contains("relq_through_key"));
}

#[test]
fn test_morph_to_loads_one_query_per_type() {
    let mut db = setup_db();
    db.enable_query_log();

    let comments = query("Comment")
        .with(&["commentable"])
        .order_by("id", "asc")
        .get(&mut db)
        .unwrap();

    // comments, then posts, videos and users
    assert_eq!(db.query_log().len(), 4);
    assert_eq!(titles(&[comments[0].one("commentable").unwrap().clone()]), ["first"]);
    assert_eq!(titles(&[comments[2].one("commentable").unwrap().clone()]), ["intro"]);
    assert_eq!(names(&[comments[3].one("commentable").unwrap().clone()]), ["ann"]);
    assert!(comments[4].one("commentable").is_none());
}

#[test]
fn test_without_drops_planned_loads() {
    let mut db = setup_db();
    db.enable_query_log();
    let users = query("User")
        .with(&["posts.comments", "roles"])
        .without(&["posts"])
        .get(&mut db)
        .unwrap();
    assert_eq!(db.query_log().len(), 2);
    assert!(users[0].relation("posts").is_none());
    assert!(users[0].relation("roles").is_some());
}

#[test]
fn test_constraint_selects_keep_the_matching_columns() {
    let mut db = setup_db();
    let users = query("User")
        .where_eq("id", 1)
        .with_constrained("roles", |q| q.select(&["roles.name"]))
        .get(&mut db)
        .unwrap();
    let roles = users[0].many("roles");
    assert_eq!(names(roles), ["admin", "editor"]);
    assert!(roles[0].get("level").is_none());
    assert_eq!(
        roles[0].pivot.as_ref().unwrap().get("user_id"),
        Some(&Value::Integer(1))
    );

    let countries = query("Country")
        .with_constrained("posts", |q| q.select(&["posts.title"]))
        .order_by("id", "asc")
        .get(&mut db)
        .unwrap();
    assert_eq!(titles(countries[1].many("posts")), ["fourth"]);
}

#[test]
fn test_or_constraints_stay_inside_the_parent_keys() {
    let mut db = setup_db();
    db.enable_query_log();
    let users = query("User")
        .where_eq("id", 1)
        .with_constrained("posts", |q| {
            q.r#where("votes", ">", 5).or_where("title", "=", "fourth")
        })
        .get(&mut db)
        .unwrap();

    assert_eq!(titles(users[0].many("posts")), ["first"]);
    assert_eq!(
        db.query_log()[1].sql,
        r#"select * from "posts" where "posts"."user_id" in (?) and ("votes" > ? or "title" = ?)"#
    );
}
