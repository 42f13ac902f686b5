#![cfg(feature = "rusqlite")]

use relq::{Cursor, Direction, ModelQuery, Value};

mod common;
use common::{ids, registry, setup_db};

fn posts() -> ModelQuery {
    registry().query("Post", relq::Dialect::SQLite).unwrap()
}

#[test]
fn test_cursor_pages_walk_forward_without_gaps() {
    let mut db = setup_db();
    db.unprepared("insert into posts (id, user_id, title) values (5, 4, 'fifth')")
        .unwrap();

    let page = posts()
        .cursor_paginate(&mut db, 2, None, "id", Direction::Asc)
        .unwrap();
    assert_eq!(ids(&page.items), [1, 2]);
    assert!(page.has_more);
    let token = page.next_cursor.unwrap();
    assert_eq!(Cursor::decode(&token).unwrap().value(), Value::Integer(2));

    let page = posts()
        .cursor_paginate(&mut db, 2, Some(&token), "id", Direction::Asc)
        .unwrap();
    assert_eq!(ids(&page.items), [3, 4]);
    let token = page.next_cursor.unwrap();

    // Rows added behind the cursor do not shift later pages.
    db.unprepared("insert into posts (id, user_id, title) values (0, 4, 'zeroth')")
        .unwrap();

    let page = posts()
        .cursor_paginate(&mut db, 2, Some(&token), "id", Direction::Asc)
        .unwrap();
    assert_eq!(ids(&page.items), [5]);
    assert!(!page.has_more);
    assert!(page.next_cursor.is_none());
}

#[test]
fn test_rows_added_ahead_of_the_cursor_show_up_once() {
    let mut db = setup_db();
    let page = posts()
        .cursor_paginate(&mut db, 2, None, "id", Direction::Asc)
        .unwrap();
    assert_eq!(ids(&page.items), [1, 2]);

    db.unprepared("insert into posts (id, user_id, title) values (5, 4, 'fifth')")
        .unwrap();

    let page = posts()
        .cursor_paginate(&mut db, 2, page.next_cursor.as_deref(), "id", Direction::Asc)
        .unwrap();
    assert_eq!(ids(&page.items), [3, 4]);
    assert!(page.has_more);

    let page = posts()
        .cursor_paginate(&mut db, 2, page.next_cursor.as_deref(), "id", Direction::Asc)
        .unwrap();
    assert_eq!(ids(&page.items), [5]);
    assert!(!page.has_more);
}

#[test]
fn test_cursor_pages_respect_or_filters() {
    let mut db = setup_db();
    let filtered = || posts().where_eq("user_id", 1).or_where("votes", ">", 5);

    let mut seen = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = filtered()
            .cursor_paginate(&mut db, 1, token.as_deref(), "id", Direction::Asc)
            .unwrap();
        seen.extend(ids(&page.items));
        match page.next_cursor {
            Some(next) => token = Some(next),
            None => break,
        }
        assert!(seen.len() <= 3, "pages repeat rows: {seen:?}");
    }
    assert_eq!(seen, [1, 2, 3]);
}

#[test]
fn test_chunks_respect_or_filters() {
    let mut db = setup_db();
    let mut seen = Vec::new();
    let completed = posts()
        .where_eq("user_id", 1)
        .or_where("votes", ">", 5)
        .chunk_by_id(&mut db, 1, None, |chunk| {
            seen.extend(ids(&chunk));
            Ok(seen.len() <= 3)
        })
        .unwrap();
    assert!(completed);
    assert_eq!(seen, [1, 2, 3]);
}

#[test]
fn test_descending_pages() {
    let mut db = setup_db();
    let page = posts()
        .cursor_paginate(&mut db, 3, None, "id", Direction::Desc)
        .unwrap();
    assert_eq!(ids(&page.items), [4, 3, 2]);

    let page = posts()
        .cursor_paginate(&mut db, 3, page.next_cursor.as_deref(), "id", Direction::Desc)
        .unwrap();
    assert_eq!(ids(&page.items), [1]);
    assert!(!page.has_more);
}

#[test]
fn test_bad_tokens_restart_from_the_first_page() {
    let mut db = setup_db();
    let foreign = Cursor::new("votes", &Value::Integer(3)).encode().unwrap();

    for token in ["garbage!!", "", foreign.as_str()] {
        let page = posts()
            .cursor_paginate(&mut db, 2, Some(token), "id", Direction::Asc)
            .unwrap();
        assert_eq!(ids(&page.items), [1, 2]);
    }
}

#[test]
fn test_existing_orders_on_the_cursor_column_are_replaced() {
    let mut db = setup_db();
    let page = posts()
        .order_by("id", "desc")
        .order_by("title", "asc")
        .cursor_paginate(&mut db, 2, None, "id", Direction::Asc)
        .unwrap();
    assert_eq!(ids(&page.items), [1, 2]);
}

#[test]
fn test_chunk_by_id_visits_every_row_once() {
    let mut db = setup_db();
    let mut seen = Vec::new();
    let completed = posts()
        .chunk_by_id(&mut db, 3, None, |chunk| {
            seen.push(ids(&chunk));
            Ok(true)
        })
        .unwrap();
    assert!(completed);
    assert_eq!(seen, [vec![1, 2, 3], vec![4]]);

    let mut calls = 0;
    let completed = posts()
        .chunk_by_id(&mut db, 1, Some("posts.id"), |_| {
            calls += 1;
            Ok(calls < 2)
        })
        .unwrap();
    assert!(!completed);
    assert_eq!(calls, 2);
}

#[test]
fn test_each_row_streams_until_stopped() {
    let mut db = setup_db();
    let mut titles = Vec::new();
    posts()
        .order_by("id", "asc")
        .each_row(&mut db, |row| {
            titles.push(row.get("title").and_then(Value::as_str).map(str::to_string));
            titles.len() < 2
        })
        .unwrap();
    assert_eq!(titles, [Some("first".to_string()), Some("second".to_string())]);
}
