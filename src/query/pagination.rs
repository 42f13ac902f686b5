//! Keyset pagination over a single ordering column.

use relq_core::{Direction, Executor, Order, RelqError, Result, relq_trace_cursor};

use super::{Cursor, ModelQuery};
use crate::model::Record;

/// One page of a cursor-paginated query.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPage {
    pub items: Vec<Record>,
    /// Token for the page after this one; `None` on the last page.
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub per_page: u64,
}

fn unqualified(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column)
}

/// Whether `order` sorts by `column`, qualified or not.
pub(super) fn orders_by(order: &Order, column: &str) -> bool {
    match order {
        Order::Column { column: ordered, .. } => {
            let ordered = ordered.as_str();
            if ordered.contains('.') && column.contains('.') {
                ordered == column
            } else {
                unqualified(ordered) == unqualified(column)
            }
        }
        Order::Raw(_) => false,
    }
}

/// The value a valid `token` resumes after; invalid tokens mean page one.
fn resume_value(token: Option<&str>, column: &str) -> Option<relq_core::Value> {
    let token = token?;
    match Cursor::decode(token) {
        Ok(cursor) if cursor.column() == column => Some(cursor.value()),
        Ok(cursor) => {
            relq_trace_cursor!(column, format!("token orders by {}", cursor.column()));
            None
        }
        Err(err) => {
            relq_trace_cursor!(column, err);
            None
        }
    }
}

impl ModelQuery {
    /// Fetches the page after `cursor`, ordered by `column`.
    ///
    /// A token that does not decode, or that was issued for another column,
    /// is ignored and the first page is returned. No count query is run;
    /// `has_more` comes from fetching one row past the page.
    pub fn cursor_paginate<E: Executor + ?Sized>(
        mut self,
        executor: &mut E,
        per_page: u64,
        cursor: Option<&str>,
        column: &str,
        direction: Direction,
    ) -> Result<CursorPage> {
        let per_page = per_page.max(1);
        self = self.resolve_morph_types(executor)?;
        if let Some(value) = resume_value(cursor, column) {
            self.query.isolate_wheres();
            let operator = match direction {
                Direction::Asc => ">",
                Direction::Desc => "<",
            };
            self = self.r#where(column, operator, value);
        }
        self.query.orders.retain(|order| !orders_by(order, column));
        self.query.orders.insert(
            0,
            Order::Column {
                column: column.into(),
                direction,
            },
        );

        let mut items = self.limit(per_page.saturating_add(1)).get(executor)?;
        let has_more = items.len() as u64 > per_page;
        items.truncate(per_page as usize);

        let next_cursor = if has_more {
            let key = unqualified(column);
            let last = items
                .last()
                .and_then(|record| record.get(key))
                .ok_or_else(|| {
                    RelqError::Query(format!(
                        "cursor column [{column}] is missing from the selected columns"
                    ))
                })?;
            Some(Cursor::new(column, last).encode()?)
        } else {
            None
        };

        Ok(CursorPage {
            items,
            next_cursor,
            has_more,
            per_page,
        })
    }
}
