//! Result shaping: rows plus the relations loaded onto them.

use hashbrown::HashMap;
use relq_core::{Row, Value};

/// One parent row and the related rows eager loading attached to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub row: Row,
    pub relations: HashMap<String, Related>,
    /// Join-table columns for rows loaded through a many-to-many relation.
    pub pivot: Option<Row>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

impl Related {
    pub fn len(&self) -> usize {
        match self {
            Related::One(one) => usize::from(one.is_some()),
            Related::Many(many) => many.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Record {
    pub fn new(row: Row) -> Self {
        Self {
            row,
            relations: HashMap::new(),
            pivot: None,
        }
    }

    #[inline]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.row.get(column)
    }

    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    /// The single record loaded for `name`, if any.
    pub fn one(&self, name: &str) -> Option<&Record> {
        match self.relations.get(name)? {
            Related::One(one) => one.as_deref(),
            Related::Many(many) => many.first(),
        }
    }

    /// Records loaded for `name`; empty when the relation was not loaded.
    pub fn many(&self, name: &str) -> &[Record] {
        match self.relations.get(name) {
            Some(Related::Many(many)) => many,
            Some(Related::One(Some(one))) => std::slice::from_ref(&**one),
            _ => &[],
        }
    }

    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }
}

impl From<Row> for Record {
    fn from(row: Row) -> Self {
        Record::new(row)
    }
}
