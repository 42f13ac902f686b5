//! Model metadata and the registry that owns it.
//!
//! There is no global state: the application builds one [`Registry`], wraps
//! it in an `Arc` and hands it to every [`ModelQuery`](crate::ModelQuery).

pub mod naming;
mod record;

pub use record::{Record, Related};

use std::sync::Arc;

use hashbrown::HashMap;
use relq_core::{Dialect, RelqError, Result, Value};

use crate::query::ModelQuery;
use crate::relation::RelationDecl;

/// A named predicate applied by [`ModelQuery::scope`].
pub type Scope = Arc<dyn Fn(ModelQuery, &[Value]) -> ModelQuery + Send + Sync>;

/// Table, key and relation declarations of one model.
#[derive(Debug, Clone)]
pub struct ModelDef {
    name: String,
    table: String,
    key: String,
    morph_alias: Option<String>,
    connection: Option<String>,
    relations: HashMap<String, RelationDecl>,
}

impl ModelDef {
    /// A model with the conventional table (`User` → `users`) and key `id`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: naming::table_name(&name),
            name,
            key: "id".to_string(),
            morph_alias: None,
            connection: None,
            relations: HashMap::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Value stored in discriminator columns for this model.
    pub fn morph_alias(mut self, alias: impl Into<String>) -> Self {
        self.morph_alias = Some(alias.into());
        self
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Declares `name` with an explicit descriptor.
    pub fn relation(mut self, name: impl Into<String>, decl: RelationDecl) -> Self {
        self.relations.insert(name.into(), decl);
        self
    }

    pub fn belongs_to(self, name: &str, related: &str) -> Self {
        self.relation(name, RelationDecl::belongs_to(related))
    }

    pub fn has_one(self, name: &str, related: &str) -> Self {
        self.relation(name, RelationDecl::has_one(related))
    }

    pub fn has_many(self, name: &str, related: &str) -> Self {
        self.relation(name, RelationDecl::has_many(related))
    }

    pub fn belongs_to_many(self, name: &str, related: &str) -> Self {
        self.relation(name, RelationDecl::belongs_to_many(related))
    }

    /// Polymorphic parent whose columns are `{name}_type` / `{name}_id`.
    pub fn morph_to(self, name: &str) -> Self {
        self.relation(name, RelationDecl::morph_to())
    }

    pub fn morph_one(self, name: &str, related: &str, morph_name: &str) -> Self {
        self.relation(name, RelationDecl::morph_one(related, morph_name))
    }

    pub fn morph_many(self, name: &str, related: &str, morph_name: &str) -> Self {
        self.relation(name, RelationDecl::morph_many(related, morph_name))
    }

    pub fn morph_to_many(self, name: &str, related: &str, morph_name: &str) -> Self {
        self.relation(name, RelationDecl::morph_to_many(related, morph_name))
    }

    pub fn morphed_by_many(self, name: &str, related: &str, morph_name: &str) -> Self {
        self.relation(name, RelationDecl::morphed_by_many(related, morph_name))
    }

    pub fn has_many_through(self, name: &str, related: &str, through: &str) -> Self {
        self.relation(name, RelationDecl::has_many_through(related, through))
    }

    pub fn has_one_through(self, name: &str, related: &str, through: &str) -> Self {
        self.relation(name, RelationDecl::has_one_through(related, through))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    #[inline]
    pub fn key_name(&self) -> &str {
        &self.key
    }

    /// `table.key`.
    pub fn qualified_key(&self) -> String {
        format!("{}.{}", self.table, self.key)
    }

    pub fn connection_name(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn declared_relation(&self, name: &str) -> Result<&RelationDecl> {
        self.relations
            .get(name)
            .ok_or_else(|| RelqError::UnknownRelation {
                model: self.name.clone(),
                relation: name.to_string(),
            })
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }
}

/// Every model, morph alias and scope known to the application.
#[derive(Default, Clone)]
pub struct Registry {
    models: HashMap<String, Arc<ModelDef>>,
    morph_map: HashMap<String, String>,
    scopes: HashMap<(String, String), Scope>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .field("morph_map", &self.morph_map)
            .field("scopes", &self.scopes.len())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, model: ModelDef) -> Self {
        if let Some(alias) = &model.morph_alias {
            self.morph_map.insert(alias.clone(), model.name.clone());
        }
        self.models.insert(model.name.clone(), Arc::new(model));
        self
    }

    /// Maps a discriminator value to a model name.
    pub fn morph_map(mut self, alias: impl Into<String>, model: impl Into<String>) -> Self {
        self.morph_map.insert(alias.into(), model.into());
        self
    }

    /// Registers a named scope for `model`.
    pub fn scope<F>(mut self, model: &str, name: &str, scope: F) -> Self
    where
        F: Fn(ModelQuery, &[Value]) -> ModelQuery + Send + Sync + 'static,
    {
        self.scopes
            .insert((model.to_string(), name.to_string()), Arc::new(scope));
        self
    }

    pub fn model(&self, name: &str) -> Result<Arc<ModelDef>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| RelqError::UnknownModel(name.to_string()))
    }

    pub fn lookup_scope(&self, model: &str, name: &str) -> Result<Scope> {
        self.scopes
            .get(&(model.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| RelqError::UnknownScope {
                model: model.to_string(),
                scope: name.to_string(),
            })
    }

    /// Discriminator value written for `model`: its morph-map alias, or the
    /// model name when it has none.
    pub fn morph_class(&self, model: &ModelDef) -> String {
        if let Some(alias) = &model.morph_alias {
            return alias.clone();
        }
        self.morph_map
            .iter()
            .find(|(_, name)| *name == &model.name)
            .map(|(alias, _)| alias.clone())
            .unwrap_or_else(|| model.name.clone())
    }

    /// Model stored under a discriminator value.
    pub fn morph_model(&self, alias: &str) -> Result<Arc<ModelDef>> {
        match self.morph_map.get(alias) {
            Some(name) => self.model(name),
            None => self.model(alias),
        }
    }

    /// Starts a query for `model`.
    pub fn query(self: &Arc<Self>, model: &str, dialect: Dialect) -> Result<ModelQuery> {
        ModelQuery::new(self.clone(), model, dialect)
    }
}
