//! Relation declarations and their resolved descriptors.
//!
//! A model declares relations as [`RelationDecl`]s: the kind, the related
//! model and whichever keys differ from the naming conventions. The first
//! time a query references a relation name the declaration is resolved
//! against the [`Registry`] into a [`Relation`], with every key filled in.
//!
//! A [`Relation`] is a closed enum over the relation kinds. Each kind knows
//! two things: how to express itself as an existence sub-query against a
//! parent query (`exists` module) and how to fetch the related rows for a
//! batch of parents (`eager` module).

mod eager;
mod exists;

pub(crate) use eager::MorphGroup;
pub(crate) use exists::{ExistenceQuery, morph_to_existence};

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use heck::ToSnakeCase;
use relq_core::Result;

use crate::model::{ModelDef, Registry, naming};

/// Every kind of relation a model can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    MorphOne,
    MorphMany,
    BelongsToMany,
    MorphToMany,
    MorphedByMany,
    MorphTo,
    HasManyThrough,
    HasOneThrough,
}

impl RelationKind {
    /// Whether eager loading attaches a single record instead of a list.
    pub const fn is_single(self) -> bool {
        matches!(
            self,
            RelationKind::BelongsTo
                | RelationKind::HasOne
                | RelationKind::MorphOne
                | RelationKind::MorphTo
                | RelationKind::HasOneThrough
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::BelongsTo => "belongs-to",
            RelationKind::HasOne => "has-one",
            RelationKind::HasMany => "has-many",
            RelationKind::MorphOne => "morph-one",
            RelationKind::MorphMany => "morph-many",
            RelationKind::BelongsToMany => "belongs-to-many",
            RelationKind::MorphToMany => "morph-to-many",
            RelationKind::MorphedByMany => "morphed-by-many",
            RelationKind::MorphTo => "morph-to",
            RelationKind::HasManyThrough => "has-many-through",
            RelationKind::HasOneThrough => "has-one-through",
        }
    }
}

// ==================== declarations ====================

/// An unresolved relation: kind, target model and key overrides.
#[derive(Debug, Clone)]
pub struct RelationDecl {
    kind: RelationKind,
    related: Option<String>,
    through: Option<String>,
    morph_name: Option<String>,
    foreign_key: Option<String>,
    owner_key: Option<String>,
    local_key: Option<String>,
    table: Option<String>,
    foreign_pivot_key: Option<String>,
    related_pivot_key: Option<String>,
    parent_key: Option<String>,
    related_key: Option<String>,
    pivot_columns: Vec<String>,
    morph_type: Option<String>,
    morph_id: Option<String>,
    first_key: Option<String>,
    second_key: Option<String>,
    second_local_key: Option<String>,
}

impl RelationDecl {
    fn new(kind: RelationKind, related: Option<&str>) -> Self {
        Self {
            kind,
            related: related.map(str::to_string),
            through: None,
            morph_name: None,
            foreign_key: None,
            owner_key: None,
            local_key: None,
            table: None,
            foreign_pivot_key: None,
            related_pivot_key: None,
            parent_key: None,
            related_key: None,
            pivot_columns: Vec::new(),
            morph_type: None,
            morph_id: None,
            first_key: None,
            second_key: None,
            second_local_key: None,
        }
    }

    /// The parent row carries `<relation>_<owner key>` pointing at `related`.
    pub fn belongs_to(related: &str) -> Self {
        Self::new(RelationKind::BelongsTo, Some(related))
    }

    pub fn has_one(related: &str) -> Self {
        Self::new(RelationKind::HasOne, Some(related))
    }

    pub fn has_many(related: &str) -> Self {
        Self::new(RelationKind::HasMany, Some(related))
    }

    /// Many-to-many through a pivot table named after both models.
    pub fn belongs_to_many(related: &str) -> Self {
        Self::new(RelationKind::BelongsToMany, Some(related))
    }

    pub fn morph_to() -> Self {
        Self::new(RelationKind::MorphTo, None)
    }

    pub fn morph_one(related: &str, morph_name: &str) -> Self {
        Self::new(RelationKind::MorphOne, Some(related)).morph_name(morph_name)
    }

    pub fn morph_many(related: &str, morph_name: &str) -> Self {
        Self::new(RelationKind::MorphMany, Some(related)).morph_name(morph_name)
    }

    /// Polymorphic many-to-many seen from the owning side
    /// (`Post` → `tags` through `taggables`).
    pub fn morph_to_many(related: &str, morph_name: &str) -> Self {
        Self::new(RelationKind::MorphToMany, Some(related)).morph_name(morph_name)
    }

    /// Inverse of [`morph_to_many`](Self::morph_to_many)
    /// (`Tag` → `posts` through `taggables`).
    pub fn morphed_by_many(related: &str, morph_name: &str) -> Self {
        Self::new(RelationKind::MorphedByMany, Some(related)).morph_name(morph_name)
    }

    pub fn has_many_through(related: &str, through: &str) -> Self {
        let mut decl = Self::new(RelationKind::HasManyThrough, Some(related));
        decl.through = Some(through.to_string());
        decl
    }

    pub fn has_one_through(related: &str, through: &str) -> Self {
        let mut decl = Self::new(RelationKind::HasOneThrough, Some(related));
        decl.through = Some(through.to_string());
        decl
    }

    fn morph_name(mut self, name: &str) -> Self {
        self.morph_name = Some(name.to_string());
        self
    }

    pub fn foreign_key(mut self, key: &str) -> Self {
        self.foreign_key = Some(key.to_string());
        self
    }

    /// Key on the related model a belongs-to or morph-to points at.
    pub fn owner_key(mut self, key: &str) -> Self {
        self.owner_key = Some(key.to_string());
        self
    }

    pub fn local_key(mut self, key: &str) -> Self {
        self.local_key = Some(key.to_string());
        self
    }

    pub fn pivot_table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    /// Pivot columns pointing at the parent and the related model.
    pub fn pivot_keys(mut self, foreign_pivot_key: &str, related_pivot_key: &str) -> Self {
        self.foreign_pivot_key = Some(foreign_pivot_key.to_string());
        self.related_pivot_key = Some(related_pivot_key.to_string());
        self
    }

    pub fn parent_key(mut self, key: &str) -> Self {
        self.parent_key = Some(key.to_string());
        self
    }

    pub fn related_key(mut self, key: &str) -> Self {
        self.related_key = Some(key.to_string());
        self
    }

    /// Extra pivot columns loaded into [`Record::pivot`](crate::Record::pivot).
    pub fn with_pivot(mut self, columns: &[&str]) -> Self {
        self.pivot_columns
            .extend(columns.iter().map(|c| (*c).to_string()));
        self
    }

    /// Overrides the discriminator and id columns of a polymorphic relation.
    pub fn morph_columns(mut self, type_column: &str, id_column: &str) -> Self {
        self.morph_type = Some(type_column.to_string());
        self.morph_id = Some(id_column.to_string());
        self
    }

    /// Keys of a through relation: `first_key` on the intermediate model
    /// points at the parent, `second_key` on the related model points at
    /// the intermediate one.
    pub fn through_keys(mut self, first_key: &str, second_key: &str) -> Self {
        self.first_key = Some(first_key.to_string());
        self.second_key = Some(second_key.to_string());
        self
    }

    pub fn second_local_key(mut self, key: &str) -> Self {
        self.second_local_key = Some(key.to_string());
        self
    }

    #[inline]
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    fn related_model(&self, registry: &Registry) -> Result<Arc<ModelDef>> {
        registry.model(self.related.as_deref().unwrap_or_default())
    }

    /// Fills every key the declaration left to convention.
    pub fn resolve(&self, name: &str, parent: &ModelDef, registry: &Registry) -> Result<Relation> {
        let name = name.to_string();
        let relation = match self.kind {
            RelationKind::BelongsTo => {
                let related = self.related_model(registry)?;
                let owner_key = self
                    .owner_key
                    .clone()
                    .unwrap_or_else(|| related.key_name().to_string());
                let foreign_key = self
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_{owner_key}", name.to_snake_case()));
                Relation::BelongsTo(BelongsTo {
                    name,
                    related,
                    foreign_key,
                    owner_key,
                })
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                let related = self.related_model(registry)?;
                let inner = HasOneOrMany {
                    name,
                    related,
                    foreign_key: self.foreign_key.clone().unwrap_or_else(|| {
                        naming::foreign_key(parent.name(), parent.key_name())
                    }),
                    local_key: self
                        .local_key
                        .clone()
                        .unwrap_or_else(|| parent.key_name().to_string()),
                };
                if self.kind == RelationKind::HasOne {
                    Relation::HasOne(inner)
                } else {
                    Relation::HasMany(inner)
                }
            }
            RelationKind::MorphOne | RelationKind::MorphMany => {
                let related = self.related_model(registry)?;
                let morph_name = self.morph_name.as_deref().unwrap_or_default();
                let inner = MorphOneOrMany {
                    name,
                    related,
                    morph_type: self
                        .morph_type
                        .clone()
                        .unwrap_or_else(|| naming::morph_type(morph_name)),
                    morph_id: self
                        .morph_id
                        .clone()
                        .or_else(|| self.foreign_key.clone())
                        .unwrap_or_else(|| naming::morph_id(morph_name)),
                    morph_class: registry.morph_class(parent),
                    local_key: self
                        .local_key
                        .clone()
                        .unwrap_or_else(|| parent.key_name().to_string()),
                };
                if self.kind == RelationKind::MorphOne {
                    Relation::MorphOne(inner)
                } else {
                    Relation::MorphMany(inner)
                }
            }
            RelationKind::BelongsToMany => {
                let related = self.related_model(registry)?;
                Relation::BelongsToMany(BelongsToMany {
                    table: self
                        .table
                        .clone()
                        .unwrap_or_else(|| naming::pivot_table(parent.name(), related.name())),
                    foreign_pivot_key: self.foreign_pivot_key.clone().unwrap_or_else(|| {
                        naming::foreign_key(parent.name(), parent.key_name())
                    }),
                    related_pivot_key: self.related_pivot_key.clone().unwrap_or_else(|| {
                        naming::foreign_key(related.name(), related.key_name())
                    }),
                    parent_key: self
                        .parent_key
                        .clone()
                        .unwrap_or_else(|| parent.key_name().to_string()),
                    related_key: self
                        .related_key
                        .clone()
                        .unwrap_or_else(|| related.key_name().to_string()),
                    pivot_columns: self.pivot_columns.clone(),
                    morph: None,
                    name,
                    related,
                })
            }
            RelationKind::MorphToMany | RelationKind::MorphedByMany => {
                let related = self.related_model(registry)?;
                let morph_name = self.morph_name.as_deref().unwrap_or_default();
                let inverse = self.kind == RelationKind::MorphedByMany;
                // The morph columns always live on the pivot; which side they
                // point at flips with the direction.
                let (default_fpk, default_rpk, class) = if inverse {
                    (
                        naming::foreign_key(parent.name(), parent.key_name()),
                        naming::morph_id(morph_name),
                        registry.morph_class(&related),
                    )
                } else {
                    (
                        naming::morph_id(morph_name),
                        naming::foreign_key(related.name(), related.key_name()),
                        registry.morph_class(parent),
                    )
                };
                let inner = BelongsToMany {
                    table: self
                        .table
                        .clone()
                        .unwrap_or_else(|| naming::plural(&morph_name.to_snake_case())),
                    foreign_pivot_key: self.foreign_pivot_key.clone().unwrap_or(default_fpk),
                    related_pivot_key: self.related_pivot_key.clone().unwrap_or(default_rpk),
                    parent_key: self
                        .parent_key
                        .clone()
                        .unwrap_or_else(|| parent.key_name().to_string()),
                    related_key: self
                        .related_key
                        .clone()
                        .unwrap_or_else(|| related.key_name().to_string()),
                    pivot_columns: self.pivot_columns.clone(),
                    morph: Some(PivotMorph {
                        type_column: self
                            .morph_type
                            .clone()
                            .unwrap_or_else(|| naming::morph_type(morph_name)),
                        class,
                    }),
                    name,
                    related,
                };
                if inverse {
                    Relation::MorphedByMany(inner)
                } else {
                    Relation::MorphToMany(inner)
                }
            }
            RelationKind::MorphTo => Relation::MorphTo(MorphTo {
                morph_type: self
                    .morph_type
                    .clone()
                    .unwrap_or_else(|| naming::morph_type(&name)),
                morph_id: self
                    .morph_id
                    .clone()
                    .or_else(|| self.foreign_key.clone())
                    .unwrap_or_else(|| naming::morph_id(&name)),
                owner_key: self.owner_key.clone(),
                name,
            }),
            RelationKind::HasManyThrough | RelationKind::HasOneThrough => {
                let related = self.related_model(registry)?;
                let through = registry.model(self.through.as_deref().unwrap_or_default())?;
                let inner = HasManyThrough {
                    first_key: self.first_key.clone().unwrap_or_else(|| {
                        naming::foreign_key(parent.name(), parent.key_name())
                    }),
                    second_key: self.second_key.clone().unwrap_or_else(|| {
                        naming::foreign_key(through.name(), through.key_name())
                    }),
                    local_key: self
                        .local_key
                        .clone()
                        .unwrap_or_else(|| parent.key_name().to_string()),
                    second_local_key: self
                        .second_local_key
                        .clone()
                        .unwrap_or_else(|| through.key_name().to_string()),
                    name,
                    related,
                    through,
                };
                if self.kind == RelationKind::HasOneThrough {
                    Relation::HasOneThrough(inner)
                } else {
                    Relation::HasManyThrough(inner)
                }
            }
        };
        Ok(relation)
    }
}

// ==================== descriptors ====================

#[derive(Debug, Clone)]
pub struct BelongsTo {
    pub name: String,
    pub related: Arc<ModelDef>,
    /// Column on the parent table.
    pub foreign_key: String,
    /// Column on the related table.
    pub owner_key: String,
}

#[derive(Debug, Clone)]
pub struct HasOneOrMany {
    pub name: String,
    pub related: Arc<ModelDef>,
    /// Column on the related table.
    pub foreign_key: String,
    /// Column on the parent table.
    pub local_key: String,
}

#[derive(Debug, Clone)]
pub struct MorphOneOrMany {
    pub name: String,
    pub related: Arc<ModelDef>,
    pub morph_type: String,
    pub morph_id: String,
    pub morph_class: String,
    pub local_key: String,
}

/// Discriminator stored on a polymorphic pivot table.
#[derive(Debug, Clone)]
pub struct PivotMorph {
    pub type_column: String,
    pub class: String,
}

#[derive(Debug, Clone)]
pub struct BelongsToMany {
    pub name: String,
    pub related: Arc<ModelDef>,
    pub table: String,
    /// Pivot column pointing at the parent.
    pub foreign_pivot_key: String,
    /// Pivot column pointing at the related model.
    pub related_pivot_key: String,
    pub parent_key: String,
    pub related_key: String,
    pub pivot_columns: Vec<String>,
    pub morph: Option<PivotMorph>,
}

#[derive(Debug, Clone)]
pub struct MorphTo {
    pub name: String,
    pub morph_type: String,
    pub morph_id: String,
    /// Key on the target model; each target's own key when unset.
    pub owner_key: Option<String>,
}

impl MorphTo {
    pub fn owner_key_for<'a>(&'a self, model: &'a ModelDef) -> &'a str {
        self.owner_key.as_deref().unwrap_or(model.key_name())
    }
}

#[derive(Debug, Clone)]
pub struct HasManyThrough {
    pub name: String,
    pub related: Arc<ModelDef>,
    pub through: Arc<ModelDef>,
    /// Column on the intermediate table pointing at the parent.
    pub first_key: String,
    /// Column on the related table pointing at the intermediate row.
    pub second_key: String,
    pub local_key: String,
    pub second_local_key: String,
}

/// A resolved relation.
#[derive(Debug, Clone)]
pub enum Relation {
    BelongsTo(BelongsTo),
    HasOne(HasOneOrMany),
    HasMany(HasOneOrMany),
    MorphOne(MorphOneOrMany),
    MorphMany(MorphOneOrMany),
    BelongsToMany(BelongsToMany),
    MorphToMany(BelongsToMany),
    MorphedByMany(BelongsToMany),
    MorphTo(MorphTo),
    HasManyThrough(HasManyThrough),
    HasOneThrough(HasManyThrough),
}

impl Relation {
    pub fn kind(&self) -> RelationKind {
        match self {
            Relation::BelongsTo(_) => RelationKind::BelongsTo,
            Relation::HasOne(_) => RelationKind::HasOne,
            Relation::HasMany(_) => RelationKind::HasMany,
            Relation::MorphOne(_) => RelationKind::MorphOne,
            Relation::MorphMany(_) => RelationKind::MorphMany,
            Relation::BelongsToMany(_) => RelationKind::BelongsToMany,
            Relation::MorphToMany(_) => RelationKind::MorphToMany,
            Relation::MorphedByMany(_) => RelationKind::MorphedByMany,
            Relation::MorphTo(_) => RelationKind::MorphTo,
            Relation::HasManyThrough(_) => RelationKind::HasManyThrough,
            Relation::HasOneThrough(_) => RelationKind::HasOneThrough,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Relation::BelongsTo(r) => &r.name,
            Relation::HasOne(r) | Relation::HasMany(r) => &r.name,
            Relation::MorphOne(r) | Relation::MorphMany(r) => &r.name,
            Relation::BelongsToMany(r) | Relation::MorphToMany(r) | Relation::MorphedByMany(r) => {
                &r.name
            }
            Relation::MorphTo(r) => &r.name,
            Relation::HasManyThrough(r) | Relation::HasOneThrough(r) => &r.name,
        }
    }

    /// The related model; `None` for morph-to, whose target varies per row.
    pub fn related(&self) -> Option<&Arc<ModelDef>> {
        match self {
            Relation::BelongsTo(r) => Some(&r.related),
            Relation::HasOne(r) | Relation::HasMany(r) => Some(&r.related),
            Relation::MorphOne(r) | Relation::MorphMany(r) => Some(&r.related),
            Relation::BelongsToMany(r) | Relation::MorphToMany(r) | Relation::MorphedByMany(r) => {
                Some(&r.related)
            }
            Relation::MorphTo(_) => None,
            Relation::HasManyThrough(r) | Relation::HasOneThrough(r) => Some(&r.related),
        }
    }

    pub fn as_morph_to(&self) -> Option<&MorphTo> {
        match self {
            Relation::MorphTo(r) => Some(r),
            _ => None,
        }
    }
}

// ==================== key accessors ====================

/// Join-table layout of a many-to-many relation.
#[derive(Debug, Clone, Copy)]
pub struct PivotInfo<'a> {
    pub table: &'a str,
    pub foreign_pivot_key: &'a str,
    pub related_pivot_key: &'a str,
    pub columns: &'a [String],
}

/// Discriminator of a polymorphic relation. `class` is `None` for morph-to,
/// where the value is read per row.
#[derive(Debug, Clone, Copy)]
pub struct MorphInfo<'a> {
    pub type_column: &'a str,
    pub class: Option<&'a str>,
}

/// Uniform read access to the keys of any relation.
///
/// `foreign_key` is the column holding the reference and `local_key` the
/// column it references, whichever side of the relation they live on.
pub trait RelationKeys {
    fn foreign_key(&self) -> &str;

    fn local_key(&self) -> &str;

    fn pivot(&self) -> Option<PivotInfo<'_>> {
        None
    }

    fn morph(&self) -> Option<MorphInfo<'_>> {
        None
    }
}

impl RelationKeys for BelongsTo {
    fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    fn local_key(&self) -> &str {
        &self.owner_key
    }
}

impl RelationKeys for HasOneOrMany {
    fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    fn local_key(&self) -> &str {
        &self.local_key
    }
}

impl RelationKeys for MorphOneOrMany {
    fn foreign_key(&self) -> &str {
        &self.morph_id
    }

    fn local_key(&self) -> &str {
        &self.local_key
    }

    fn morph(&self) -> Option<MorphInfo<'_>> {
        Some(MorphInfo {
            type_column: &self.morph_type,
            class: Some(&self.morph_class),
        })
    }
}

impl RelationKeys for BelongsToMany {
    fn foreign_key(&self) -> &str {
        &self.foreign_pivot_key
    }

    fn local_key(&self) -> &str {
        &self.parent_key
    }

    fn pivot(&self) -> Option<PivotInfo<'_>> {
        Some(PivotInfo {
            table: &self.table,
            foreign_pivot_key: &self.foreign_pivot_key,
            related_pivot_key: &self.related_pivot_key,
            columns: &self.pivot_columns,
        })
    }

    fn morph(&self) -> Option<MorphInfo<'_>> {
        self.morph.as_ref().map(|morph| MorphInfo {
            type_column: &morph.type_column,
            class: Some(&morph.class),
        })
    }
}

impl RelationKeys for MorphTo {
    fn foreign_key(&self) -> &str {
        &self.morph_id
    }

    fn local_key(&self) -> &str {
        self.owner_key.as_deref().unwrap_or("id")
    }

    fn morph(&self) -> Option<MorphInfo<'_>> {
        Some(MorphInfo {
            type_column: &self.morph_type,
            class: None,
        })
    }
}

impl RelationKeys for HasManyThrough {
    fn foreign_key(&self) -> &str {
        &self.first_key
    }

    fn local_key(&self) -> &str {
        &self.local_key
    }
}

impl RelationKeys for Relation {
    fn foreign_key(&self) -> &str {
        self.keys().foreign_key()
    }

    fn local_key(&self) -> &str {
        self.keys().local_key()
    }

    fn pivot(&self) -> Option<PivotInfo<'_>> {
        self.keys().pivot()
    }

    fn morph(&self) -> Option<MorphInfo<'_>> {
        self.keys().morph()
    }
}

impl Relation {
    fn keys(&self) -> &dyn RelationKeys {
        match self {
            Relation::BelongsTo(r) => r,
            Relation::HasOne(r) | Relation::HasMany(r) => r,
            Relation::MorphOne(r) | Relation::MorphMany(r) => r,
            Relation::BelongsToMany(r) | Relation::MorphToMany(r) | Relation::MorphedByMany(r) => r,
            Relation::MorphTo(r) => r,
            Relation::HasManyThrough(r) | Relation::HasOneThrough(r) => r,
        }
    }
}

// ==================== aliases ====================

/// Counter behind the `relq_reserved_{n}` aliases used for self-joins.
///
/// One counter is shared by a root query and every sub-query built for it,
/// so aliases never collide within one statement.
#[derive(Debug, Clone, Default)]
pub struct AliasCounter(Arc<AtomicU32>);

impl AliasCounter {
    pub fn next(&self) -> String {
        format!("relq_reserved_{}", self.0.fetch_add(1, Ordering::Relaxed))
    }
}
