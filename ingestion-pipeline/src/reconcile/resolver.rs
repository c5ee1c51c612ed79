use std::{collections::HashMap, fmt::Debug, hash::Hash};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            category::{Category, ROOT_SCOPE},
            manufacturer::Manufacturer,
            store::Store,
            StoredObject,
        },
    },
};

use super::cache::{CategoryKey, IdentityCache, StoreKey};

/// A shared catalog row resolved by natural key: stores, categories and manufacturers.
#[async_trait]
pub trait CatalogEntity: StoredObject + Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync;

    fn key(&self) -> Self::Key;

    fn slot(cache: &IdentityCache) -> &HashMap<Self::Key, String>;

    fn slot_mut(cache: &mut IdentityCache) -> &mut HashMap<Self::Key, String>;

    async fn find_by_key(key: &Self::Key, db: &SurrealDbClient)
        -> Result<Option<Self>, AppError>;
}

#[async_trait]
impl CatalogEntity for Store {
    type Key = StoreKey;

    fn key(&self) -> StoreKey {
        StoreKey {
            name: self.name.clone(),
            slug: self.slug.clone(),
        }
    }

    fn slot(cache: &IdentityCache) -> &HashMap<StoreKey, String> {
        &cache.stores
    }

    fn slot_mut(cache: &mut IdentityCache) -> &mut HashMap<StoreKey, String> {
        &mut cache.stores
    }

    async fn find_by_key(key: &StoreKey, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        Store::get_by_slug(&key.slug, db).await
    }
}

#[async_trait]
impl CatalogEntity for Category {
    type Key = CategoryKey;

    fn key(&self) -> CategoryKey {
        CategoryKey {
            slug: self.slug.clone(),
            level: self.level,
            parent_key: self.parent_key.clone(),
        }
    }

    fn slot(cache: &IdentityCache) -> &HashMap<CategoryKey, String> {
        &cache.categories
    }

    fn slot_mut(cache: &mut IdentityCache) -> &mut HashMap<CategoryKey, String> {
        &mut cache.categories
    }

    async fn find_by_key(
        key: &CategoryKey,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let parent_id = (key.parent_key != ROOT_SCOPE)
            .then_some(key.parent_key.as_str());
        Category::find_in_scope(&key.slug, parent_id, db).await
    }
}

#[async_trait]
impl CatalogEntity for Manufacturer {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn slot(cache: &IdentityCache) -> &HashMap<String, String> {
        &cache.manufacturers
    }

    fn slot_mut(cache: &mut IdentityCache) -> &mut HashMap<String, String> {
        &mut cache.manufacturers
    }

    async fn find_by_key(key: &String, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        Manufacturer::get_by_name(key, db).await
    }
}

/// How an entity was resolved. `Planned` rows do not exist yet and must be written in the
/// same transaction as the product that references them.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<E> {
    Cached(String),
    Found(E),
    Planned(E),
}

impl<E: CatalogEntity> Resolved<E> {
    pub fn id(&self) -> &str {
        match self {
            Resolved::Cached(id) => id,
            Resolved::Found(entity) | Resolved::Planned(entity) => entity.get_id(),
        }
    }

    pub fn is_planned(&self) -> bool {
        matches!(self, Resolved::Planned(_))
    }
}

/// Cache first, then the database. Rows found in the database are committed, so they are
/// remembered right away.
pub async fn lookup<E: CatalogEntity>(
    key: &E::Key,
    cache: &mut IdentityCache,
    db: &SurrealDbClient,
) -> Result<Option<Resolved<E>>, AppError> {
    if let Some(id) = E::slot(cache).get(key) {
        return Ok(Some(Resolved::Cached(id.clone())));
    }

    match E::find_by_key(key, db).await? {
        Some(found) => {
            E::slot_mut(cache).insert(key.clone(), found.get_id().to_owned());
            Ok(Some(Resolved::Found(found)))
        }
        None => Ok(None),
    }
}

/// Get-or-plan: [`lookup`], falling back to `build` for a row that does not exist yet.
pub async fn resolve<E, F>(
    key: &E::Key,
    cache: &mut IdentityCache,
    db: &SurrealDbClient,
    build: F,
) -> Result<Resolved<E>, AppError>
where
    E: CatalogEntity,
    F: FnOnce() -> E + Send,
{
    Ok(match lookup(key, cache, db).await? {
        Some(existing) => existing,
        None => Resolved::Planned(build()),
    })
}

/// Records a committed row in the cache.
pub fn remember<E: CatalogEntity>(entity: &E, cache: &mut IdentityCache) {
    E::slot_mut(cache).insert(entity.key(), entity.get_id().to_owned());
}
