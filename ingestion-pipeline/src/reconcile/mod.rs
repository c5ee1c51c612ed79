//! Maps an enriched record onto existing-or-new catalog rows and persists the product.
//!
//! Everything one record needs (new store, category chain, manufacturer, product write) is
//! committed in a single transaction. Unique-index and commit conflicts from a concurrent
//! writer cancel that transaction and the whole record is resolved again after a short
//! jittered backoff.

mod cache;
mod resolver;
mod upsert;

pub use cache::{CategoryKey, IdentityCache, StoreKey};
pub use resolver::{lookup, remember, resolve, CatalogEntity, Resolved};
pub use upsert::{apply_sighting, new_product, ProductRefs, SightingChanges};

use std::time::Duration;

use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            category::Category, manufacturer::Manufacturer, product::Product, store::Store,
            StoredObject,
        },
    },
};
use serde::Serialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::{debug, info, warn};

use crate::{enricher::slugify, types::EnrichedRecord};

const MAX_CONFLICT_BACKOFF: Duration = Duration::from_secs(1);

/// Raised inside the record transaction when the product row moved on since it was read.
const STALE_PRODUCT_MESSAGE: &str =
    "product changed since it was read; this transaction can be retried";

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub default_country: String,
    pub default_currency: String,
    /// Extra attempts after a unique-index or transaction conflict
    pub conflict_retries: usize,
    /// Backoff unit in milliseconds; delays double from twice this value, jittered
    pub conflict_backoff_ms: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            default_country: "DE".to_string(),
            default_currency: "EUR".to_string(),
            conflict_retries: 3,
            conflict_backoff_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Created,
    Updated,
}

/// Result of reconciling one record.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub product: Product,
    pub action: UpsertAction,
    pub changes: SightingChanges,
    /// Stores, categories and manufacturers created for this record
    pub created_entities: usize,
}

/// A row that does not exist yet and is written inside the record's transaction.
#[derive(Debug, Clone)]
enum PlannedEntity {
    Store(Store),
    Category(Category),
    Manufacturer(Manufacturer),
}

impl PlannedEntity {
    fn table(&self) -> &'static str {
        match self {
            PlannedEntity::Store(_) => Store::table_name(),
            PlannedEntity::Category(_) => Category::table_name(),
            PlannedEntity::Manufacturer(_) => Manufacturer::table_name(),
        }
    }

    fn remember(&self, cache: &mut IdentityCache) {
        match self {
            PlannedEntity::Store(store) => remember(store, cache),
            PlannedEntity::Category(category) => remember(category, cache),
            PlannedEntity::Manufacturer(manufacturer) => remember(manufacturer, cache),
        }
    }
}

/// A category level's parent, hydrated only when a child has to be created under it.
enum Parent {
    Root,
    Known(Category),
    CachedId(String),
}

impl Parent {
    fn id(&self) -> Option<&str> {
        match self {
            Parent::Root => None,
            Parent::Known(category) => Some(category.id.as_str()),
            Parent::CachedId(id) => Some(id.as_str()),
        }
    }
}

struct RecordPlan {
    creates: Vec<PlannedEntity>,
    product: Product,
    /// `scrape_count` of the row the update was planned against
    expected_scrape_count: Option<u32>,
    action: UpsertAction,
    changes: SightingChanges,
}

/// Reconciles records for one run. Owns its identity cache; run one engine per worker.
pub struct ReconciliationEngine<'a> {
    db: &'a SurrealDbClient,
    cache: IdentityCache,
    settings: ReconcileSettings,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(db: &'a SurrealDbClient, settings: ReconcileSettings) -> Self {
        Self::with_cache(db, settings, IdentityCache::new())
    }

    pub fn with_cache(
        db: &'a SurrealDbClient,
        settings: ReconcileSettings,
        cache: IdentityCache,
    ) -> Self {
        Self {
            db,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    #[tracing::instrument(skip_all, fields(product_url = %record.product_url))]
    pub async fn reconcile(&mut self, record: &EnrichedRecord) -> Result<UpsertOutcome, AppError> {
        // Doubling delays starting at twice the configured backoff
        let mut delays = ExponentialBackoff::from_millis(2)
            .factor(self.settings.conflict_backoff_ms.max(1))
            .max_delay(MAX_CONFLICT_BACKOFF)
            .map(jitter)
            .take(self.settings.conflict_retries);
        let mut attempt = 0usize;
        loop {
            match self.reconcile_once(record).await {
                Err(err) if err.is_conflict() => {
                    let Some(delay) = delays.next() else {
                        return Err(err);
                    };
                    attempt = attempt.saturating_add(1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "conflict while reconciling; resolving again"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn reconcile_once(&mut self, record: &EnrichedRecord) -> Result<UpsertOutcome, AppError> {
        let plan = self.plan(record).await?;
        self.commit(&plan).await?;

        for entity in &plan.creates {
            entity.remember(&mut self.cache);
        }

        let outcome = UpsertOutcome {
            created_entities: plan.creates.len(),
            product: plan.product,
            action: plan.action,
            changes: plan.changes,
        };
        debug!(
            product_id = %outcome.product.id,
            action = ?outcome.action,
            price_changed = outcome.changes.price_changed,
            created_entities = outcome.created_entities,
            "record reconciled"
        );
        if outcome.changes.price_changed {
            info!(
                product_id = %outcome.product.id,
                price = ?outcome.product.price_amount,
                "price change detected"
            );
        }
        Ok(outcome)
    }

    async fn plan(&mut self, record: &EnrichedRecord) -> Result<RecordPlan, AppError> {
        let mut creates = Vec::new();

        let store = self.resolve_store(record).await?;
        let store_id = store.id().to_owned();
        if let Resolved::Planned(store) = store {
            creates.push(PlannedEntity::Store(store));
        }

        let category_id = self.resolve_categories(record, &mut creates).await?;

        let manufacturer_id = match record.manufacturer.as_deref() {
            Some(name) => {
                let resolved = resolve(&name.to_owned(), &mut self.cache, self.db, || {
                    Manufacturer::new(name.to_owned())
                })
                .await?;
                let id = resolved.id().to_owned();
                if let Resolved::Planned(manufacturer) = resolved {
                    creates.push(PlannedEntity::Manufacturer(manufacturer));
                }
                Some(id)
            }
            None => None,
        };

        let refs = ProductRefs {
            store_id,
            category_name: category_id
                .as_ref()
                .and_then(|_| record.category_path.last().cloned()),
            category_id,
            manufacturer_name: manufacturer_id
                .as_ref()
                .and_then(|_| record.manufacturer.clone()),
            manufacturer_id,
        };

        let now = Utc::now();
        let (product, action, changes, expected_scrape_count) =
            match Product::get_by_url(&record.product_url, self.db).await? {
                Some(existing) => {
                    let expected = existing.scrape_count;
                    let (product, changes) = apply_sighting(existing, record, &refs, now);
                    (product, UpsertAction::Updated, changes, Some(expected))
                }
                None => (
                    new_product(record, &refs, now),
                    UpsertAction::Created,
                    SightingChanges::default(),
                    None,
                ),
            };

        Ok(RecordPlan {
            creates,
            product,
            expected_scrape_count,
            action,
            changes,
        })
    }

    async fn resolve_store(&mut self, record: &EnrichedRecord) -> Result<Resolved<Store>, AppError> {
        let slug = record
            .store_slug
            .clone()
            .unwrap_or_else(|| slugify(&record.store_name));
        let key = StoreKey {
            name: record.store_name.clone(),
            slug: slug.clone(),
        };
        let settings = &self.settings;
        resolve(&key, &mut self.cache, self.db, || {
            Store::new(
                record.store_name.clone(),
                slug,
                settings.default_country.clone(),
                settings.default_currency.clone(),
            )
        })
        .await
    }

    /// Walks the category path top-down and returns the leaf id.
    async fn resolve_categories(
        &mut self,
        record: &EnrichedRecord,
        creates: &mut Vec<PlannedEntity>,
    ) -> Result<Option<String>, AppError> {
        let mut parent = Parent::Root;

        for (level, name) in record.category_path.iter().enumerate() {
            let slug = record
                .category_slugs
                .get(level)
                .cloned()
                .unwrap_or_else(|| slugify(name));
            let key = CategoryKey {
                slug: slug.clone(),
                level: u32::try_from(level).unwrap_or(u32::MAX),
                parent_key: Category::scope_key(parent.id()),
            };

            parent = match lookup::<Category>(&key, &mut self.cache, self.db).await? {
                Some(Resolved::Cached(id)) => Parent::CachedId(id),
                Some(Resolved::Found(category) | Resolved::Planned(category)) => {
                    Parent::Known(category)
                }
                None => {
                    let category = match self.hydrate(parent).await? {
                        None => Category::new_root(name.clone(), slug),
                        Some(parent) => Category::new_child(name.clone(), slug, &parent),
                    };
                    creates.push(PlannedEntity::Category(category.clone()));
                    Parent::Known(category)
                }
            };
        }

        Ok(parent.id().map(str::to_owned))
    }

    async fn hydrate(&self, parent: Parent) -> Result<Option<Category>, AppError> {
        match parent {
            Parent::Root => Ok(None),
            Parent::Known(category) => Ok(Some(category)),
            Parent::CachedId(id) => self
                .db
                .get_item::<Category>(&id)
                .await?
                .map(Some)
                .ok_or_else(|| AppError::NotFound(format!("category {id}"))),
        }
    }

    async fn commit(&self, plan: &RecordPlan) -> Result<(), AppError> {
        let mut sql = String::from("BEGIN TRANSACTION;\n");
        for (index, entity) in plan.creates.iter().enumerate() {
            sql.push_str(&format!(
                "CREATE type::thing('{table}', $e{index}.id) CONTENT $e{index};\n",
                table = entity.table()
            ));
        }
        let table = Product::table_name();
        match plan.action {
            UpsertAction::Created => sql.push_str(&format!(
                "CREATE type::thing('{table}', $product.id) CONTENT $product;\n"
            )),
            UpsertAction::Updated => {
                // The row must still be the one the sighting was applied to
                sql.push_str(&format!(
                    "LET $stored_count = (SELECT VALUE scrape_count FROM ONLY type::thing('{table}', $product.id));\n\
                     IF $stored_count != $expected_count {{ THROW '{STALE_PRODUCT_MESSAGE}' }};\n\
                     UPDATE type::thing('{table}', $product.id) CONTENT $product;\n"
                ));
            }
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut query = self.db.client.query(sql);
        for (index, entity) in plan.creates.iter().enumerate() {
            let name = format!("e{index}");
            query = match entity {
                PlannedEntity::Store(store) => query.bind((name, store.clone())),
                PlannedEntity::Category(category) => query.bind((name, category.clone())),
                PlannedEntity::Manufacturer(manufacturer) => {
                    query.bind((name, manufacturer.clone()))
                }
            };
        }
        let mut response = query
            .bind(("product", plan.product.clone()))
            .bind(("expected_count", plan.expected_scrape_count))
            .await?;
        SurrealDbClient::check_response(&mut response)
    }
}
