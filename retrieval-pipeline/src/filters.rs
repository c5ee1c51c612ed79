use serde::{Deserialize, Serialize};
use surrealdb::{engine::any::Any, method::Query};

/// Narrowing applied identically to every search stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub store_id: Option<String>,
    pub category_id: Option<String>,
    #[serde(default)]
    pub in_stock_only: bool,
}

impl SearchFilters {
    pub fn for_store(store_id: impl Into<String>) -> Self {
        Self {
            store_id: Some(store_id.into()),
            ..Self::default()
        }
    }

    /// Conditions to AND onto a product query. Values come from [`Self::bind`].
    pub(crate) fn conditions(&self) -> Vec<&'static str> {
        let mut conditions = Vec::new();
        if self.store_id.is_some() {
            conditions.push("store_id = $store_id");
        }
        if self.category_id.is_some() {
            conditions.push("category_id = $category_id");
        }
        if self.in_stock_only {
            conditions.push("stock_status = 'in_stock'");
        }
        conditions
    }

    pub(crate) fn bind<'r>(&self, query: Query<'r, Any>) -> Query<'r, Any> {
        query
            .bind(("store_id", self.store_id.clone()))
            .bind(("category_id", self.category_id.clone()))
    }
}

/// Joins `base` with the filter conditions into one WHERE expression.
pub(crate) fn where_clause(base: &[String], filters: &SearchFilters) -> String {
    base.iter()
        .map(String::as_str)
        .chain(filters.conditions())
        .collect::<Vec<_>>()
        .join(" AND ")
}
