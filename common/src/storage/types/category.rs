use std::collections::HashMap;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::new_record_id;

/// Scope key shared by all top-level categories.
pub const ROOT_SCOPE: &str = "root";

stored_object!(Category, "category", {
    name: String,
    slug: String,
    parent_id: Option<String>,
    /// Parent id or `root`; together with `name` this is the unique identity
    parent_key: String,
    level: u32,
    /// Slash-joined names from the root down to this node
    path: String
});

/// A category with its resolved subtree.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryNode {
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

impl Category {
    pub fn new_root(name: String, slug: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            created_at: now,
            updated_at: now,
            path: name.clone(),
            name,
            slug,
            parent_id: None,
            parent_key: ROOT_SCOPE.to_string(),
            level: 0,
        }
    }

    pub fn new_child(name: String, slug: String, parent: &Category) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            created_at: now,
            updated_at: now,
            path: format!("{}/{}", parent.path, name),
            name,
            slug,
            parent_id: Some(parent.id.clone()),
            parent_key: parent.id.clone(),
            level: parent.level.saturating_add(1),
        }
    }

    pub fn scope_key(parent_id: Option<&str>) -> String {
        parent_id.unwrap_or(ROOT_SCOPE).to_string()
    }

    /// Looks a category up by slug within one parent scope.
    pub async fn find_in_scope(
        slug: &str,
        parent_id: Option<&str>,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .client
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE slug = $slug AND parent_key = $parent_key LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("slug", slug.to_owned()))
            .bind(("parent_key", Self::scope_key(parent_id)))
            .await?;
        let categories: Vec<Self> = response.take(0)?;
        Ok(categories.into_iter().next())
    }

    pub async fn roots(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        Self::children_of_scope(ROOT_SCOPE, db).await
    }

    pub async fn children(parent_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        Self::children_of_scope(parent_id, db).await
    }

    async fn children_of_scope(
        parent_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE parent_key = $parent_key ORDER BY name ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("parent_key", parent_key.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Full category forest, children sorted by name.
    pub async fn tree(db: &SurrealDbClient) -> Result<Vec<CategoryNode>, AppError> {
        let all: Vec<Self> = db.get_all_stored_items().await?;
        Ok(build_forest(all))
    }
}

fn build_forest(categories: Vec<Category>) -> Vec<CategoryNode> {
    let mut by_scope: HashMap<String, Vec<Category>> = HashMap::new();
    for category in categories {
        by_scope
            .entry(category.parent_key.clone())
            .or_default()
            .push(category);
    }
    for siblings in by_scope.values_mut() {
        siblings.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    }
    attach_children(ROOT_SCOPE, &mut by_scope)
}

fn attach_children(
    scope: &str,
    by_scope: &mut HashMap<String, Vec<Category>>,
) -> Vec<CategoryNode> {
    let Some(siblings) = by_scope.remove(scope) else {
        return Vec::new();
    };
    siblings
        .into_iter()
        .map(|category| {
            let children = attach_children(&category.id, by_scope);
            CategoryNode { category, children }
        })
        .collect()
}
