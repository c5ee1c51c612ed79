use std::collections::HashMap;

use serde::Deserialize;
use surrealdb::sql::Thing;
use tracing::debug;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            product::{deserialize_flexible_id, Product},
            StoredObject,
        },
    },
};

use crate::{
    filters::{where_clause, SearchFilters},
    scoring::{sort_by_score_desc, Scored},
};

/// HNSW search breadth for the KNN operator.
const KNN_EF: usize = 40;

#[derive(Debug, Deserialize)]
struct DistanceRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    distance: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct SimilarityRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    similarity: Option<f32>,
}

/// Products nearest to `embedding` by cosine similarity, best first. Products without an
/// embedding of the same dimension are not candidates. Hits below `min_similarity` are
/// dropped and `exclude_id` is never returned.
///
/// Goes through the HNSW index when one of the query's dimension exists and scans every
/// embedding otherwise.
pub async fn find_products_by_vector(
    take: usize,
    embedding: &[f32],
    min_similarity: f32,
    filters: &SearchFilters,
    exclude_id: Option<&str>,
    db_client: &SurrealDbClient,
) -> Result<Vec<Scored<Product>>, AppError> {
    if embedding.is_empty() || take == 0 {
        return Ok(Vec::new());
    }

    let hits = if Product::hnsw_index_dimension(db_client).await? == Some(embedding.len()) {
        nearest_by_index(take, embedding, filters, exclude_id, db_client).await?
    } else {
        nearest_by_scan(take, embedding, filters, exclude_id, db_client).await?
    };

    let hits: Vec<(String, f32)> = hits
        .into_iter()
        .filter(|(_, similarity)| similarity.is_finite() && *similarity >= min_similarity)
        .collect();
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let things: Vec<Thing> = hits
        .iter()
        .map(|(id, _)| Thing::from((Product::table_name(), id.as_str())))
        .collect();
    let mut items_response = db_client
        .client
        .query("SELECT * FROM type::table($table) WHERE id IN $things")
        .bind(("table", Product::table_name()))
        .bind(("things", things))
        .await?;
    let items: Vec<Product> = items_response.take(0)?;
    let mut item_map: HashMap<String, Product> = items
        .into_iter()
        .map(|item| (item.get_id().to_owned(), item))
        .collect();

    let mut results: Vec<Scored<Product>> = hits
        .into_iter()
        .filter_map(|(id, similarity)| {
            item_map
                .remove(&id)
                .map(|item| Scored::new(item).with_vector_score(similarity))
        })
        .collect();
    sort_by_score_desc(&mut results, |s| s.scores.vector.unwrap_or_default());
    results.truncate(take);

    Ok(results)
}

/// KNN through the HNSW index. The index uses cosine distance, so similarity is
/// `1 - distance`.
async fn nearest_by_index(
    take: usize,
    embedding: &[f32],
    filters: &SearchFilters,
    exclude_id: Option<&str>,
    db_client: &SurrealDbClient,
) -> Result<Vec<(String, f32)>, AppError> {
    // One extra neighbour makes room for the excluded product
    let k = take.saturating_add(usize::from(exclude_id.is_some()));
    let mut base = vec![format!("embedding <|{k},{KNN_EF}|> $embedding")];
    if exclude_id.is_some() {
        base.push("id != $exclude".to_string());
    }
    let sql = format!(
        "SELECT id, vector::distance::knn() AS distance \
         FROM {table} \
         WHERE {filter_clause} \
         ORDER BY distance \
         LIMIT $limit",
        table = Product::table_name(),
        filter_clause = where_clause(&base, filters),
    );

    debug!(
        dimension = embedding.len(),
        limit = take,
        "executing knn query"
    );

    let query = db_client
        .client
        .query(sql)
        .bind(("embedding", embedding.to_vec()))
        .bind((
            "exclude",
            exclude_id.map(|id| Thing::from((Product::table_name(), id))),
        ))
        .bind(("limit", take as i64));
    let mut response = filters.bind(query).await?;
    let rows: Vec<DistanceRow> = response.take(0)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| row.distance.map(|distance| (row.id, 1.0 - distance)))
        .collect())
}

async fn nearest_by_scan(
    take: usize,
    embedding: &[f32],
    filters: &SearchFilters,
    exclude_id: Option<&str>,
    db_client: &SurrealDbClient,
) -> Result<Vec<(String, f32)>, AppError> {
    let mut base = vec![
        "embedding != NONE".to_string(),
        "array::len(embedding) = $dimension".to_string(),
    ];
    if exclude_id.is_some() {
        base.push("id != $exclude".to_string());
    }
    let sql = format!(
        "SELECT id, vector::similarity::cosine(embedding, $embedding) AS similarity \
         FROM type::table($table) \
         WHERE {} \
         ORDER BY similarity DESC \
         LIMIT $limit",
        where_clause(&base, filters)
    );

    debug!(
        dimension = embedding.len(),
        limit = take,
        "executing vector similarity scan"
    );

    let query = db_client
        .client
        .query(sql)
        .bind(("table", Product::table_name()))
        .bind(("embedding", embedding.to_vec()))
        .bind(("dimension", embedding.len() as i64))
        .bind((
            "exclude",
            exclude_id.map(|id| Thing::from((Product::table_name(), id))),
        ))
        .bind(("limit", take as i64));
    let mut response = filters.bind(query).await?;
    let rows: Vec<SimilarityRow> = response.take(0)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| row.similarity.map(|similarity| (row.id, similarity)))
        .collect())
}
