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

/// Query terms beyond this count are ignored.
const MAX_QUERY_TERMS: usize = 8;

#[derive(Debug, Deserialize)]
struct FtsScoreRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    fts_score: Option<f32>,
}

/// Lowercased, deduplicated query terms.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '"' | '(' | ')'))
        .map(|term| term.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
        if terms.len() == MAX_QUERY_TERMS {
            break;
        }
    }
    terms
}

/// Products whose `search_text` matches the query on the BM25 full-text index, best first,
/// ties by id.
pub async fn find_products_by_text(
    take: usize,
    query: &str,
    filters: &SearchFilters,
    db_client: &SurrealDbClient,
) -> Result<Vec<Scored<Product>>, AppError> {
    let terms = query_terms(query);
    if terms.is_empty() || take == 0 {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT id, (IF search::score(0) != NONE THEN search::score(0) ELSE 0 END) AS fts_score \
         FROM {table} \
         WHERE {filter_clause} \
         ORDER BY fts_score DESC, id ASC \
         LIMIT $limit",
        table = Product::table_name(),
        filter_clause = where_clause(&["search_text @0@ $terms".to_string()], filters),
    );

    debug!(terms = terms.len(), limit = take, "executing full-text query");

    let score_query = db_client
        .query(sql)
        .bind(("terms", terms.join(" ")))
        .bind(("limit", take as i64));
    let mut response = filters.bind(score_query).await?;
    let score_rows: Vec<FtsScoreRow> = response.take(0)?;

    if score_rows.is_empty() {
        return Ok(Vec::new());
    }

    let things: Vec<Thing> = score_rows
        .iter()
        .map(|row| Thing::from((Product::table_name(), row.id.as_str())))
        .collect();
    let mut items_response = db_client
        .query("SELECT * FROM type::table($table) WHERE id IN $things")
        .bind(("table", Product::table_name()))
        .bind(("things", things))
        .await?;
    let items: Vec<Product> = items_response.take(0)?;
    let mut item_map: HashMap<String, Product> = items
        .into_iter()
        .map(|item| (item.get_id().to_owned(), item))
        .collect();

    let mut results = Vec::with_capacity(score_rows.len());
    for row in score_rows {
        if let Some(item) = item_map.remove(&row.id) {
            let score = row.fts_score.unwrap_or_default();
            results.push(Scored::new(item).with_text_score(score));
        }
    }
    sort_by_score_desc(&mut results, |s| s.scores.text.unwrap_or_default());

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("Failed to init schema");
        db
    }

    fn product(name: &str, search_text: &str, url_id: u32, store_id: &str) -> Product {
        let mut product = Product::new(
            name.into(),
            format!("https://www.edeka24.de/products/{url_id}"),
            store_id.into(),
            "EUR".into(),
        );
        product.search_text = search_text.into();
        product
    }

    fn ids(results: &[Scored<Product>]) -> Vec<&str> {
        results.iter().map(|s| s.item.id.as_str()).collect()
    }

    #[test]
    fn terms_are_lowercased_and_deduplicated() {
        assert_eq!(query_terms("  Milch, milch (Bio) "), vec!["milch", "bio"]);
        assert!(query_terms("  ,; ").is_empty());
    }

    #[tokio::test]
    async fn matches_inside_compound_words_and_respects_filters() {
        let db = memory_db().await;
        let milk = product("Vollmilch 3,5%", "Vollmilch 3,5% Frische Milch Milchprodukte", 1, "s1");
        let cocoa = product("Kakao", "Kakao Trinkschokolade mit Milch", 2, "s1");
        let cheese = product("Gouda", "Gouda jung", 3, "s1");
        let other_store = product("Milchreis", "Milchreis", 4, "s2");
        for item in [&milk, &cocoa, &cheese, &other_store] {
            db.store_item(item.clone()).await.expect("store product");
        }

        let results = find_products_by_text(10, "Milch", &SearchFilters::for_store("s1"), &db)
            .await
            .expect("lexical search");

        let mut found = ids(&results);
        found.sort_unstable();
        let mut expected = vec![milk.id.as_str(), cocoa.id.as_str()];
        expected.sort_unstable();
        assert_eq!(found, expected);
        assert!(results.iter().all(|s| s.scores.text.is_some_and(|score| score > 0.0)));
    }

    #[tokio::test]
    async fn denser_matches_rank_first_and_take_bounds_the_query() {
        let db = memory_db().await;
        let dense = product("Milch", "Milch Milch Milch", 1, "s1");
        let sparse = product(
            "Kakao",
            "Kakao Trinkschokolade Pulver Dose mit etwas Milch und Zucker",
            2,
            "s1",
        );
        for item in [&dense, &sparse] {
            db.store_item(item.clone()).await.expect("store product");
        }

        let results = find_products_by_text(10, "milch", &SearchFilters::default(), &db)
            .await
            .expect("lexical search");
        assert_eq!(ids(&results), vec![dense.id.as_str(), sparse.id.as_str()]);

        let top = find_products_by_text(1, "milch", &SearchFilters::default(), &db)
            .await
            .expect("lexical search");
        assert_eq!(ids(&top), vec![dense.id.as_str()]);
    }

    #[tokio::test]
    async fn equal_scores_break_ties_by_id() {
        let db = memory_db().await;
        let mut first = product("Gouda", "Gouda jung", 1, "s1");
        first.id = "a-gouda".into();
        let mut second = product("Gouda", "Gouda jung", 2, "s1");
        second.id = "b-gouda".into();
        for item in [&second, &first] {
            db.store_item(item.clone()).await.expect("store product");
        }

        let results = find_products_by_text(10, "gouda", &SearchFilters::default(), &db)
            .await
            .expect("lexical search");

        assert_eq!(ids(&results), vec!["a-gouda", "b-gouda"]);
    }

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        let db = memory_db().await;
        let results = find_products_by_text(10, "   ", &SearchFilters::default(), &db)
            .await
            .expect("lexical search");
        assert!(results.is_empty());
    }
}
