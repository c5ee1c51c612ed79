mod cli;
mod input;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use common::{
    storage::{
        db::SurrealDbClient,
        types::{category::Category, product::Product},
    },
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{generate_missing_embeddings, IngestionConfig, IngestionPipeline};
use retrieval_pipeline::{HybridSearchEngine, SearchConfig, SearchFilters, SearchRequest};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    cli::{Cli, Command, IngestArgs, SearchArgs},
    input::read_records,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, command output to stdout
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config().context("loading configuration")?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await
        .context("connecting to SurrealDB")?,
    );
    db.ensure_initialized().await?;

    match cli.command {
        Command::Init { vector_index } => {
            if vector_index {
                Product::redefine_hnsw_index(&db, config.embedding_dimensions as usize).await?;
            }
            info!(vector_index, "catalog initialized");
        }
        Command::Ingest(args) => {
            let mut pipeline_config = IngestionConfig::from_app_config(&config);
            pipeline_config.strict_mode |= args.strict;
            let embeddings = if args.embed {
                Some(EmbeddingProvider::from_config_or_disabled(&config, None).await)
            } else {
                None
            };
            ingest(Arc::clone(&db), pipeline_config, embeddings, &args).await?;
        }
        Command::Search(args) => {
            let embeddings =
                Arc::new(EmbeddingProvider::from_config_or_disabled(&config, None).await);
            let engine = HybridSearchEngine::new(
                Arc::clone(&db),
                Some(embeddings),
                SearchConfig::from_app_config(&config),
            );
            let response = engine.search(&search_request(args)).await?;
            print_json(&response)?;
        }
        Command::Similar { product_id, limit } => {
            let engine =
                HybridSearchEngine::new(Arc::clone(&db), None, SearchConfig::from_app_config(&config));
            let hits = engine.similar_products(&product_id, limit).await?;
            print_json(&hits)?;
        }
        Command::Embed { batch_size } => {
            let provider = EmbeddingProvider::from_config_or_disabled(&config, None).await;
            let report = generate_missing_embeddings(
                &db,
                &provider,
                batch_size.unwrap_or(config.embedding_batch_size),
            )
            .await?;
            print_json(&report)?;
        }
        Command::BackfillSearchText => {
            let updated = Product::backfill_search_text(&db).await?;
            print_json(&serde_json::json!({ "updated": updated }))?;
        }
        Command::Categories => {
            print_json(&Category::tree(&db).await?)?;
        }
        Command::Products(args) => {
            let page = Product::list_by_store(
                &args.store_id,
                args.category_id.as_deref(),
                args.in_stock,
                args.skip,
                args.limit,
                &db,
            )
            .await?;
            print_json(&page)?;
        }
        Command::PriceRange(args) => {
            let products = Product::list_by_price_range(
                args.min,
                args.max,
                args.store_id.as_deref(),
                args.skip,
                args.limit,
                &db,
            )
            .await?;
            print_json(&products)?;
        }
    }

    Ok(())
}

async fn ingest(
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    embeddings: Option<EmbeddingProvider>,
    args: &IngestArgs,
) -> Result<()> {
    let batch = read_records(&args.input).await?;
    if batch.malformed > 0 {
        warn!(malformed = batch.malformed, "some input lines were not valid records");
    }

    let batch_size = pipeline_config.tuning.embedding_batch_size;
    let pipeline = IngestionPipeline::new(Arc::clone(&db), pipeline_config);
    let stats = pipeline.ingest(batch.records).await?;
    print_json(&stats)?;

    if let Some(provider) = embeddings {
        let report = generate_missing_embeddings(&db, &provider, batch_size).await?;
        print_json(&report)?;
    }
    Ok(())
}

fn search_request(args: SearchArgs) -> SearchRequest {
    SearchRequest::new(args.query, args.limit)
        .with_mode(args.mode)
        .with_filters(SearchFilters {
            store_id: args.store_id,
            category_id: args.category_id,
            in_stock_only: args.in_stock,
        })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
