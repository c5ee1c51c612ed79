use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use retrieval_pipeline::SearchMode;
use rust_decimal::Decimal;

#[derive(Parser, Debug)]
#[command(
    name = "catalog",
    author,
    version,
    about = "Ingest scraped retail products and search the catalog"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Define the catalog's unique indexes
    Init {
        /// Also (re)define the HNSW embedding index for the configured dimension
        #[arg(long)]
        vector_index: bool,
    },
    /// Ingest scraped records, one JSON object per line
    Ingest(IngestArgs),
    /// Search products by keywords, fused with embedding similarity when available
    Search(SearchArgs),
    /// Products of the same store similar to a given product
    Similar {
        product_id: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Generate embeddings for products that lack one or whose content changed
    Embed {
        /// Overrides the configured batch size
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Recompute search text for products missing it
    BackfillSearchText,
    /// Print the category tree
    Categories,
    /// List a store's products
    Products(ProductsArgs),
    /// List priced products within a range, cheapest first
    PriceRange(PriceRangeArgs),
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// JSON lines file, or `-` for stdin
    pub input: PathBuf,
    /// Abort on the first dropped or failed record
    #[arg(long)]
    pub strict: bool,
    /// Run one embedding batch after the ingest
    #[arg(long)]
    pub embed: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    pub query: String,
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
    #[arg(long)]
    pub store_id: Option<String>,
    #[arg(long)]
    pub category_id: Option<String>,
    #[arg(long)]
    pub in_stock: bool,
    #[arg(long, value_enum, default_value_t = SearchMode::Auto)]
    pub mode: SearchMode,
}

#[derive(Args, Debug)]
pub struct ProductsArgs {
    pub store_id: String,
    #[arg(long)]
    pub category_id: Option<String>,
    #[arg(long)]
    pub in_stock: bool,
    #[arg(long, default_value_t = 0)]
    pub skip: usize,
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct PriceRangeArgs {
    #[arg(long)]
    pub min: Option<Decimal>,
    #[arg(long)]
    pub max: Option<Decimal>,
    #[arg(long)]
    pub store_id: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub skip: usize,
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}
