//! Product catalog read model.
//!
//! The assistant fetches the whole catalog on every message and embeds it as
//! JSON in its instructions; nothing is cached between messages.

pub mod sqlite;
pub mod traits;

pub use sqlite::SqliteCatalog;
pub use traits::{
    CatalogReader, Category, Ebook, Product, ProductFile, Tag, Testimonial, Training,
};

use crate::config::Config;

/// Render products as compact JSON for prompt embedding.
pub fn render_catalog(products: &[Product]) -> String {
    match serde_json::to_string(products) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to serialize catalog: {e}");
            "[]".to_string()
        }
    }
}

/// Open the catalog database configured in `[catalog]`.
pub fn create_catalog(config: &Config) -> anyhow::Result<SqliteCatalog> {
    SqliteCatalog::open(config.catalog_db_path())
}
