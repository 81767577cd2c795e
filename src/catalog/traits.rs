use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Testimonial {
    pub id: i64,
    pub author: String,
    pub content: String,
    #[serde(default)]
    pub rating: Option<u8>,
}

/// Digital book details attached to a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ebook {
    pub id: i64,
    #[serde(default)]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Course details attached to a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Training {
    pub id: i64,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFile {
    pub id: i64,
    pub file_name: String,
    pub url: String,
}

/// A catalog product with every relation the assistant may mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub testimonials: Vec<Testimonial>,
    #[serde(default)]
    pub ebook: Option<Ebook>,
    #[serde(default)]
    pub training: Option<Training>,
    #[serde(default)]
    pub files: Vec<ProductFile>,
}

fn default_currency() -> String {
    "XAF".into()
}

/// Read access to the full product catalog.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Fetch every product with its relations, ordered by id.
    async fn fetch_all(&self) -> anyhow::Result<Vec<Product>>;

    /// Backend identifier used in logs and status output.
    fn name(&self) -> &str;
}
