//! SQLite-backed product catalog.

use super::traits::{
    CatalogReader, Category, Ebook, Product, ProductFile, Tag, Testimonial, Training,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS categories (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS products (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    price       REAL NOT NULL,
    currency    TEXT NOT NULL,
    image_url   TEXT,
    category_id INTEGER REFERENCES categories(id)
);
CREATE TABLE IF NOT EXISTS tags (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS product_tags (
    product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
    tag_id     INTEGER NOT NULL REFERENCES tags(id),
    PRIMARY KEY (product_id, tag_id)
);
CREATE TABLE IF NOT EXISTS testimonials (
    id         INTEGER PRIMARY KEY,
    product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
    author     TEXT NOT NULL,
    content    TEXT NOT NULL,
    rating     INTEGER
);
CREATE TABLE IF NOT EXISTS ebooks (
    id         INTEGER PRIMARY KEY,
    product_id INTEGER NOT NULL UNIQUE REFERENCES products(id) ON DELETE CASCADE,
    page_count INTEGER,
    format     TEXT
);
CREATE TABLE IF NOT EXISTS trainings (
    id               INTEGER PRIMARY KEY,
    product_id       INTEGER NOT NULL UNIQUE REFERENCES products(id) ON DELETE CASCADE,
    duration_minutes INTEGER,
    level            TEXT
);
CREATE TABLE IF NOT EXISTS product_files (
    id         INTEGER PRIMARY KEY,
    product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
    file_name  TEXT NOT NULL,
    url        TEXT NOT NULL
);
";

/// Catalog stored in a local SQLite database.
///
/// A fresh connection is opened per operation; all blocking work runs on the
/// tokio blocking pool.
pub struct SqliteCatalog {
    db_path: PathBuf,
}

impl SqliteCatalog {
    /// Open (and create if missing) the catalog database at `db_path`.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create catalog directory: {}", parent.display())
            })?;
        }

        let catalog = Self { db_path };
        let conn = catalog.connect()?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create catalog tables")?;
        Ok(catalog)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        open_connection(&self.db_path)
    }

    /// Insert or replace `products` and all their relations in one transaction.
    /// Returns the number of products written.
    pub async fn import(&self, products: Vec<Product>) -> Result<usize> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&db_path)?;
            write_products(&mut conn, &products)
        })
        .await
        .context("Catalog import task panicked")?
    }

    /// Load products from a JSON file shaped like `[Product, ...]` and import them.
    pub async fn import_json(&self, path: &Path) -> Result<usize> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
        let products: Vec<Product> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse catalog file: {}", path.display()))?;
        let written = self.import(products).await?;
        tracing::info!(path = %path.display(), products = written, "Catalog imported");
        Ok(written)
    }
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open catalog database: {}", db_path.display()))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .context("Failed to enable foreign keys")?;
    Ok(conn)
}

fn write_products(conn: &mut Connection, products: &[Product]) -> Result<usize> {
    let tx = conn.transaction().context("Failed to start transaction")?;

    for product in products {
        if product.name.trim().is_empty() {
            anyhow::bail!("Product {} has an empty name", product.id);
        }
        if !product.price.is_finite() || product.price < 0.0 {
            anyhow::bail!("Product {} has an invalid price: {}", product.id, product.price);
        }

        if let Some(category) = &product.category {
            tx.execute(
                "INSERT INTO categories (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![category.id, category.name],
            )
            .context("Failed to write category")?;
        }

        // Replacing the product row cascades to its child rows.
        tx.execute("DELETE FROM products WHERE id = ?1", params![product.id])
            .context("Failed to clear existing product")?;
        tx.execute(
            "INSERT INTO products (id, name, description, price, currency, image_url, category_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                product.id,
                product.name,
                product.description,
                product.price,
                product.currency,
                product.image_url,
                product.category.as_ref().map(|c| c.id),
            ],
        )
        .with_context(|| format!("Failed to insert product {}", product.id))?;

        for tag in &product.tags {
            tx.execute(
                "INSERT INTO tags (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![tag.id, tag.name],
            )
            .context("Failed to write tag")?;
            tx.execute(
                "INSERT OR IGNORE INTO product_tags (product_id, tag_id) VALUES (?1, ?2)",
                params![product.id, tag.id],
            )
            .context("Failed to link tag")?;
        }

        for t in &product.testimonials {
            tx.execute(
                "INSERT OR REPLACE INTO testimonials (id, product_id, author, content, rating)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![t.id, product.id, t.author, t.content, t.rating],
            )
            .context("Failed to write testimonial")?;
        }

        if let Some(ebook) = &product.ebook {
            tx.execute(
                "INSERT OR REPLACE INTO ebooks (id, product_id, page_count, format)
                 VALUES (?1, ?2, ?3, ?4)",
                params![ebook.id, product.id, ebook.page_count, ebook.format],
            )
            .context("Failed to write ebook")?;
        }

        if let Some(training) = &product.training {
            tx.execute(
                "INSERT OR REPLACE INTO trainings (id, product_id, duration_minutes, level)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    training.id,
                    product.id,
                    training.duration_minutes,
                    training.level
                ],
            )
            .context("Failed to write training")?;
        }

        for file in &product.files {
            tx.execute(
                "INSERT OR REPLACE INTO product_files (id, product_id, file_name, url)
                 VALUES (?1, ?2, ?3, ?4)",
                params![file.id, product.id, file.file_name, file.url],
            )
            .context("Failed to write product file")?;
        }
    }

    tx.commit().context("Failed to commit catalog import")?;
    Ok(products.len())
}

fn read_products(conn: &Connection) -> Result<Vec<Product>> {
    let mut tags: HashMap<i64, Vec<Tag>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT pt.product_id, t.id, t.name FROM product_tags pt
             JOIN tags t ON t.id = pt.tag_id ORDER BY t.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Tag {
                    id: row.get(1)?,
                    name: row.get(2)?,
                },
            ))
        })?;
        for row in rows {
            let (product_id, tag) = row?;
            tags.entry(product_id).or_default().push(tag);
        }
    }

    let mut testimonials: HashMap<i64, Vec<Testimonial>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT product_id, id, author, content, rating FROM testimonials ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Testimonial {
                    id: row.get(1)?,
                    author: row.get(2)?,
                    content: row.get(3)?,
                    rating: row.get(4)?,
                },
            ))
        })?;
        for row in rows {
            let (product_id, testimonial) = row?;
            testimonials.entry(product_id).or_default().push(testimonial);
        }
    }

    let mut ebooks: HashMap<i64, Ebook> = HashMap::new();
    {
        let mut stmt = conn.prepare("SELECT product_id, id, page_count, format FROM ebooks")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Ebook {
                    id: row.get(1)?,
                    page_count: row.get(2)?,
                    format: row.get(3)?,
                },
            ))
        })?;
        for row in rows {
            let (product_id, ebook) = row?;
            ebooks.insert(product_id, ebook);
        }
    }

    let mut trainings: HashMap<i64, Training> = HashMap::new();
    {
        let mut stmt =
            conn.prepare("SELECT product_id, id, duration_minutes, level FROM trainings")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Training {
                    id: row.get(1)?,
                    duration_minutes: row.get(2)?,
                    level: row.get(3)?,
                },
            ))
        })?;
        for row in rows {
            let (product_id, training) = row?;
            trainings.insert(product_id, training);
        }
    }

    let mut files: HashMap<i64, Vec<ProductFile>> = HashMap::new();
    {
        let mut stmt =
            conn.prepare("SELECT product_id, id, file_name, url FROM product_files ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                ProductFile {
                    id: row.get(1)?,
                    file_name: row.get(2)?,
                    url: row.get(3)?,
                },
            ))
        })?;
        for row in rows {
            let (product_id, file) = row?;
            files.entry(product_id).or_default().push(file);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT p.id, p.name, p.description, p.price, p.currency, p.image_url, c.id, c.name
         FROM products p LEFT JOIN categories c ON c.id = p.category_id
         ORDER BY p.id",
    )?;
    let rows = stmt.query_map([], |row| {
        let category_id: Option<i64> = row.get(6)?;
        let category_name: Option<String> = row.get(7)?;
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            price: row.get(3)?,
            currency: row.get(4)?,
            image_url: row.get(5)?,
            category: category_id
                .zip(category_name)
                .map(|(id, name)| Category { id, name }),
            tags: Vec::new(),
            testimonials: Vec::new(),
            ebook: None,
            training: None,
            files: Vec::new(),
        })
    })?;

    let mut products = Vec::new();
    for row in rows {
        let mut product = row?;
        product.tags = tags.remove(&product.id).unwrap_or_default();
        product.testimonials = testimonials.remove(&product.id).unwrap_or_default();
        product.ebook = ebooks.remove(&product.id);
        product.training = trainings.remove(&product.id);
        product.files = files.remove(&product.id).unwrap_or_default();
        products.push(product);
    }
    Ok(products)
}

#[async_trait]
impl CatalogReader for SqliteCatalog {
    async fn fetch_all(&self) -> Result<Vec<Product>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            read_products(&conn).context("Failed to read catalog")
        })
        .await
        .context("Catalog read task panicked")?
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
