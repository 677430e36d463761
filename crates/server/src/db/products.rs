//! Product repository: catalog reads, guarded stock writes, sale analytics.

use chrono::{DateTime, Utc};
use duka_core::types::{Money, ProductId};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};

use super::{RepositoryError, parse_decimal};
use crate::models::product::Product;

// ===== Internal Row Types =====

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i64,
    name: String,
    sku: String,
    description: Option<String>,
    category: Option<String>,
    price: Money,
    tax_rate: String,
    current_stock: i64,
    min_stock: i64,
    reorder_point: Option<i64>,
    allow_backorder: bool,
    track_inventory: bool,
    total_sold: i64,
    total_revenue: Money,
    last_sold_at: Option<DateTime<Utc>>,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = RepositoryError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let tax_rate = parse_decimal(&row.tax_rate, "products.tax_rate")?;
        Ok(Self {
            id: ProductId::new(row.id),
            name: row.name,
            sku: row.sku,
            description: row.description,
            category: row.category,
            price: row.price,
            tax_rate,
            current_stock: row.current_stock,
            min_stock: row.min_stock,
            reorder_point: row.reorder_point,
            allow_backorder: row.allow_backorder,
            track_inventory: row.track_inventory,
            total_sold: row.total_sold,
            total_revenue: row.total_revenue,
            last_sold_at: row.last_sold_at,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ===== Repository =====

/// A fully resolved product to insert. Defaults are applied by the
/// service before this struct is built.
#[derive(Debug)]
pub struct NewProduct {
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Money,
    pub tax_rate: Decimal,
    pub min_stock: i64,
    pub reorder_point: Option<i64>,
    pub allow_backorder: bool,
    pub track_inventory: bool,
}

/// Repository for product catalog and stock state.
pub struct ProductRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ProductRepository<'a> {
    /// Create a new repository backed by the given pool.
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a product by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored numerics are invalid.
    pub async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    /// Fetch a product by SKU.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored numerics are invalid.
    pub async fn get_by_sku(&self, sku: &str) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, name, sku, description, category, price, tax_rate,
                   current_stock, min_stock, reorder_point, allow_backorder,
                   track_inventory, total_sold, total_revenue, last_sold_at,
                   active, created_at, updated_at
            FROM products
            WHERE sku = ?1
            ",
        )
        .bind(sku)
        .fetch_optional(self.pool)
        .await?;

        row.map(Product::try_from).transpose()
    }

    /// List products, optionally filtered by a name/SKU search term.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored numerics are invalid.
    pub async fn list(
        &self,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, name, sku, description, category, price, tax_rate,
                   current_stock, min_stock, reorder_point, allow_backorder,
                   track_inventory, total_sold, total_revenue, last_sold_at,
                   active, created_at, updated_at
            FROM products
            WHERE ?1 IS NULL
               OR name LIKE '%' || ?1 || '%'
               OR sku LIKE '%' || ?1 || '%'
            ORDER BY name
            LIMIT ?2 OFFSET ?3
            ",
        )
        .bind(search)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Product::try_from).collect()
    }

    /// List tracked, active products at or below their reorder threshold.
    ///
    /// The threshold is `reorder_point` when set, `min_stock` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored numerics are invalid.
    pub async fn needs_reorder(&self) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, name, sku, description, category, price, tax_rate,
                   current_stock, min_stock, reorder_point, allow_backorder,
                   track_inventory, total_sold, total_revenue, last_sold_at,
                   active, created_at, updated_at
            FROM products
            WHERE track_inventory = 1
              AND active = 1
              AND current_stock <= COALESCE(reorder_point, min_stock)
            ORDER BY current_stock
            ",
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Product::try_from).collect()
    }

    /// Insert a new product with zero stock.
    ///
    /// Opening stock is recorded separately through the inventory ledger
    /// so the movement log stays complete.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the SKU is already taken,
    /// `RepositoryError::Database` on other query failures.
    pub async fn insert(
        conn: &mut SqliteConnection,
        new: &NewProduct,
        now: DateTime<Utc>,
    ) -> Result<Product, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r"
            INSERT INTO products (
                name, sku, description, category, price, tax_rate,
                current_stock, min_stock, reorder_point, allow_backorder,
                track_inventory, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?10, ?11, ?11)
            RETURNING id, name, sku, description, category, price, tax_rate,
                      current_stock, min_stock, reorder_point, allow_backorder,
                      track_inventory, total_sold, total_revenue, last_sold_at,
                      active, created_at, updated_at
            ",
        )
        .bind(&new.name)
        .bind(&new.sku)
        .bind(&new.description)
        .bind(&new.category)
        .bind(new.price)
        .bind(new.tax_rate.to_string())
        .bind(new.min_stock)
        .bind(new.reorder_point)
        .bind(new.allow_backorder)
        .bind(new.track_inventory)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict(format!("SKU '{}' is already taken", new.sku));
            }
            e.into()
        })?;

        Product::try_from(row)
    }

    /// Fetch a product by id on an explicit connection.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored numerics are invalid.
    pub async fn fetch(
        conn: &mut SqliteConnection,
        id: ProductId,
    ) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, name, sku, description, category, price, tax_rate,
                   current_stock, min_stock, reorder_point, allow_backorder,
                   track_inventory, total_sold, total_revenue, last_sold_at,
                   active, created_at, updated_at
            FROM products
            WHERE id = ?1
            ",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(Product::try_from).transpose()
    }

    /// Apply a signed stock delta if the guard holds.
    ///
    /// The guard and the write are one statement: the product must be
    /// tracked, and a decrease must either stay non-negative or be
    /// allowed to backorder. Returns the new stock level when applied,
    /// `None` when the guard refused (caller re-reads to tell why).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn try_apply_stock_delta(
        conn: &mut SqliteConnection,
        id: ProductId,
        delta: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, RepositoryError> {
        let new_stock = sqlx::query_scalar::<_, i64>(
            r"
            UPDATE products
            SET current_stock = current_stock + ?1, updated_at = ?2
            WHERE id = ?3
              AND track_inventory = 1
              AND (?1 >= 0 OR allow_backorder = 1 OR current_stock + ?1 >= 0)
            RETURNING current_stock
            ",
        )
        .bind(delta)
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(new_stock)
    }

    /// Overwrite sale analytics after a `sale` movement.
    ///
    /// Totals are computed by the caller inside the same transaction;
    /// money columns are TEXT, so arithmetic cannot happen in SQL.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the product does not exist,
    /// `RepositoryError::Database` on query failure.
    pub async fn update_sale_stats(
        conn: &mut SqliteConnection,
        id: ProductId,
        total_sold: i64,
        total_revenue: Money,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE products
            SET total_sold = ?1, total_revenue = ?2, last_sold_at = ?3, updated_at = ?3
            WHERE id = ?4
            ",
        )
        .bind(total_sold)
        .bind(total_revenue)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
